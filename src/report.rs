//! Pass state and outcome
//!
//! A [`Pass`] is threaded through every stage of one reconciliation run. It
//! carries the dry-run flag, the set of kinds that created or patched
//! something, the decisions taken so far and the collected errors. When the
//! run ends it becomes a [`Report`].

use crate::error::{Error, Result};
use crate::kinds::Kind;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;

/// Why an existing object is updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchReason {
    /// Comparable fields differ
    Drift,
    /// An earlier stage changed something this kind depends on
    Cascade,
}

/// Decision taken for one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Create,
    Patch { reason: PatchReason },
    Scale { from: Option<i32>, to: i32 },
    Delete,
    /// Subjects of this namespace dropped from a shared binding
    Release,
    /// Difference detected but deliberately left alone
    Skipped { reason: String },
}

/// One create, patch, scale, delete or skip decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub kind: Kind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub action: Action,
    /// False in dry-run, or when the remote call failed
    pub applied: bool,
}

/// Mutable state of a single reconciliation pass
#[derive(Debug)]
pub struct Pass {
    dry_run: bool,
    force_patch: bool,
    invalidated: BTreeSet<Kind>,
    changes: Vec<Change>,
    errors: Vec<Error>,
    started_at: DateTime<Utc>,
}

impl Pass {
    /// `force_patch` invalidates every kind that declares dependencies
    pub fn new(dry_run: bool, force_patch: bool) -> Self {
        Self {
            dry_run,
            force_patch,
            invalidated: BTreeSet::new(),
            changes: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Mark `kind` as having created or patched an object
    pub fn invalidate(&mut self, kind: Kind) {
        self.invalidated.insert(kind);
    }

    /// Whether objects of `kind` must be patched regardless of their fields
    pub fn is_invalidated(&self, kind: Kind) -> bool {
        let deps = kind.policy().invalidated_by;
        !deps.is_empty() && (self.force_patch || deps.iter().any(|d| self.invalidated.contains(d)))
    }

    pub fn record(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn fail(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn finish(self) -> Report {
        Report {
            dry_run: self.dry_run,
            started_at: self.started_at,
            finished_at: Utc::now(),
            changes: self.changes,
            errors: self.errors,
        }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub changes: Vec<Change>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<Error>,
}

fn serialize_errors<S: Serializer>(errors: &[Error], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(errors.iter().map(|e| e.to_string()))
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Changes whose remote call went through
    pub fn applied(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.applied)
    }

    /// Changes of the given kind
    pub fn changes_for(&self, kind: Kind) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }

    /// The report itself, or every collected error as one
    pub fn into_result(self) -> Result<Report> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::Aggregate(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_reaches_only_dependents() {
        let mut pass = Pass::new(false, false);
        assert!(!pass.is_invalidated(Kind::Deployment));
        pass.invalidate(Kind::Service);
        assert!(!pass.is_invalidated(Kind::Deployment));
        pass.invalidate(Kind::ConfigMap);
        assert!(pass.is_invalidated(Kind::Deployment));
        assert!(pass.is_invalidated(Kind::ReplicationController));
        assert!(!pass.is_invalidated(Kind::Route));
    }

    #[test]
    fn test_force_patch_invalidates_dependents() {
        let pass = Pass::new(false, true);
        assert!(pass.is_invalidated(Kind::Deployment));
        assert!(!pass.is_invalidated(Kind::ConfigMap));
    }

    #[test]
    fn test_into_result_aggregates() {
        let mut pass = Pass::new(true, false);
        pass.record(Change {
            kind: Kind::Secret,
            name: "s".to_string(),
            namespace: Some("tenant".to_string()),
            action: Action::Create,
            applied: false,
        });
        let report = pass.finish();
        assert!(report.is_success());
        assert_eq!(report.applied().count(), 0);
        assert!(report.into_result().is_ok());

        let mut pass = Pass::new(false, false);
        pass.fail(Error::Configuration("boom".to_string()));
        let err = pass.finish().into_result().unwrap_err();
        assert!(matches!(err, Error::Aggregate(ref errors) if errors.len() == 1));
    }

    #[test]
    fn test_report_serializes_errors_as_messages() {
        let mut pass = Pass::new(false, false);
        pass.record(Change {
            kind: Kind::ReplicationController,
            name: "web".to_string(),
            namespace: None,
            action: Action::Scale { from: Some(1), to: 3 },
            applied: true,
        });
        pass.fail(Error::Configuration("boom".to_string()));
        let json = serde_json::to_value(pass.finish()).unwrap();
        assert_eq!(json["errors"][0], "configuration error: boom");
        assert_eq!(json["changes"][0]["action"]["type"], "scale");
        assert_eq!(json["changes"][0]["kind"], "replicationController");
    }
}
