//! Pipeline orchestrator
//!
//! Runs its stages strictly in the order they were added. A stage whose index
//! cannot be built is skipped; every other failure is collected and the pass
//! moves on to the next stage.

use crate::kinds::Kind;
use crate::reconciler::UpdateComponent;
use crate::report::{Pass, Report};
use tracing::{error, info};

/// Ordered list of stages making up one reconciliation pass
pub struct Updater {
    components: Vec<Box<dyn UpdateComponent>>,
    dry_run: bool,
    force_patch: bool,
}

impl Updater {
    pub fn new(dry_run: bool, force_patch: bool) -> Self {
        Self {
            components: Vec::new(),
            dry_run,
            force_patch,
        }
    }

    /// Append a stage; stages run in insertion order
    pub fn add_updater(&mut self, component: Box<dyn UpdateComponent>) {
        self.components.push(component);
    }

    /// Kinds of the registered stages, in run order
    pub fn kinds(&self) -> Vec<Kind> {
        self.components.iter().map(|c| c.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Run one full pass over every stage
    pub async fn update(&mut self) -> Report {
        let mut pass = Pass::new(self.dry_run, self.force_patch);
        info!(
            stages = self.components.len(),
            dry_run = self.dry_run,
            "starting reconciliation pass"
        );

        for component in &mut self.components {
            let kind = component.kind();
            if let Err(e) = component.build_new_and_old().await {
                error!(%kind, error = %e, "skipping stage");
                pass.fail(e);
                continue;
            }
            component.add(&mut pass).await;
            component.remove(&mut pass).await;
        }

        let report = pass.finish();
        info!(
            changes = report.changes.len(),
            errors = report.errors.len(),
            "reconciliation pass finished"
        );
        report
    }
}
