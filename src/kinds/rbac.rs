//! RBAC kinds
//!
//! Roles compare by their sorted policy rules. Bindings compare by role
//! reference and subjects, where subjects are merge-only: a patch may add
//! subjects but never drops one that is already bound.

use super::{Kind, ManagedKind};
use crate::compare::{merge_subjects, sort_policy_rules, RuleProjection};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Subject,
};
use kube::{Api, Client};

impl ManagedKind for ClusterRole {
    const KIND: Kind = Kind::ClusterRole;

    type Projection = Vec<RuleProjection>;

    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }

    fn project(&self) -> Self::Projection {
        sort_policy_rules(self.rules.as_deref().unwrap_or_default())
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        fresh.rules = desired.rules.clone();
    }
}

impl ManagedKind for Role {
    const KIND: Kind = Kind::Role;

    type Projection = Vec<RuleProjection>;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        sort_policy_rules(self.rules.as_deref().unwrap_or_default())
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        fresh.rules = desired.rules.clone();
    }
}

/// Comparable view of a binding
#[derive(Debug, Clone, PartialEq)]
pub struct BindingProjection {
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}

fn project_binding(role_ref: &RoleRef, subjects: Option<&Vec<Subject>>) -> BindingProjection {
    let mut subjects = subjects.cloned().unwrap_or_default();
    subjects.sort_by(|a, b| {
        (&a.namespace, &a.name, &a.kind).cmp(&(&b.namespace, &b.name, &b.kind))
    });
    BindingProjection {
        role_ref: role_ref.clone(),
        subjects,
    }
}

/// Live subjects in their original order, followed by missing desired ones
fn merged_subjects(live: Option<&Vec<Subject>>, desired: Option<&Vec<Subject>>) -> Vec<Subject> {
    merge_subjects(
        live.map(Vec::as_slice).unwrap_or_default(),
        desired.map(Vec::as_slice).unwrap_or_default(),
    )
}

fn binding_target(
    live_subjects: Option<&Vec<Subject>>,
    desired_role_ref: &RoleRef,
    desired_subjects: Option<&Vec<Subject>>,
) -> BindingProjection {
    let merged = merged_subjects(live_subjects, desired_subjects);
    project_binding(desired_role_ref, Some(&merged))
}

impl ManagedKind for ClusterRoleBinding {
    const KIND: Kind = Kind::ClusterRoleBinding;

    type Projection = BindingProjection;

    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }

    fn project(&self) -> Self::Projection {
        project_binding(&self.role_ref, self.subjects.as_ref())
    }

    fn target(live: &Self, desired: &Self) -> Self::Projection {
        binding_target(live.subjects.as_ref(), &desired.role_ref, desired.subjects.as_ref())
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        fresh.role_ref = desired.role_ref.clone();
        fresh.subjects = Some(merged_subjects(fresh.subjects.as_ref(), desired.subjects.as_ref()));
    }

    /// Other namespaces may bind their own service accounts through the same
    /// cluster role binding; only subjects from `namespace` are released.
    /// Users and groups carry no namespace and are never released.
    fn release(&mut self, namespace: &str) -> bool {
        let remaining: Vec<Subject> = self
            .subjects
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.namespace.as_deref() != Some(namespace))
            .collect();
        let keep = !remaining.is_empty();
        self.subjects = Some(remaining);
        keep
    }
}

impl ManagedKind for RoleBinding {
    const KIND: Kind = Kind::RoleBinding;

    type Projection = BindingProjection;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        project_binding(&self.role_ref, self.subjects.as_ref())
    }

    fn target(live: &Self, desired: &Self) -> Self::Projection {
        binding_target(live.subjects.as_ref(), &desired.role_ref, desired.subjects.as_ref())
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        fresh.role_ref = desired.role_ref.clone();
        fresh.subjects = Some(merged_subjects(fresh.subjects.as_ref(), desired.subjects.as_ref()));
    }
}
