//! Managed object kinds
//!
//! Each kind declares what the generic reconciler needs to converge it: its
//! scope, how it may be patched or removed, which earlier kinds invalidate it,
//! and the projection of fields allowed to trigger a patch. Adding a kind means
//! adding a [`Kind`] variant, a policy row and a [`ManagedKind`] impl.

mod core_v1;
mod crd;
mod rbac;
mod workload;

pub use core_v1::{ClaimProjection, ServiceProjection};
pub use rbac::BindingProjection;

use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Object kinds the reconciler manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
    Namespace,
    ServiceAccount,
    ClusterRole,
    ClusterRoleBinding,
    Role,
    RoleBinding,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    Service,
    ReplicationController,
    Deployment,
    Route,
    CustomResourceDefinition,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Namespace => "namespace",
            Kind::ServiceAccount => "service account",
            Kind::ClusterRole => "cluster role",
            Kind::ClusterRoleBinding => "cluster role binding",
            Kind::Role => "role",
            Kind::RoleBinding => "role binding",
            Kind::ConfigMap => "config map",
            Kind::Secret => "secret",
            Kind::PersistentVolumeClaim => "persistent volume claim",
            Kind::Service => "service",
            Kind::ReplicationController => "replication controller",
            Kind::Deployment => "deployment",
            Kind::Route => "route",
            Kind::CustomResourceDefinition => "custom resource definition",
        };
        f.write_str(name)
    }
}

/// Whether objects of a kind live inside a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// What happens when a live object's projection differs from the desired one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    /// Never patched; created and deleted only
    Never,
    /// Re-fetched, comparable fields overwritten, updated
    OnDiff,
    /// Difference logged as a warning, object left untouched
    WarnOnly,
}

/// What happens to live objects that are no longer desired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
    /// Orphans are kept
    Never,
    /// Orphans are deleted
    Delete,
    /// Orphans keep subjects bound from other namespaces; deleted otherwise
    ReleaseSubjects,
}

/// Reconciliation rules of one kind
#[derive(Debug, Clone, Copy)]
pub struct KindPolicy {
    pub scope: Scope,
    pub patch: PatchMode,
    pub remove: RemoveMode,
    /// Kinds whose creation or patch forces a patch of this kind
    pub invalidated_by: &'static [Kind],
}

const WORKLOAD_INPUTS: &[Kind] = &[Kind::ConfigMap, Kind::Secret];

impl Kind {
    pub const fn policy(self) -> KindPolicy {
        use PatchMode::*;
        use RemoveMode::*;
        use Scope::*;
        let (scope, patch, remove, invalidated_by): (Scope, PatchMode, RemoveMode, &[Kind]) =
            match self {
                Kind::Namespace => (Cluster, OnDiff, RemoveMode::Never, &[]),
                Kind::ServiceAccount => (Namespaced, PatchMode::Never, Delete, &[]),
                Kind::ClusterRole => (Cluster, OnDiff, Delete, &[]),
                Kind::ClusterRoleBinding => (Cluster, OnDiff, ReleaseSubjects, &[]),
                Kind::Role => (Namespaced, OnDiff, Delete, &[]),
                Kind::RoleBinding => (Namespaced, OnDiff, Delete, &[]),
                Kind::ConfigMap => (Namespaced, OnDiff, Delete, &[]),
                Kind::Secret => (Namespaced, OnDiff, Delete, &[]),
                Kind::PersistentVolumeClaim => (Namespaced, PatchMode::Never, RemoveMode::Never, &[]),
                Kind::Service => (Namespaced, OnDiff, Delete, &[]),
                Kind::ReplicationController => (Namespaced, OnDiff, Delete, WORKLOAD_INPUTS),
                Kind::Deployment => (Namespaced, OnDiff, Delete, WORKLOAD_INPUTS),
                Kind::Route => (Namespaced, PatchMode::Never, Delete, &[]),
                Kind::CustomResourceDefinition => (Cluster, WarnOnly, Delete, &[]),
            };
        KindPolicy {
            scope,
            patch,
            remove,
            invalidated_by,
        }
    }

    pub const fn scope(self) -> Scope {
        self.policy().scope
    }

    pub const fn is_namespaced(self) -> bool {
        matches!(self.scope(), Scope::Namespaced)
    }
}

/// A Kubernetes object type the reconciler can converge.
///
/// `project` returns only the fields allowed to trigger a patch, normalized so
/// that equal projections mean "nothing to do". `overwrite` copies those same
/// fields from the desired object onto a freshly fetched live one.
pub trait ManagedKind:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: Kind;

    type Projection: PartialEq + fmt::Debug + Send;

    /// Typed API handle; cluster-scoped kinds ignore `namespace`
    fn api(client: Client, namespace: &str) -> Api<Self>;

    fn project(&self) -> Self::Projection;

    /// Projection the live object must reach. Differs from `desired.project()`
    /// only for merge-only kinds, where the target keeps live content.
    fn target(live: &Self, desired: &Self) -> Self::Projection {
        let _ = live;
        desired.project()
    }

    fn overwrite(fresh: &mut Self, desired: &Self);

    /// Desired prepared for comparison and creation
    fn normalize(self) -> Self {
        self
    }

    fn replicas(&self) -> Option<i32> {
        None
    }

    fn set_replicas(&mut self, _replicas: Option<i32>) {}

    /// Drop everything this namespace contributed to a cluster-wide object,
    /// returning whether anything owned by other namespaces remains.
    fn release(&mut self, _namespace: &str) -> bool {
        false
    }
}
