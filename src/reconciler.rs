//! Kind reconcilers
//!
//! Every stage of a pass implements [`UpdateComponent`]: build the old/new
//! index, add or patch, then remove orphans. [`KindReconciler`] implements it
//! once for any [`ManagedKind`], driven by the kind's policy row.
//! [`NamespaceReconciler`] handles the target namespace itself, which is
//! looked up by name rather than by ownership labels and never removed.

use crate::cluster::ClusterApi;
use crate::error::{ClientError, Error, Operation, Result};
use crate::kinds::{Kind, ManagedKind, PatchMode, RemoveMode};
use crate::report::{Action, Change, Pass, PatchReason};
use crate::selector::LabelSelector;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One stage of the reconciliation pipeline
#[async_trait]
pub trait UpdateComponent: Send + Sync {
    fn kind(&self) -> Kind;

    /// List live objects and index them together with the owned desired ones
    async fn build_new_and_old(&mut self) -> Result<()>;

    /// Create missing objects and patch changed ones
    async fn add(&mut self, pass: &mut Pass);

    /// Delete or release live objects that are no longer desired
    async fn remove(&mut self, pass: &mut Pass);
}

/// Generic reconciler for one managed kind
pub struct KindReconciler<K: ManagedKind, C: ClusterApi> {
    cluster: Arc<C>,
    namespace: String,
    selector: LabelSelector,
    desired: Vec<K>,
    old: BTreeMap<String, K>,
    new: BTreeMap<String, K>,
}

impl<K: ManagedKind, C: ClusterApi> KindReconciler<K, C> {
    pub fn new(cluster: Arc<C>, namespace: &str, selector: LabelSelector, desired: Vec<K>) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            selector,
            desired,
            old: BTreeMap::new(),
            new: BTreeMap::new(),
        }
    }

    /// Live objects indexed by the last build
    pub fn old(&self) -> &BTreeMap<String, K> {
        &self.old
    }

    /// Owned desired objects indexed by the last build
    pub fn new_objects(&self) -> &BTreeMap<String, K> {
        &self.new
    }

    fn change(&self, name: &str, action: Action, applied: bool) -> Change {
        Change {
            kind: K::KIND,
            name: name.to_string(),
            namespace: K::KIND.is_namespaced().then(|| self.namespace.clone()),
            action,
            applied,
        }
    }

    fn mutation_error(&self, operation: Operation, name: &str, source: ClientError) -> Error {
        Error::mutation(operation, K::KIND, name, &self.namespace, source)
    }

    async fn create(&self, name: &str, desired: &K, pass: &mut Pass) {
        info!(kind = %K::KIND, name, namespace = %self.namespace, "creating");
        pass.invalidate(K::KIND);
        if pass.dry_run() {
            pass.record(self.change(name, Action::Create, false));
            return;
        }
        match self.cluster.create(&self.namespace, desired).await {
            Ok(_) => pass.record(self.change(name, Action::Create, true)),
            Err(e) => {
                error!(kind = %K::KIND, name, error = %e, "create failed");
                pass.record(self.change(name, Action::Create, false));
                pass.fail(self.mutation_error(Operation::Create, name, e));
            }
        }
    }

    /// Re-fetch the live object, overwrite its comparable fields and update it.
    pub async fn patch(&self, name: &str, desired: &K, reason: PatchReason, pass: &mut Pass) {
        info!(kind = %K::KIND, name, namespace = %self.namespace, ?reason, "patching");
        pass.invalidate(K::KIND);
        let action = Action::Patch { reason };
        if pass.dry_run() {
            pass.record(self.change(name, action, false));
            return;
        }
        let applied = self
            .refetch_and_replace(name, pass, |fresh| K::overwrite(fresh, desired))
            .await;
        pass.record(self.change(name, action, applied));
    }

    async fn scale(&self, name: &str, from: Option<i32>, to: i32, pass: &mut Pass) {
        info!(kind = %K::KIND, name, namespace = %self.namespace, ?from, to, "scaling");
        let action = Action::Scale { from, to };
        if pass.dry_run() {
            pass.record(self.change(name, action, false));
            return;
        }
        let applied = self
            .refetch_and_replace(name, pass, |fresh| fresh.set_replicas(Some(to)))
            .await;
        pass.record(self.change(name, action, applied));
    }

    async fn refetch_and_replace<F>(&self, name: &str, pass: &mut Pass, edit: F) -> bool
    where
        F: FnOnce(&mut K) + Send,
    {
        let Some(mut fresh) = self.refetch(name, pass).await else {
            return false;
        };
        edit(&mut fresh);
        self.replace(name, &fresh, pass).await
    }

    async fn refetch(&self, name: &str, pass: &mut Pass) -> Option<K> {
        match self.cluster.get(&self.namespace, name).await {
            Ok(fresh) => Some(fresh),
            Err(e) => {
                error!(kind = %K::KIND, name, error = %e, "re-fetch before update failed");
                pass.fail(self.mutation_error(Operation::Get, name, e));
                None
            }
        }
    }

    async fn replace(&self, name: &str, fresh: &K, pass: &mut Pass) -> bool {
        match self.cluster.replace(&self.namespace, fresh).await {
            Ok(_) => true,
            Err(e) => {
                error!(kind = %K::KIND, name, error = %e, "update failed");
                pass.fail(self.mutation_error(Operation::Update, name, e));
                false
            }
        }
    }

    async fn delete(&self, name: &str, pass: &mut Pass) {
        info!(kind = %K::KIND, name, namespace = %self.namespace, "deleting");
        if pass.dry_run() {
            pass.record(self.change(name, Action::Delete, false));
            return;
        }
        match self.cluster.delete::<K>(&self.namespace, name).await {
            Ok(()) => pass.record(self.change(name, Action::Delete, true)),
            Err(e) => {
                error!(kind = %K::KIND, name, error = %e, "delete failed");
                pass.record(self.change(name, Action::Delete, false));
                pass.fail(self.mutation_error(Operation::Delete, name, e));
            }
        }
    }

    async fn release(&self, name: &str, live: &K, pass: &mut Pass) {
        let mut released = live.clone();
        if !released.release(&self.namespace) {
            self.delete(name, pass).await;
            return;
        }
        if released.project() == live.project() {
            debug!(kind = %K::KIND, name, "binding holds only foreign subjects");
            return;
        }
        info!(kind = %K::KIND, name, namespace = %self.namespace, "releasing subjects");
        if pass.dry_run() {
            pass.record(self.change(name, Action::Release, false));
            return;
        }
        let Some(mut fresh) = self.refetch(name, pass).await else {
            pass.record(self.change(name, Action::Release, false));
            return;
        };
        if !fresh.release(&self.namespace) {
            debug!(kind = %K::KIND, name, "foreign subjects gone since the index was built");
            self.delete(name, pass).await;
            return;
        }
        let applied = self.replace(name, &fresh, pass).await;
        pass.record(self.change(name, Action::Release, applied));
    }
}

#[async_trait]
impl<K: ManagedKind, C: ClusterApi> UpdateComponent for KindReconciler<K, C> {
    fn kind(&self) -> Kind {
        K::KIND
    }

    async fn build_new_and_old(&mut self) -> Result<()> {
        self.old.clear();
        self.new.clear();

        let live: Vec<K> = self
            .cluster
            .list(&self.namespace, self.selector.as_str())
            .await
            .map_err(|source| Error::Build {
                kind: K::KIND,
                namespace: self.namespace.clone(),
                source,
            })?;
        for object in live {
            self.old.insert(object.name_any(), object);
        }

        for object in &self.desired {
            let name = object.name_any();
            if name.is_empty() {
                warn!(kind = %K::KIND, "desired object has no name, ignoring");
                continue;
            }
            if !self.selector.matches(object.labels()) {
                debug!(
                    kind = %K::KIND,
                    name,
                    selector = %self.selector,
                    "not owned by this session"
                );
                continue;
            }
            let mut object = object.clone().normalize();
            if K::KIND.is_namespaced() {
                object.meta_mut().namespace = Some(self.namespace.clone());
            }
            self.new.insert(name, object);
        }

        debug!(
            kind = %K::KIND,
            namespace = %self.namespace,
            old = self.old.len(),
            new = self.new.len(),
            "built index"
        );
        Ok(())
    }

    async fn add(&mut self, pass: &mut Pass) {
        let policy = K::KIND.policy();
        for (name, desired) in &self.new {
            let Some(live) = self.old.get(name) else {
                self.create(name, desired, pass).await;
                continue;
            };

            let drifted = live.project() != K::target(live, desired);
            match policy.patch {
                PatchMode::Never => {
                    if drifted {
                        debug!(kind = %K::KIND, name = %name, "drift ignored, never patched");
                    }
                }
                PatchMode::WarnOnly => {
                    if drifted {
                        warn!(
                            kind = %K::KIND,
                            name = %name,
                            live = ?live.project(),
                            desired = ?desired.project(),
                            "change cannot be applied safely, leaving object untouched"
                        );
                        let reason = "change not supported by the server".to_string();
                        pass.record(self.change(name, Action::Skipped { reason }, false));
                    }
                }
                PatchMode::OnDiff => {
                    if drifted {
                        self.patch(name, desired, PatchReason::Drift, pass).await;
                    } else if pass.is_invalidated(K::KIND) {
                        self.patch(name, desired, PatchReason::Cascade, pass).await;
                    } else if let Some(to) =
                        desired.replicas().filter(|r| Some(*r) != live.replicas())
                    {
                        self.scale(name, live.replicas(), to, pass).await;
                    } else {
                        debug!(kind = %K::KIND, name = %name, "unchanged");
                    }
                }
            }
        }
    }

    async fn remove(&mut self, pass: &mut Pass) {
        let policy = K::KIND.policy();
        for (name, live) in &self.old {
            if self.new.contains_key(name) {
                continue;
            }
            match policy.remove {
                RemoveMode::Never => {
                    debug!(kind = %K::KIND, name = %name, "orphan kept, kind is never removed");
                }
                RemoveMode::Delete => self.delete(name, pass).await,
                RemoveMode::ReleaseSubjects => self.release(name, live, pass).await,
            }
        }
    }
}

/// Labels the target namespace carries
#[derive(Debug, Clone, Default)]
pub struct NamespaceLabels {
    /// Applied only when the namespace is created
    pub on_create: BTreeMap<String, String>,
    /// Added or corrected on every pass
    pub maintained: BTreeMap<String, String>,
}

/// Ensures the target namespace exists with its version label
pub struct NamespaceReconciler<C: ClusterApi> {
    cluster: Arc<C>,
    namespace: String,
    labels: NamespaceLabels,
    live: Option<Namespace>,
}

impl<C: ClusterApi> NamespaceReconciler<C> {
    pub fn new(cluster: Arc<C>, namespace: &str, labels: NamespaceLabels) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            labels,
            live: None,
        }
    }

    fn desired(&self, labels: BTreeMap<String, String>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn change(&self, action: Action, applied: bool) -> Change {
        Change {
            kind: Kind::Namespace,
            name: self.namespace.clone(),
            namespace: None,
            action,
            applied,
        }
    }
}

#[async_trait]
impl<C: ClusterApi> UpdateComponent for NamespaceReconciler<C> {
    fn kind(&self) -> Kind {
        Kind::Namespace
    }

    async fn build_new_and_old(&mut self) -> Result<()> {
        self.live = match self.cluster.get::<Namespace>("", &self.namespace).await {
            Ok(live) => Some(live),
            Err(e) if e.is_not_found() => None,
            Err(source) => {
                return Err(Error::Build {
                    kind: Kind::Namespace,
                    namespace: self.namespace.clone(),
                    source,
                })
            }
        };
        Ok(())
    }

    async fn add(&mut self, pass: &mut Pass) {
        let Some(live) = &self.live else {
            let mut labels = self.labels.on_create.clone();
            labels.extend(self.labels.maintained.clone());
            info!(namespace = %self.namespace, "creating namespace");
            pass.invalidate(Kind::Namespace);
            if pass.dry_run() {
                pass.record(self.change(Action::Create, false));
                return;
            }
            let desired = self.desired(labels);
            match self.cluster.create("", &desired).await {
                Ok(_) => pass.record(self.change(Action::Create, true)),
                Err(e) => {
                    error!(namespace = %self.namespace, error = %e, "namespace create failed");
                    pass.record(self.change(Action::Create, false));
                    pass.fail(Error::mutation(
                        Operation::Create,
                        Kind::Namespace,
                        &self.namespace,
                        &self.namespace,
                        e,
                    ));
                }
            }
            return;
        };

        let desired = self.desired(self.labels.maintained.clone());
        if live.project() == Namespace::target(live, &desired) {
            debug!(namespace = %self.namespace, "namespace labels up to date");
            return;
        }

        info!(namespace = %self.namespace, "updating namespace labels");
        pass.invalidate(Kind::Namespace);
        let action = Action::Patch {
            reason: PatchReason::Drift,
        };
        if pass.dry_run() {
            pass.record(self.change(action, false));
            return;
        }
        let result = match self.cluster.get::<Namespace>("", &self.namespace).await {
            Ok(mut fresh) => {
                Namespace::overwrite(&mut fresh, &desired);
                self.cluster
                    .replace("", &fresh)
                    .await
                    .map_err(|e| (Operation::Update, e))
            }
            Err(e) => Err((Operation::Get, e)),
        };
        match result {
            Ok(_) => pass.record(self.change(action, true)),
            Err((operation, e)) => {
                error!(namespace = %self.namespace, error = %e, "namespace {operation} failed");
                pass.record(self.change(action, false));
                pass.fail(Error::mutation(
                    operation,
                    Kind::Namespace,
                    &self.namespace,
                    &self.namespace,
                    e,
                ));
            }
        }
    }

    async fn remove(&mut self, _pass: &mut Pass) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim};
    use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};

    fn config_map(name: &str, app: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    fn reconciler(
        cluster: &Arc<MemoryCluster>,
        desired: Vec<ConfigMap>,
    ) -> KindReconciler<ConfigMap, MemoryCluster> {
        KindReconciler::new(
            Arc::clone(cluster),
            "tenant",
            LabelSelector::parse("app=hub").unwrap(),
            desired,
        )
    }

    #[tokio::test]
    async fn test_index_drops_unowned_desired_objects() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster
            .insert("tenant", config_map("live", "hub", "v1"))
            .await
            .unwrap();
        cluster
            .insert("tenant", config_map("foreign", "other", "v1"))
            .await
            .unwrap();

        let mut r = reconciler(
            &cluster,
            vec![config_map("mine", "hub", "v1"), config_map("theirs", "other", "v1")],
        );
        r.build_new_and_old().await.unwrap();
        assert_eq!(r.old().keys().collect::<Vec<_>>(), vec!["live"]);
        assert_eq!(r.new_objects().keys().collect::<Vec<_>>(), vec!["mine"]);
        assert_eq!(
            r.new_objects()["mine"].metadata.namespace.as_deref(),
            Some("tenant")
        );
    }

    #[tokio::test]
    async fn test_rebuild_replaces_index() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut r = reconciler(&cluster, vec![config_map("mine", "hub", "v1")]);
        r.build_new_and_old().await.unwrap();
        assert!(r.old().is_empty());

        let mut pass = Pass::new(false, false);
        r.add(&mut pass).await;
        r.build_new_and_old().await.unwrap();
        assert_eq!(r.old().len(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_is_annotated() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_on(Operation::List, Kind::ConfigMap, "").await;
        let mut r = reconciler(&cluster, vec![]);
        let err = r.build_new_and_old().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Build { kind: Kind::ConfigMap, ref namespace, .. } if namespace == "tenant"
        ));
    }

    #[tokio::test]
    async fn test_mutation_failure_is_collected() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_on(Operation::Create, Kind::ConfigMap, "a").await;
        let mut r = reconciler(
            &cluster,
            vec![config_map("a", "hub", "v1"), config_map("b", "hub", "v1")],
        );
        r.build_new_and_old().await.unwrap();
        let mut pass = Pass::new(false, false);
        r.add(&mut pass).await;

        let report = pass.finish();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.applied().count(), 1);
        assert!(cluster.peek::<ConfigMap>("tenant", "b").await.is_some());
    }

    #[tokio::test]
    async fn test_claims_survive_removal() {
        let cluster = Arc::new(MemoryCluster::new());
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "hub".to_string())])),
                ..Default::default()
            },
            ..Default::default()
        };
        cluster.insert("tenant", claim).await.unwrap();

        let mut r: KindReconciler<PersistentVolumeClaim, _> = KindReconciler::new(
            Arc::clone(&cluster),
            "tenant",
            LabelSelector::parse("app=hub").unwrap(),
            vec![],
        );
        r.build_new_and_old().await.unwrap();
        let mut pass = Pass::new(false, false);
        r.remove(&mut pass).await;
        assert!(pass.changes().is_empty());
        assert!(cluster.mutations().await.is_empty());
    }

    fn cluster_binding(namespaces: &[&str]) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("hub-admin".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "hub".to_string())])),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "hub-admin".to_string(),
            },
            subjects: Some(
                namespaces
                    .iter()
                    .map(|ns| Subject {
                        kind: "ServiceAccount".to_string(),
                        name: "hub".to_string(),
                        namespace: Some(ns.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn test_binding_deleted_when_foreign_subjects_vanish() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster
            .insert("", cluster_binding(&["tenant", "other"]))
            .await
            .unwrap();
        let mut r: KindReconciler<ClusterRoleBinding, _> = KindReconciler::new(
            Arc::clone(&cluster),
            "tenant",
            LabelSelector::parse("app=hub").unwrap(),
            vec![],
        );
        r.build_new_and_old().await.unwrap();

        // Another session released its subjects after our index was built.
        cluster.insert("", cluster_binding(&["tenant"])).await.unwrap();
        let mut pass = Pass::new(false, false);
        r.remove(&mut pass).await;

        let report = pass.finish();
        assert!(report.is_success());
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].action, Action::Delete);
        let mutations: Vec<_> = cluster
            .mutations()
            .await
            .into_iter()
            .map(|c| c.operation)
            .collect();
        assert_eq!(mutations, vec![Operation::Delete]);
        assert!(cluster
            .peek::<ClusterRoleBinding>("", "hub-admin")
            .await
            .is_none());
    }

    fn namespace_labels() -> NamespaceLabels {
        NamespaceLabels {
            on_create: BTreeMap::from([("owner".to_string(), "crdupdater".to_string())]),
            maintained: BTreeMap::from([(
                "synopsys.com/blackduck.alpha".to_string(),
                "2024.1.0".to_string(),
            )]),
        }
    }

    #[tokio::test]
    async fn test_namespace_created_with_labels() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut r = NamespaceReconciler::new(Arc::clone(&cluster), "tenant", namespace_labels());
        r.build_new_and_old().await.unwrap();
        let mut pass = Pass::new(false, false);
        r.add(&mut pass).await;

        let ns = cluster.peek::<Namespace>("", "tenant").await.unwrap();
        let labels = ns.labels();
        assert_eq!(labels["owner"], "crdupdater");
        assert_eq!(labels["synopsys.com/blackduck.alpha"], "2024.1.0");
    }

    #[tokio::test]
    async fn test_existing_namespace_only_gets_version_label() {
        let cluster = Arc::new(MemoryCluster::new());
        let existing = Namespace {
            metadata: ObjectMeta {
                name: Some("tenant".to_string()),
                labels: Some(BTreeMap::from([("team".to_string(), "a".to_string())])),
                ..Default::default()
            },
            ..Default::default()
        };
        cluster.insert("", existing).await.unwrap();

        let mut r = NamespaceReconciler::new(Arc::clone(&cluster), "tenant", namespace_labels());
        r.build_new_and_old().await.unwrap();
        let mut pass = Pass::new(false, false);
        r.add(&mut pass).await;

        let ns = cluster.peek::<Namespace>("", "tenant").await.unwrap();
        let labels = ns.labels();
        assert_eq!(labels["team"], "a");
        assert!(!labels.contains_key("owner"));
        assert_eq!(labels["synopsys.com/blackduck.alpha"], "2024.1.0");

        cluster.clear_calls().await;
        r.build_new_and_old().await.unwrap();
        let mut pass = Pass::new(false, false);
        r.add(&mut pass).await;
        r.remove(&mut pass).await;
        assert!(cluster.mutations().await.is_empty());
    }
}
