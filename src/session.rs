//! Reconciliation session
//!
//! The shared context of one pass: target namespace, parsed ownership
//! selector, flags, the cluster handle and the controllers to start once the
//! pass has succeeded.

use crate::bundle::ComponentList;
use crate::cluster::ClusterApi;
use crate::config::UpdaterConfig;
use crate::controllers::{ControllerHandles, ControllerHook, ControllerRegistry};
use crate::error::Result;
use crate::kinds::{Kind, ManagedKind};
use crate::reconciler::{KindReconciler, NamespaceLabels, NamespaceReconciler};
use crate::report::Report;
use crate::selector::LabelSelector;
use crate::updater::Updater;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared context of a reconciliation pass
pub struct Session<C: ClusterApi> {
    cluster: Arc<C>,
    config: UpdaterConfig,
    selector: LabelSelector,
    controllers: ControllerRegistry,
    running: Option<ControllerHandles>,
}

impl<C: ClusterApi> Session<C> {
    /// Fails if the configuration is invalid or the selector cannot be parsed.
    pub fn new(cluster: Arc<C>, config: UpdaterConfig) -> Result<Self> {
        config.validate()?;
        let selector = LabelSelector::parse(&config.label_selector)?;
        Ok(Self {
            cluster,
            config,
            selector,
            controllers: ControllerRegistry::new(),
            running: None,
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn selector(&self) -> &LabelSelector {
        &self.selector
    }

    pub fn cluster(&self) -> &Arc<C> {
        &self.cluster
    }

    /// Register a controller to start after the next successful pass
    pub fn add_controller(&mut self, name: impl Into<String>, hook: Box<dyn ControllerHook>) {
        self.controllers.add(name, hook);
    }

    /// Reconciler for one kind, scoped to this session
    pub fn kind_reconciler<K: ManagedKind>(&self, desired: Vec<K>) -> KindReconciler<K, C> {
        KindReconciler::new(
            Arc::clone(&self.cluster),
            &self.config.namespace,
            self.selector.clone(),
            desired,
        )
    }

    /// `owner` on creation, plus the version label when the selector pins
    /// both `app` and `name` and a version is configured.
    pub fn namespace_labels(&self) -> NamespaceLabels {
        let on_create = BTreeMap::from([("owner".to_string(), self.config.manager_name.clone())]);
        let mut maintained = BTreeMap::new();
        if let (Some(app), Some(name), Some(version)) = (
            self.selector.equality_value("app"),
            self.selector.equality_value("name"),
            self.config.version.as_deref(),
        ) {
            maintained.insert(
                format!("{}/{}.{}", self.config.label_domain, app, name),
                version.to_string(),
            );
        }
        NamespaceLabels {
            on_create,
            maintained,
        }
    }

    /// Empty updater carrying this session's flags
    pub fn updater(&self) -> Updater {
        Updater::new(self.config.dry_run, self.config.force_patch)
    }

    /// Assemble the full pipeline in dependency order
    pub fn build_updater(&self, components: ComponentList) -> Updater {
        let mut updater = self.updater();
        let cluster_scoped = |kind: Kind| {
            self.config.cluster_level_permissions || components.count(kind) > 0
        };
        let with_definitions = cluster_scoped(Kind::CustomResourceDefinition);
        let with_cluster_roles = cluster_scoped(Kind::ClusterRole);
        let with_cluster_role_bindings = cluster_scoped(Kind::ClusterRoleBinding);

        let ComponentList {
            service_accounts,
            cluster_roles,
            cluster_role_bindings,
            roles,
            role_bindings,
            config_maps,
            secrets,
            persistent_volume_claims,
            services,
            replication_controllers,
            deployments,
            routes,
            custom_resource_definitions,
        } = components;

        updater.add_updater(Box::new(NamespaceReconciler::new(
            Arc::clone(&self.cluster),
            &self.config.namespace,
            self.namespace_labels(),
        )));
        if with_definitions {
            updater.add_updater(Box::new(self.kind_reconciler(custom_resource_definitions)));
        }
        updater.add_updater(Box::new(self.kind_reconciler(service_accounts)));
        if with_cluster_roles {
            updater.add_updater(Box::new(self.kind_reconciler(cluster_roles)));
        }
        if with_cluster_role_bindings {
            updater.add_updater(Box::new(self.kind_reconciler(cluster_role_bindings)));
        }
        updater.add_updater(Box::new(self.kind_reconciler(roles)));
        updater.add_updater(Box::new(self.kind_reconciler(role_bindings)));
        updater.add_updater(Box::new(self.kind_reconciler(config_maps)));
        updater.add_updater(Box::new(self.kind_reconciler(secrets)));
        updater.add_updater(Box::new(self.kind_reconciler(persistent_volume_claims)));
        updater.add_updater(Box::new(self.kind_reconciler(services)));
        updater.add_updater(Box::new(self.kind_reconciler(replication_controllers)));
        updater.add_updater(Box::new(self.kind_reconciler(deployments)));
        if self.config.routes_enabled {
            updater.add_updater(Box::new(self.kind_reconciler(routes)));
        }
        updater
    }

    /// Reconcile `components` in one pass, then start the registered
    /// controllers if the pass succeeded and was not a dry run.
    pub async fn crud_components(&mut self, components: ComponentList) -> Report {
        info!(
            namespace = %self.config.namespace,
            selector = %self.selector,
            objects = components.len(),
            "reconciling components"
        );
        let report = self.build_updater(components).update().await;

        if !self.controllers.is_empty() {
            if self.config.dry_run {
                info!(controllers = ?self.controllers.names(), "dry run, controllers not started");
            } else if !report.is_success() {
                warn!(
                    controllers = ?self.controllers.names(),
                    "pass failed, controllers not started"
                );
            } else {
                self.running = Some(self.controllers.start());
            }
        }
        report
    }

    /// Controllers started by the last successful pass
    pub fn take_controllers(&mut self) -> Option<ControllerHandles> {
        self.running.take()
    }
}
