//! Session configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Settings of one reconciliation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterConfig {
    /// Namespace the desired objects are reconciled into
    pub namespace: String,

    /// Ownership selector scoping every list call and the desired set
    #[serde(default)]
    pub label_selector: String,

    /// Compute and report decisions without mutating the cluster
    #[serde(default)]
    pub dry_run: bool,

    /// Patch every dependent kind even when its own fields are unchanged
    #[serde(default)]
    pub force_patch: bool,

    /// Application version recorded on the namespace
    #[serde(default)]
    pub version: Option<String>,

    /// Reconcile cluster roles, cluster role bindings and definitions
    #[serde(default)]
    pub cluster_level_permissions: bool,

    /// Reconcile OpenShift routes
    #[serde(default)]
    pub routes_enabled: bool,

    /// Value of the `owner` label put on created namespaces
    #[serde(default = "default_manager_name")]
    pub manager_name: String,

    /// Prefix of the namespace version label
    #[serde(default = "default_label_domain")]
    pub label_domain: String,
}

fn default_manager_name() -> String {
    "crdupdater".to_string()
}

fn default_label_domain() -> String {
    "synopsys.com".to_string()
}

impl UpdaterConfig {
    pub fn new(namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
            dry_run: false,
            force_patch: false,
            version: None,
            cluster_level_permissions: false,
            routes_enabled: false,
            manager_name: default_manager_name(),
            label_domain: default_label_domain(),
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::Configuration("namespace must not be empty".to_string()));
        }
        if self.manager_name.trim().is_empty() {
            return Err(Error::Configuration(
                "manager name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
