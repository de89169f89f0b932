//! Desired object bundle
//!
//! [`ComponentList`] groups the caller's desired objects by kind. It is
//! normally assembled in code, but can also be read from multi-document YAML
//! manifests.

use crate::crd::Route;
use crate::error::{Error, Result};
use crate::kinds::Kind;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolumeClaim, ReplicationController, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde::Deserialize;
use tracing::debug;

/// Desired objects of one session, grouped by kind
#[derive(Debug, Clone, Default)]
pub struct ComponentList {
    pub service_accounts: Vec<ServiceAccount>,
    pub cluster_roles: Vec<ClusterRole>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub roles: Vec<Role>,
    pub role_bindings: Vec<RoleBinding>,
    pub config_maps: Vec<ConfigMap>,
    pub secrets: Vec<Secret>,
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
    pub services: Vec<Service>,
    pub replication_controllers: Vec<ReplicationController>,
    pub deployments: Vec<Deployment>,
    pub routes: Vec<Route>,
    pub custom_resource_definitions: Vec<CustomResourceDefinition>,
}

impl ComponentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `---` separated manifests. Empty documents are skipped; a
    /// document of any kind the reconciler does not manage is an error.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut list = Self::new();
        for (index, document) in serde_yaml::Deserializer::from_str(raw).enumerate() {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let kind = value
                .get("kind")
                .and_then(serde_yaml::Value::as_str)
                .ok_or_else(|| Error::Bundle(format!("document {index} has no kind")))?
                .to_string();
            let known = list
                .push(&kind, value)
                .map_err(|e| Error::Bundle(format!("document {index} ({kind}): {e}")))?;
            if !known {
                return Err(Error::Bundle(format!(
                    "document {index} has unsupported kind {kind}"
                )));
            }
        }
        debug!(objects = list.len(), "loaded bundle");
        Ok(list)
    }

    /// Decode `value` into the group of `kind`; false if the kind is not managed
    fn push(&mut self, kind: &str, value: serde_yaml::Value) -> serde_yaml::Result<bool> {
        match kind {
            "ServiceAccount" => self.service_accounts.push(serde_yaml::from_value(value)?),
            "ClusterRole" => self.cluster_roles.push(serde_yaml::from_value(value)?),
            "ClusterRoleBinding" => self.cluster_role_bindings.push(serde_yaml::from_value(value)?),
            "Role" => self.roles.push(serde_yaml::from_value(value)?),
            "RoleBinding" => self.role_bindings.push(serde_yaml::from_value(value)?),
            "ConfigMap" => self.config_maps.push(serde_yaml::from_value(value)?),
            "Secret" => self.secrets.push(serde_yaml::from_value(value)?),
            "PersistentVolumeClaim" => {
                self.persistent_volume_claims.push(serde_yaml::from_value(value)?)
            }
            "Service" => self.services.push(serde_yaml::from_value(value)?),
            "ReplicationController" => {
                self.replication_controllers.push(serde_yaml::from_value(value)?)
            }
            "Deployment" => self.deployments.push(serde_yaml::from_value(value)?),
            "Route" => self.routes.push(serde_yaml::from_value(value)?),
            "CustomResourceDefinition" => {
                self.custom_resource_definitions.push(serde_yaml::from_value(value)?)
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Number of desired objects of `kind`
    pub fn count(&self, kind: Kind) -> usize {
        match kind {
            Kind::Namespace => 0,
            Kind::ServiceAccount => self.service_accounts.len(),
            Kind::ClusterRole => self.cluster_roles.len(),
            Kind::ClusterRoleBinding => self.cluster_role_bindings.len(),
            Kind::Role => self.roles.len(),
            Kind::RoleBinding => self.role_bindings.len(),
            Kind::ConfigMap => self.config_maps.len(),
            Kind::Secret => self.secrets.len(),
            Kind::PersistentVolumeClaim => self.persistent_volume_claims.len(),
            Kind::Service => self.services.len(),
            Kind::ReplicationController => self.replication_controllers.len(),
            Kind::Deployment => self.deployments.len(),
            Kind::Route => self.routes.len(),
            Kind::CustomResourceDefinition => self.custom_resource_definitions.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.service_accounts.len()
            + self.cluster_roles.len()
            + self.cluster_role_bindings.len()
            + self.roles.len()
            + self.role_bindings.len()
            + self.config_maps.len()
            + self.secrets.len()
            + self.persistent_volume_claims.len()
            + self.services.len()
            + self.replication_controllers.len()
            + self.deployments.len()
            + self.routes.len()
            + self.custom_resource_definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFESTS: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-cfg
  labels:
    app: hub
data:
  k: v1
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
  selector:
    matchLabels:
      app: hub
  template:
    spec:
      containers:
        - name: web
          image: hub:1
---
apiVersion: route.openshift.io/v1
kind: Route
metadata:
  name: web
spec:
  to:
    name: web
---
"#;

    #[test]
    fn test_from_yaml_groups_by_kind() {
        let list = ComponentList::from_yaml(MANIFESTS).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.count(Kind::ConfigMap), 1);
        assert_eq!(list.count(Kind::Deployment), 1);
        assert_eq!(list.count(Kind::Route), 1);
        assert_eq!(list.config_maps[0].data.as_ref().unwrap()["k"], "v1");
        assert_eq!(list.routes[0].spec.to.kind, "Service");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = ComponentList::from_yaml("apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: j\n")
            .unwrap_err();
        assert!(matches!(err, Error::Bundle(ref msg) if msg.contains("Job")));
    }

    #[test]
    fn test_document_without_kind_is_rejected() {
        assert!(ComponentList::from_yaml("metadata:\n  name: x\n").is_err());
        assert!(ComponentList::from_yaml("").unwrap().is_empty());
    }
}
