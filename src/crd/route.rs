//! OpenShift Route
//!
//! Routes are not part of the upstream API types, so the subset of
//! `route.openshift.io/v1` the reconciler creates and deletes is declared here.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Route exposes a service at a host name
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    status = "RouteStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.to.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Public host name; generated by the router when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Path the router watches for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Backend the route points to
    pub to: RouteTargetReference,

    /// Additional weighted backends
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_backends: Vec<RouteTargetReference>,

    /// Target port on the backend service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,

    /// TLS termination settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Wildcard policy (None, Subdomain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard_policy: Option<String>,
}

/// Backend reference of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    /// Referenced kind, normally `Service`
    #[serde(default = "default_target_kind")]
    pub kind: String,
    /// Name of the referenced object
    pub name: String,
    /// Relative weight among backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

/// Service port a route forwards to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: IntOrString,
}

/// TLS termination of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// edge, passthrough or reencrypt
    pub termination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ca_certificate: Option<String>,
}

/// Observed state of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    /// Routers that admitted the route
    #[serde(default)]
    pub ingress: Vec<RouteIngress>,
}

/// Admission of a route by one router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub router_name: Option<String>,
    #[serde(default)]
    pub wildcard_policy: Option<String>,
}

fn default_target_kind() -> String {
    "Service".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_route_type_meta() {
        assert_eq!(Route::group(&()), "route.openshift.io");
        assert_eq!(Route::version(&()), "v1");
        assert_eq!(Route::kind(&()), "Route");
        assert_eq!(Route::plural(&()), "routes");
    }

    #[test]
    fn test_route_spec_defaults() {
        let spec: RouteSpec = serde_json::from_str(r#"{"to":{"name":"web"}}"#).unwrap();
        assert_eq!(spec.to.kind, "Service");
        assert_eq!(spec.to.name, "web");
        assert!(spec.tls.is_none());
    }
}
