//! Custom resource types the reconciler manages
//!
//! - Route: OpenShift `route.openshift.io/v1` ingress object

mod route;

pub use route::{
    Route, RouteIngress, RoutePort, RouteSpec, RouteStatus, RouteTargetReference, TlsConfig,
};
