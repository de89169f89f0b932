//! Custom resource definitions and the custom kinds the reconciler manages
//!
//! A definition compares by scope only, and a difference is never patched:
//! changing the scope of a live definition would orphan every stored resource.

use super::{Kind, ManagedKind};
use crate::crd::Route;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};

impl ManagedKind for CustomResourceDefinition {
    const KIND: Kind = Kind::CustomResourceDefinition;

    type Projection = String;

    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }

    fn project(&self) -> Self::Projection {
        self.spec.scope.clone()
    }

    fn overwrite(_fresh: &mut Self, _desired: &Self) {}
}

impl ManagedKind for Route {
    const KIND: Kind = Kind::Route;

    type Projection = ();

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {}

    fn overwrite(_fresh: &mut Self, _desired: &Self) {}
}
