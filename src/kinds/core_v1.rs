//! Core `v1` kinds: namespaces, service accounts, config maps, secrets,
//! persistent volume claims and services.

use super::{Kind, ManagedKind};
use crate::compare::{canonical_quantity, sort_ports, PortProjection};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service, ServiceAccount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::ByteString;
use kube::{Api, Client};
use std::collections::BTreeMap;

impl ManagedKind for Namespace {
    const KIND: Kind = Kind::Namespace;

    type Projection = BTreeMap<String, String>;

    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }

    fn project(&self) -> Self::Projection {
        self.metadata.labels.clone().unwrap_or_default()
    }

    /// Labels are only ever added or corrected, never removed.
    fn target(live: &Self, desired: &Self) -> Self::Projection {
        let mut labels = live.project();
        labels.extend(desired.project());
        labels
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        let target = Self::target(fresh, desired);
        fresh.metadata.labels = Some(target);
    }
}

impl ManagedKind for ServiceAccount {
    const KIND: Kind = Kind::ServiceAccount;

    type Projection = ();

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {}

    fn overwrite(_fresh: &mut Self, _desired: &Self) {}
}

impl ManagedKind for ConfigMap {
    const KIND: Kind = Kind::ConfigMap;

    type Projection = (BTreeMap<String, String>, BTreeMap<String, ByteString>);

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        (
            self.data.clone().unwrap_or_default(),
            self.binary_data.clone().unwrap_or_default(),
        )
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        fresh.data = desired.data.clone();
        fresh.binary_data = desired.binary_data.clone();
    }
}

impl ManagedKind for Secret {
    const KIND: Kind = Kind::Secret;

    type Projection = BTreeMap<String, ByteString>;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        let mut data = self.data.clone().unwrap_or_default();
        for (key, value) in self.string_data.iter().flatten() {
            data.insert(key.clone(), ByteString(value.clone().into_bytes()));
        }
        data
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        fresh.data = Some(desired.project());
        fresh.string_data = None;
    }

    /// The server folds `stringData` into `data` and never returns it.
    fn normalize(mut self) -> Self {
        if self.string_data.is_some() {
            self.data = Some(self.project());
            self.string_data = None;
        }
        self
    }
}

/// Claim fields a patch may change
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimProjection {
    pub storage_class_name: Option<String>,
    pub access_modes: Vec<String>,
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

fn canonical_map(list: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    list.into_iter()
        .flatten()
        .map(|(k, v)| (k.clone(), canonical_quantity(v)))
        .collect()
}

impl ManagedKind for PersistentVolumeClaim {
    const KIND: Kind = Kind::PersistentVolumeClaim;

    type Projection = ClaimProjection;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        let spec = self.spec.as_ref();
        let resources = spec.and_then(|s| s.resources.as_ref());
        let mut access_modes = spec
            .and_then(|s| s.access_modes.clone())
            .unwrap_or_default();
        access_modes.sort();
        ClaimProjection {
            storage_class_name: spec.and_then(|s| s.storage_class_name.clone()),
            access_modes,
            requests: canonical_map(resources.and_then(|r| r.requests.as_ref())),
            limits: canonical_map(resources.and_then(|r| r.limits.as_ref())),
        }
    }

    /// An unset storage class means "cluster default", which the server
    /// resolves on create; the resolved live value is kept.
    fn target(live: &Self, desired: &Self) -> Self::Projection {
        let mut target = desired.project();
        if target.storage_class_name.is_none() {
            target.storage_class_name = live.project().storage_class_name;
        }
        target
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        let Some(desired_spec) = desired.spec.as_ref() else {
            return;
        };
        let spec = fresh.spec.get_or_insert_with(Default::default);
        if desired_spec.storage_class_name.is_some() {
            spec.storage_class_name = desired_spec.storage_class_name.clone();
        }
        spec.access_modes = desired_spec.access_modes.clone();
        spec.resources = desired_spec.resources.clone();
    }
}

/// Service fields a patch may change
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceProjection {
    pub ports: Vec<PortProjection>,
    pub selector: BTreeMap<String, String>,
    pub service_type: String,
}

impl ManagedKind for Service {
    const KIND: Kind = Kind::Service;

    type Projection = ServiceProjection;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        let spec = self.spec.as_ref();
        ServiceProjection {
            ports: sort_ports(spec.and_then(|s| s.ports.as_deref()).unwrap_or_default()),
            selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
            service_type: spec
                .and_then(|s| s.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string()),
        }
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        let desired_spec = desired.spec.clone().unwrap_or_default();
        let spec = fresh.spec.get_or_insert_with(Default::default);
        spec.ports = desired_spec.ports;
        spec.selector = desired_spec.selector;
        spec.type_ = desired_spec.type_;
    }
}
