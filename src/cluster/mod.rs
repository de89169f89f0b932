//! Remote cluster access
//!
//! The reconciler only ever needs five calls per kind. They are collected in
//! [`ClusterApi`] so a pass can run against a live API server
//! ([`KubeCluster`]) or against the in-process store ([`MemoryCluster`]).

mod memory;

pub use memory::{Call, MemoryCluster};

use crate::error::ClientError;
use crate::kinds::ManagedKind;
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Result of a single remote call
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Per-kind remote contract. Cluster-scoped kinds ignore `namespace`.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// Objects of `K` in `namespace` whose labels satisfy `selector`
    async fn list<K: ManagedKind>(&self, namespace: &str, selector: &str) -> ClientResult<Vec<K>>;

    async fn get<K: ManagedKind>(&self, namespace: &str, name: &str) -> ClientResult<K>;

    async fn create<K: ManagedKind>(&self, namespace: &str, object: &K) -> ClientResult<K>;

    /// Full update of an existing object
    async fn replace<K: ManagedKind>(&self, namespace: &str, object: &K) -> ClientResult<K>;

    async fn delete<K: ManagedKind>(&self, namespace: &str, name: &str) -> ClientResult<()>;
}

/// [`ClusterApi`] backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> ClientResult<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list<K: ManagedKind>(&self, namespace: &str, selector: &str) -> ClientResult<Vec<K>> {
        let api = K::api(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let list = api.list(&params).await?;
        debug!(kind = %K::KIND, namespace, count = list.items.len(), "listed live objects");
        Ok(list.items)
    }

    async fn get<K: ManagedKind>(&self, namespace: &str, name: &str) -> ClientResult<K> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn create<K: ManagedKind>(&self, namespace: &str, object: &K) -> ClientResult<K> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace<K: ManagedKind>(&self, namespace: &str, object: &K) -> ClientResult<K> {
        let api = K::api(self.client.clone(), namespace);
        let name = object.name_any();
        Ok(api.replace(&name, &PostParams::default(), object).await?)
    }

    async fn delete<K: ManagedKind>(&self, namespace: &str, name: &str) -> ClientResult<()> {
        let api = K::api(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
