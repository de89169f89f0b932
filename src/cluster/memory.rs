//! In-process object store
//!
//! Behaves like the subset of the API server the reconciler relies on: label
//! filtered lists, conflict on duplicate create, not-found on update or delete
//! of a missing object, and a monotonically increasing resource version. Every
//! call is recorded so a pass can be inspected afterwards.

use super::{ClientResult, ClusterApi};
use crate::error::{ClientError, Operation};
use crate::kinds::{Kind, ManagedKind};
use crate::selector::LabelSelector;
use async_trait::async_trait;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

type ObjectKey = (Kind, Option<String>, String);

/// One recorded call against the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    #[serde(serialize_with = "serialize_operation")]
    pub operation: Operation,
    pub kind: Kind,
    pub namespace: Option<String>,
    /// Object name, or the selector for list calls
    pub name: String,
}

fn serialize_operation<S: serde::Serializer>(op: &Operation, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(op)
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.operation,
            Operation::Create | Operation::Update | Operation::Delete
        )
    }
}

#[derive(Default)]
struct Store {
    objects: BTreeMap<ObjectKey, Value>,
    calls: Vec<Call>,
    failures: BTreeSet<(Operation, Kind, String)>,
    revision: u64,
}

impl Store {
    fn record(&mut self, operation: Operation, kind: Kind, namespace: Option<String>, name: &str) {
        self.calls.push(Call {
            operation,
            kind,
            namespace,
            name: name.to_string(),
        });
    }

    fn check_failure(&self, operation: Operation, kind: Kind, name: &str) -> ClientResult<()> {
        if self.failures.contains(&(operation, kind, name.to_string())) {
            return Err(ClientError::Rejected(format!(
                "injected {operation} failure for {kind} {name}"
            )));
        }
        Ok(())
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// [`ClusterApi`] over an in-memory map of serialized objects
#[derive(Default)]
pub struct MemoryCluster {
    store: Mutex<Store>,
}

fn scope<K: ManagedKind>(namespace: &str) -> Option<String> {
    K::KIND.is_namespaced().then(|| namespace.to_string())
}

fn key<K: ManagedKind>(namespace: &str, name: &str) -> ObjectKey {
    (K::KIND, scope::<K>(namespace), name.to_string())
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a call
    pub async fn insert<K: ManagedKind>(&self, namespace: &str, mut object: K) -> ClientResult<()> {
        let mut store = self.store.lock().await;
        object.meta_mut().namespace = scope::<K>(namespace);
        object.meta_mut().resource_version = Some(store.next_revision());
        let key = key::<K>(namespace, &object.name_any());
        store.objects.insert(key, serde_json::to_value(&object)?);
        Ok(())
    }

    /// Read an object without recording a call
    pub async fn peek<K: ManagedKind>(&self, namespace: &str, name: &str) -> Option<K> {
        let store = self.store.lock().await;
        store
            .objects
            .get(&key::<K>(namespace, name))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Make every future `operation` on the named object fail
    pub async fn fail_on(&self, operation: Operation, kind: Kind, name: &str) {
        let mut store = self.store.lock().await;
        store.failures.insert((operation, kind, name.to_string()));
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.store.lock().await.calls.clone()
    }

    /// Recorded create, update and delete calls
    pub async fn mutations(&self) -> Vec<Call> {
        self.store
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.store.lock().await.calls.clear();
    }

    /// Serialized form of every stored object
    pub async fn snapshot(&self) -> String {
        let store = self.store.lock().await;
        let objects: Vec<&Value> = store.objects.values().collect();
        serde_json::to_string(&objects).unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list<K: ManagedKind>(&self, namespace: &str, selector: &str) -> ClientResult<Vec<K>> {
        let selector =
            LabelSelector::parse(selector).map_err(|e| ClientError::Rejected(e.to_string()))?;
        let mut store = self.store.lock().await;
        store.record(Operation::List, K::KIND, scope::<K>(namespace), selector.as_str());
        store.check_failure(Operation::List, K::KIND, "")?;

        let wanted = scope::<K>(namespace);
        let mut items = Vec::new();
        for ((kind, ns, _), value) in &store.objects {
            if *kind != K::KIND || *ns != wanted {
                continue;
            }
            let object: K = serde_json::from_value(value.clone())?;
            if selector.matches(object.labels()) {
                items.push(object);
            }
        }
        Ok(items)
    }

    async fn get<K: ManagedKind>(&self, namespace: &str, name: &str) -> ClientResult<K> {
        let mut store = self.store.lock().await;
        store.record(Operation::Get, K::KIND, scope::<K>(namespace), name);
        store.check_failure(Operation::Get, K::KIND, name)?;
        let value = store
            .objects
            .get(&key::<K>(namespace, name))
            .ok_or_else(|| ClientError::NotFound {
                kind: K::KIND,
                name: name.to_string(),
            })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    async fn create<K: ManagedKind>(&self, namespace: &str, object: &K) -> ClientResult<K> {
        let name = object.name_any();
        let mut store = self.store.lock().await;
        store.record(Operation::Create, K::KIND, scope::<K>(namespace), &name);
        store.check_failure(Operation::Create, K::KIND, &name)?;
        let key = key::<K>(namespace, &name);
        if store.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                kind: K::KIND,
                name,
            });
        }
        let mut created = object.clone();
        created.meta_mut().namespace = scope::<K>(namespace);
        created.meta_mut().resource_version = Some(store.next_revision());
        store.objects.insert(key, serde_json::to_value(&created)?);
        Ok(created)
    }

    async fn replace<K: ManagedKind>(&self, namespace: &str, object: &K) -> ClientResult<K> {
        let name = object.name_any();
        let mut store = self.store.lock().await;
        store.record(Operation::Update, K::KIND, scope::<K>(namespace), &name);
        store.check_failure(Operation::Update, K::KIND, &name)?;
        let key = key::<K>(namespace, &name);
        if !store.objects.contains_key(&key) {
            return Err(ClientError::NotFound {
                kind: K::KIND,
                name,
            });
        }
        let mut updated = object.clone();
        updated.meta_mut().namespace = scope::<K>(namespace);
        updated.meta_mut().resource_version = Some(store.next_revision());
        store.objects.insert(key, serde_json::to_value(&updated)?);
        Ok(updated)
    }

    async fn delete<K: ManagedKind>(&self, namespace: &str, name: &str) -> ClientResult<()> {
        let mut store = self.store.lock().await;
        store.record(Operation::Delete, K::KIND, scope::<K>(namespace), name);
        store.check_failure(Operation::Delete, K::KIND, name)?;
        store
            .objects
            .remove(&key::<K>(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound {
                kind: K::KIND,
                name: name.to_string(),
            })
    }
}
