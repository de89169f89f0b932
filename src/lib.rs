//! Declarative multi-kind reconciler
//!
//! Drives the objects of one namespace toward a caller-supplied desired set,
//! touching only objects that carry the session's ownership labels and only
//! when their comparable fields actually differ.
//!
//! ## Pipeline
//!
//! A pass runs one stage per kind, in dependency order: namespace, custom
//! resource definitions, service accounts, cluster roles and bindings, roles
//! and bindings, config maps, secrets, volume claims, services, replication
//! controllers, deployments, routes. Each stage lists the live objects
//! matching the selector, indexes them against the owned desired objects,
//! creates or patches, then removes orphans.
//!
//! ## Example
//!
//! ```no_run
//! use crdupdater::{ComponentList, KubeCluster, Session, UpdaterConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cluster = Arc::new(KubeCluster::try_default().await?);
//! let config = UpdaterConfig::new("tenant", "app=blackduck,name=alpha");
//! let mut session = Session::new(cluster, config)?;
//! let components = ComponentList::from_yaml(&std::fs::read_to_string("bundle.yaml")?)?;
//! let report = session.crud_components(components).await.into_result()?;
//! println!("{} changes", report.changes.len());
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod cluster;
pub mod compare;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod kinds;
pub mod reconciler;
pub mod report;
pub mod selector;
pub mod session;
pub mod updater;

pub use bundle::ComponentList;
pub use cluster::{ClusterApi, KubeCluster, MemoryCluster};
pub use config::UpdaterConfig;
pub use controllers::{ControllerHandles, ControllerHook, ControllerRegistry};
pub use crd::{Route, RouteSpec};
pub use error::{ClientError, Error, Operation, Result};
pub use kinds::{Kind, KindPolicy, ManagedKind, PatchMode, RemoveMode, Scope};
pub use reconciler::{KindReconciler, NamespaceLabels, NamespaceReconciler, UpdateComponent};
pub use report::{Action, Change, Pass, PatchReason, Report};
pub use selector::LabelSelector;
pub use session::Session;
pub use updater::Updater;
