//! crdupdater
//!
//! Reconciles a namespace against a bundle of Kubernetes manifests in one
//! pass and prints the resulting report as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Preview what would change
//! crdupdater --namespace tenant --selector app=blackduck,name=alpha --file bundle.yaml --dry-run
//!
//! # Apply, with debug logging
//! RUST_LOG=debug crdupdater --namespace tenant --selector app=blackduck --file bundle.yaml
//!
//! # Session settings from a file, flags take precedence
//! crdupdater --config session.yaml --file bundle.yaml --force-patch
//! ```

use anyhow::Context;
use clap::Parser;
use crdupdater::{ComponentList, KubeCluster, Session, UpdaterConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Declarative multi-kind reconciler
#[derive(Parser, Debug)]
#[command(name = "crdupdater")]
#[command(about = "Converge a namespace toward a bundle of Kubernetes manifests")]
struct Args {
    /// YAML session settings; flags given on the command line override them
    #[arg(long)]
    config: Option<PathBuf>,

    /// Namespace to reconcile into
    #[arg(long)]
    namespace: Option<String>,

    /// Ownership label selector
    #[arg(long)]
    selector: Option<String>,

    /// Multi-document YAML manifests of the desired objects
    #[arg(long)]
    file: PathBuf,

    /// Report decisions without mutating the cluster
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Patch dependent workloads even when unchanged
    #[arg(long, default_value = "false")]
    force_patch: bool,

    /// Application version recorded on the namespace
    #[arg(long)]
    version: Option<String>,

    /// Reconcile cluster roles, cluster role bindings and definitions
    #[arg(long, default_value = "false")]
    cluster_level_permissions: bool,

    /// Reconcile OpenShift routes
    #[arg(long, default_value = "false")]
    routes_enabled: bool,
}

impl Args {
    fn config(&self) -> anyhow::Result<UpdaterConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                UpdaterConfig::from_yaml(&raw)?
            }
            None => UpdaterConfig::new(self.namespace.clone().unwrap_or_default(), ""),
        };
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(selector) = &self.selector {
            config.label_selector = selector.clone();
        }
        if self.version.is_some() {
            config.version = self.version.clone();
        }
        config.dry_run |= self.dry_run;
        config.force_patch |= self.force_patch;
        config.cluster_level_permissions |= self.cluster_level_permissions;
        config.routes_enabled |= self.routes_enabled;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.config()?;

    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let components = ComponentList::from_yaml(&raw)?;
    info!(
        namespace = %config.namespace,
        objects = components.len(),
        dry_run = config.dry_run,
        "loaded desired objects"
    );

    let cluster = Arc::new(KubeCluster::try_default().await?);
    info!("Connected to Kubernetes API server");

    let mut session = Session::new(cluster, config)?;
    let report = session.crud_components(components).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(e) = report.into_result() {
        error!(error = %e, "reconciliation failed");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let path = std::env::temp_dir().join(format!("crdupdater-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "namespace: tenant\nlabelSelector: app=hub\nroutesEnabled: true\nmanagerName: ops\n",
        )
        .unwrap();

        let args = Args::try_parse_from([
            "crdupdater",
            "--config",
            path.to_str().unwrap(),
            "--selector",
            "app=hub,name=alpha",
            "--file",
            "bundle.yaml",
            "--dry-run",
        ])
        .unwrap();
        let config = args.config().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.namespace, "tenant");
        assert_eq!(config.label_selector, "app=hub,name=alpha");
        assert_eq!(config.manager_name, "ops");
        assert!(config.routes_enabled);
        assert!(config.dry_run);
        assert!(!config.force_patch);
    }

    #[test]
    fn test_namespace_required_without_config_file() {
        let args = Args::try_parse_from(["crdupdater", "--file", "bundle.yaml"]).unwrap();
        assert!(args.config().is_err());

        let args = Args::try_parse_from([
            "crdupdater",
            "--namespace",
            "tenant",
            "--file",
            "bundle.yaml",
        ])
        .unwrap();
        let config = args.config().unwrap();
        assert_eq!(config, UpdaterConfig::new("tenant", ""));
    }
}
