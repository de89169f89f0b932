//! Post-pass controller hooks
//!
//! Long-running watchers are registered on the session by name and started
//! only after a successful, non dry-run pass. Each hook runs its lifecycle
//! steps in order on its own task; the first failing step ends that hook.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of a controller started after reconciliation.
///
/// Every step defaults to a no-op so a hook only implements what it needs.
#[async_trait]
pub trait ControllerHook: Send + Sync {
    async fn create_client_set(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deploy(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_deploy(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_informer(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_queue(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn add_informer_event_handler(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_handler(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_controller(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Main loop; should return once `stop` flips to `true`
    async fn run(&mut self, stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        let _ = stop;
        Ok(())
    }

    async fn post_run(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks registered on a session, keyed by name
#[derive(Default)]
pub struct ControllerRegistry {
    hooks: BTreeMap<String, Box<dyn ControllerHook>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. A hook already registered under `name` is replaced.
    pub fn add(&mut self, name: impl Into<String>, hook: Box<dyn ControllerHook>) {
        let name = name.into();
        if self.hooks.insert(name.clone(), hook).is_some() {
            warn!(controller = %name, "replacing registered controller");
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Spawn every registered hook, emptying the registry
    pub fn start(&mut self) -> ControllerHandles {
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = std::mem::take(&mut self.hooks)
            .into_iter()
            .map(|(name, hook)| {
                info!(controller = %name, "starting controller");
                let task = tokio::spawn(run_lifecycle(name.clone(), hook, stop_rx.clone()));
                (name, task)
            })
            .collect();
        ControllerHandles { stop: stop_tx, tasks }
    }
}

/// Running controllers started by [`ControllerRegistry::start`]
pub struct ControllerHandles {
    stop: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl ControllerHandles {
    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Signal every running hook to stop
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for every hook to finish, collecting their failures
    pub async fn wait(self) -> Result<()> {
        let (names, tasks): (Vec<String>, Vec<_>) = self.tasks.into_iter().unzip();
        let mut errors = Vec::new();
        for (name, joined) in names.into_iter().zip(join_all(tasks).await) {
            match joined {
                Ok(Ok(())) => debug!(controller = %name, "controller finished"),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(Error::Controller {
                    name,
                    step: "join",
                    message: e.to_string(),
                }),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(errors))
        }
    }

    /// Stop every hook and wait for them
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.wait().await
    }
}

fn step(name: &str, step: &'static str, result: anyhow::Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            debug!(controller = %name, step, "step done");
            Ok(())
        }
        Err(e) => {
            error!(controller = %name, step, error = %e, "controller step failed");
            Err(Error::Controller {
                name: name.to_string(),
                step,
                message: format!("{e:#}"),
            })
        }
    }
}

async fn run_lifecycle(
    name: String,
    mut hook: Box<dyn ControllerHook>,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    step(&name, "create_client_set", hook.create_client_set().await)?;
    step(&name, "deploy", hook.deploy().await)?;
    step(&name, "post_deploy", hook.post_deploy().await)?;
    step(&name, "create_informer", hook.create_informer().await)?;
    step(&name, "create_queue", hook.create_queue().await)?;
    step(
        &name,
        "add_informer_event_handler",
        hook.add_informer_event_handler().await,
    )?;
    step(&name, "create_handler", hook.create_handler().await)?;
    step(&name, "create_controller", hook.create_controller().await)?;
    step(&name, "run", hook.run(stop).await)?;
    step(&name, "post_run", hook.post_run().await)?;
    info!(controller = %name, "controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Tracing {
        steps: Arc<Mutex<Vec<&'static str>>>,
        fail_at: Option<&'static str>,
    }

    impl Tracing {
        fn mark(&self, step: &'static str) -> anyhow::Result<()> {
            self.steps.lock().unwrap().push(step);
            if self.fail_at == Some(step) {
                anyhow::bail!("{step} exploded");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ControllerHook for Tracing {
        async fn create_client_set(&mut self) -> anyhow::Result<()> {
            self.mark("create_client_set")
        }

        async fn deploy(&mut self) -> anyhow::Result<()> {
            self.mark("deploy")
        }

        async fn create_controller(&mut self) -> anyhow::Result<()> {
            self.mark("create_controller")
        }

        async fn run(&mut self, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
            self.mark("run")?;
            stop.wait_for(|stopped| *stopped).await?;
            Ok(())
        }

        async fn post_run(&mut self) -> anyhow::Result<()> {
            self.mark("post_run")
        }
    }

    fn hook(steps: &Arc<Mutex<Vec<&'static str>>>, fail_at: Option<&'static str>) -> Box<Tracing> {
        Box::new(Tracing {
            steps: Arc::clone(steps),
            fail_at,
        })
    }

    #[tokio::test]
    async fn test_lifecycle_runs_in_order_until_stopped() {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ControllerRegistry::new();
        registry.add("alert", hook(&steps, None));

        let handles = registry.start();
        assert!(registry.is_empty());
        assert_eq!(handles.names(), vec!["alert"]);
        handles.shutdown().await.unwrap();

        assert_eq!(
            *steps.lock().unwrap(),
            vec!["create_client_set", "deploy", "create_controller", "run", "post_run"]
        );
    }

    #[tokio::test]
    async fn test_failing_step_stops_lifecycle() {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ControllerRegistry::new();
        registry.add("alert", hook(&steps, Some("deploy")));

        let err = registry.start().wait().await.unwrap_err();
        let Error::Aggregate(errors) = err else {
            panic!("expected aggregate error");
        };
        assert!(matches!(
            &errors[0],
            Error::Controller { name, step: "deploy", .. } if name == "alert"
        ));
        assert_eq!(*steps.lock().unwrap(), vec!["create_client_set", "deploy"]);
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ControllerRegistry::new();
        registry.add("b", hook(&steps, None));
        registry.add("a", hook(&steps, None));
        registry.add("a", hook(&steps, None));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
