//! Pod-running controllers
//!
//! Both compare by their pod template projection. The replica count is kept
//! out of the projection and reconciled through [`ManagedKind::replicas`], so
//! a pure scale never rewrites the template.

use super::{Kind, ManagedKind};
use crate::compare::{project_pod_template, PodTemplateProjection};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ReplicationController;
use kube::{Api, Client};

impl ManagedKind for ReplicationController {
    const KIND: Kind = Kind::ReplicationController;

    type Projection = PodTemplateProjection;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        project_pod_template(self.spec.as_ref().and_then(|s| s.template.as_ref()))
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        let template = desired.spec.as_ref().and_then(|s| s.template.clone());
        let replicas = desired.replicas();
        let spec = fresh.spec.get_or_insert_with(Default::default);
        spec.template = template;
        if replicas.is_some() {
            spec.replicas = replicas;
        }
    }

    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|s| s.replicas)
    }

    fn set_replicas(&mut self, replicas: Option<i32>) {
        self.spec.get_or_insert_with(Default::default).replicas = replicas;
    }
}

impl ManagedKind for Deployment {
    const KIND: Kind = Kind::Deployment;

    type Projection = PodTemplateProjection;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }

    fn project(&self) -> Self::Projection {
        project_pod_template(self.spec.as_ref().map(|s| &s.template))
    }

    fn overwrite(fresh: &mut Self, desired: &Self) {
        let Some(desired_spec) = desired.spec.as_ref() else {
            return;
        };
        let spec = fresh.spec.get_or_insert_with(Default::default);
        spec.template = desired_spec.template.clone();
        if desired_spec.replicas.is_some() {
            spec.replicas = desired_spec.replicas;
        }
    }

    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|s| s.replicas)
    }

    fn set_replicas(&mut self, replicas: Option<i32>) {
        self.spec.get_or_insert_with(Default::default).replicas = replicas;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{
        Container, EnvVar, PodSpec, PodTemplateSpec, ReplicationControllerSpec,
    };

    fn template(image: &str, env: &[(&str, &str)]) -> PodTemplateSpec {
        PodTemplateSpec {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web".to_string(),
                    image: Some(image.to_string()),
                    env: Some(
                        env.iter()
                            .map(|(k, v)| EnvVar {
                                name: k.to_string(),
                                value: Some(v.to_string()),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn rc(image: &str, replicas: i32) -> ReplicationController {
        ReplicationController {
            spec: Some(ReplicationControllerSpec {
                replicas: Some(replicas),
                template: Some(template(image, &[("A", "1"), ("B", "2")])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_replicas_are_not_part_of_projection() {
        let live = rc("hub:1", 1);
        let desired = rc("hub:1", 3);
        assert_eq!(live.project(), desired.project());
        assert_ne!(live.replicas(), desired.replicas());
    }

    #[test]
    fn test_image_change_is_drift() {
        assert_ne!(rc("hub:1", 1).project(), rc("hub:2", 1).project());
    }

    #[test]
    fn test_env_reorder_is_not_drift() {
        let mut reordered = rc("hub:1", 1);
        if let Some(spec) = reordered.spec.as_mut() {
            spec.template = Some(template("hub:1", &[("B", "2"), ("A", "1")]));
        }
        assert_eq!(rc("hub:1", 1).project(), reordered.project());
    }

    #[test]
    fn test_overwrite_sets_template_and_replicas() {
        let mut fresh = rc("hub:1", 1);
        fresh.metadata.resource_version = Some("7".to_string());
        ReplicationController::overwrite(&mut fresh, &rc("hub:2", 3));
        assert_eq!(fresh.replicas(), Some(3));
        assert_eq!(fresh.project(), rc("hub:2", 3).project());
        assert_eq!(fresh.metadata.resource_version.as_deref(), Some("7"));
    }

    #[test]
    fn test_deployment_without_desired_replicas_keeps_live_count() {
        let mut fresh = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(4),
                template: template("hub:1", &[]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let desired = Deployment {
            spec: Some(DeploymentSpec {
                template: template("hub:2", &[]),
                ..Default::default()
            }),
            ..Default::default()
        };
        Deployment::overwrite(&mut fresh, &desired);
        assert_eq!(fresh.replicas(), Some(4));
        assert_eq!(fresh.project(), desired.project());
    }
}
