//! Field comparators
//!
//! Pure normalizers used to decide whether a live object actually differs
//! from the desired one. List fields whose order carries no meaning are
//! sorted by a stable key, and fields the API server defaults on write are
//! filled in on both sides, so neither construction order nor server
//! defaulting shows up as drift.

use k8s_openapi::api::core::v1::{
    Affinity, Container, DownwardAPIVolumeFile, EnvFromSource, EnvVar, KeyToPath,
    PodTemplateSpec, Probe, ResourceRequirements, ServicePort, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

const DEFAULT_PROTOCOL: &str = "TCP";
const DEFAULT_PROBE_TIMEOUT: i32 = 1;
const DEFAULT_PROBE_PERIOD: i32 = 10;
const DEFAULT_VOLUME_MODE: i32 = 0o644;
const DEFAULT_TOKEN_EXPIRATION: i64 = 3600;

pub fn sort_envs(envs: &[EnvVar]) -> Vec<EnvVar> {
    let mut envs: Vec<EnvVar> = envs.iter().map(normalize_env).collect();
    envs.sort_by(|a, b| a.name.cmp(&b.name));
    envs
}

fn normalize_env(env: &EnvVar) -> EnvVar {
    let mut env = env.clone();
    if let Some(field_ref) = env
        .value_from
        .as_mut()
        .and_then(|source| source.field_ref.as_mut())
    {
        field_ref.api_version.get_or_insert_with(|| "v1".to_string());
    }
    env
}

pub fn sort_volume_mounts(mounts: &[VolumeMount]) -> Vec<VolumeMount> {
    let mut mounts = mounts.to_vec();
    mounts.sort_by(|a, b| {
        (a.name.as_str(), a.mount_path.as_str()).cmp(&(b.name.as_str(), b.mount_path.as_str()))
    });
    mounts
}

/// Comparable view of a pod volume.
///
/// Config map and secret volumes compare by source name and projected items
/// only; the server fills in `defaultMode` on those. Every other source is
/// compared whole, after the server defaults are filled in.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeProjection {
    ConfigMap {
        name: String,
        source: String,
        items: Vec<KeyToPath>,
    },
    Secret {
        name: String,
        source: Option<String>,
        items: Vec<KeyToPath>,
    },
    Other(Volume),
}

impl VolumeProjection {
    fn name(&self) -> &str {
        match self {
            VolumeProjection::ConfigMap { name, .. } | VolumeProjection::Secret { name, .. } => {
                name
            }
            VolumeProjection::Other(volume) => &volume.name,
        }
    }
}

pub fn sort_volumes(volumes: &[Volume]) -> Vec<VolumeProjection> {
    let mut projected: Vec<VolumeProjection> = volumes
        .iter()
        .map(|volume| {
            if let Some(cm) = &volume.config_map {
                VolumeProjection::ConfigMap {
                    name: volume.name.clone(),
                    source: cm.name.clone(),
                    items: sort_items(cm.items.as_deref()),
                }
            } else if let Some(secret) = &volume.secret {
                VolumeProjection::Secret {
                    name: volume.name.clone(),
                    source: secret.secret_name.clone(),
                    items: sort_items(secret.items.as_deref()),
                }
            } else {
                VolumeProjection::Other(normalize_volume(volume))
            }
        })
        .collect();
    projected.sort_by(|a, b| a.name().cmp(b.name()));
    projected
}

fn normalize_volume(volume: &Volume) -> Volume {
    let mut volume = volume.clone();
    if let Some(host_path) = volume.host_path.as_mut() {
        host_path.type_.get_or_insert_with(String::new);
    }
    if let Some(downward) = volume.downward_api.as_mut() {
        downward.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
        normalize_downward_files(downward.items.as_deref_mut());
    }
    if let Some(projected) = volume.projected.as_mut() {
        projected.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
        for source in projected.sources.iter_mut().flatten() {
            if let Some(downward) = source.downward_api.as_mut() {
                normalize_downward_files(downward.items.as_deref_mut());
            }
            if let Some(token) = source.service_account_token.as_mut() {
                token.expiration_seconds.get_or_insert(DEFAULT_TOKEN_EXPIRATION);
            }
        }
    }
    volume
}

fn normalize_downward_files(files: Option<&mut [DownwardAPIVolumeFile]>) {
    for file in files.into_iter().flatten() {
        if let Some(field_ref) = file.field_ref.as_mut() {
            field_ref.api_version.get_or_insert_with(|| "v1".to_string());
        }
    }
}

fn sort_items(items: Option<&[KeyToPath]>) -> Vec<KeyToPath> {
    let mut items = items.unwrap_or_default().to_vec();
    items.sort_by(|a, b| a.key.cmp(&b.key));
    items
}

/// Comparable view of a liveness/readiness probe: the handler plus the
/// timing fields that govern it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbeProjection {
    pub handler: Probe,
    pub initial_delay_seconds: i32,
    pub timeout_seconds: i32,
    pub period_seconds: i32,
}

pub fn project_probe(probe: Option<&Probe>) -> Option<ProbeProjection> {
    let probe = probe?;
    let mut http_get = probe.http_get.clone();
    if let Some(action) = http_get.as_mut() {
        action.scheme.get_or_insert_with(|| "HTTP".to_string());
    }
    Some(ProbeProjection {
        handler: Probe {
            exec: probe.exec.clone(),
            grpc: probe.grpc.clone(),
            http_get,
            tcp_socket: probe.tcp_socket.clone(),
            ..Default::default()
        },
        initial_delay_seconds: probe.initial_delay_seconds.unwrap_or(0),
        timeout_seconds: probe.timeout_seconds.unwrap_or(DEFAULT_PROBE_TIMEOUT),
        period_seconds: probe.period_seconds.unwrap_or(DEFAULT_PROBE_PERIOD),
    })
}

/// Canonical form of a resource quantity, so `"0.5"` equals `"500m"` and
/// `"1Gi"` equals `"1024Mi"`. Unparseable quantities compare verbatim.
pub fn canonical_quantity(quantity: &Quantity) -> String {
    parse_nanos(quantity.0.trim())
        .map(|n| n.to_string())
        .unwrap_or_else(|| quantity.0.trim().to_string())
}

fn parse_nanos(raw: &str) -> Option<i128> {
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    if number.is_empty() {
        return None;
    }

    let (negative, number) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut fraction = fraction.to_string();
    if fraction.len() > 9 {
        fraction.truncate(9);
    }
    let scale = 10i128.pow(9 - fraction.len() as u32);
    let fraction: i128 = if fraction.is_empty() {
        0
    } else {
        fraction.parse::<i128>().ok()? * scale
    };
    let nanos = whole.checked_mul(1_000_000_000)?.checked_add(fraction)?;

    let scaled = match suffix {
        "Ki" => nanos.checked_mul(1 << 10)?,
        "Mi" => nanos.checked_mul(1 << 20)?,
        "Gi" => nanos.checked_mul(1 << 30)?,
        "Ti" => nanos.checked_mul(1 << 40)?,
        "Pi" => nanos.checked_mul(1 << 50)?,
        "Ei" => nanos.checked_mul(1 << 60)?,
        "n" => nanos / 1_000_000_000,
        "u" => nanos / 1_000_000,
        "m" => nanos / 1_000,
        "" => nanos,
        "k" => nanos.checked_mul(10i128.pow(3))?,
        "M" => nanos.checked_mul(10i128.pow(6))?,
        "G" => nanos.checked_mul(10i128.pow(9))?,
        "T" => nanos.checked_mul(10i128.pow(12))?,
        "P" => nanos.checked_mul(10i128.pow(15))?,
        "E" => nanos.checked_mul(10i128.pow(18))?,
        _ => return None,
    };
    Some(if negative { -scaled } else { scaled })
}

fn resource(list: Option<&BTreeMap<String, Quantity>>, name: &str) -> Option<String> {
    list.and_then(|l| l.get(name)).map(canonical_quantity)
}

/// Min/max CPU and memory of a container
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceProjection {
    pub min_cpu: Option<String>,
    pub max_cpu: Option<String>,
    pub min_mem: Option<String>,
    pub max_mem: Option<String>,
}

pub fn project_resources(resources: Option<&ResourceRequirements>) -> ResourceProjection {
    let requests = resources.and_then(|r| r.requests.as_ref());
    let limits = resources.and_then(|r| r.limits.as_ref());
    ResourceProjection {
        min_cpu: resource(requests, "cpu"),
        max_cpu: resource(limits, "cpu"),
        min_mem: resource(requests, "memory"),
        max_mem: resource(limits, "memory"),
    }
}

/// Fields of one container that may trigger a workload patch
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerProjection {
    pub name: String,
    pub image: Option<String>,
    pub resources: ResourceProjection,
    pub env: Vec<EnvVar>,
    pub env_from: Vec<EnvFromSource>,
    pub volume_mounts: Vec<VolumeMount>,
    pub liveness_probe: Option<ProbeProjection>,
    pub readiness_probe: Option<ProbeProjection>,
}

impl From<&Container> for ContainerProjection {
    fn from(container: &Container) -> Self {
        Self {
            name: container.name.clone(),
            image: container.image.clone(),
            resources: project_resources(container.resources.as_ref()),
            env: sort_envs(container.env.as_deref().unwrap_or_default()),
            env_from: container.env_from.clone().unwrap_or_default(),
            volume_mounts: sort_volume_mounts(
                container.volume_mounts.as_deref().unwrap_or_default(),
            ),
            liveness_probe: project_probe(container.liveness_probe.as_ref()),
            readiness_probe: project_probe(container.readiness_probe.as_ref()),
        }
    }
}

/// Fields of a pod template that may trigger a workload patch. Replica count
/// is deliberately absent: it is reconciled through its own path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PodTemplateProjection {
    pub service_account: Option<String>,
    pub containers: Vec<ContainerProjection>,
    pub volumes: Vec<VolumeProjection>,
    pub affinity: Option<Affinity>,
}

pub fn project_pod_template(template: Option<&PodTemplateSpec>) -> PodTemplateProjection {
    let Some(spec) = template.and_then(|t| t.spec.as_ref()) else {
        return PodTemplateProjection::default();
    };
    let mut containers: Vec<ContainerProjection> =
        spec.containers.iter().map(ContainerProjection::from).collect();
    containers.sort_by(|a, b| a.name.cmp(&b.name));
    PodTemplateProjection {
        service_account: spec
            .service_account_name
            .clone()
            .filter(|sa| !sa.is_empty() && sa != "default"),
        containers,
        volumes: sort_volumes(spec.volumes.as_deref().unwrap_or_default()),
        affinity: spec.affinity.clone().filter(|a| *a != Affinity::default()),
    }
}

/// Order-independent view of one RBAC policy rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleProjection {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub resource_names: Vec<String>,
    pub non_resource_urls: Vec<String>,
    pub verbs: Vec<String>,
}

pub fn sort_policy_rules(rules: &[PolicyRule]) -> Vec<RuleProjection> {
    fn sorted(values: Option<&Vec<String>>) -> Vec<String> {
        let mut values = values.cloned().unwrap_or_default();
        values.sort();
        values
    }
    let mut projected: Vec<RuleProjection> = rules
        .iter()
        .map(|rule| RuleProjection {
            api_groups: sorted(rule.api_groups.as_ref()),
            resources: sorted(rule.resources.as_ref()),
            resource_names: sorted(rule.resource_names.as_ref()),
            non_resource_urls: sorted(rule.non_resource_urls.as_ref()),
            verbs: sorted(Some(&rule.verbs)),
        })
        .collect();
    projected.sort();
    projected
}

/// Comparable view of a service port with server defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct PortProjection {
    pub name: String,
    pub protocol: String,
    pub port: i32,
    pub target_port: IntOrString,
}

pub fn sort_ports(ports: &[ServicePort]) -> Vec<PortProjection> {
    let mut projected: Vec<PortProjection> = ports
        .iter()
        .map(|p| PortProjection {
            name: p.name.clone().unwrap_or_default(),
            protocol: p
                .protocol
                .clone()
                .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            port: p.port,
            target_port: p.target_port.clone().unwrap_or(IntOrString::Int(p.port)),
        })
        .collect();
    projected.sort_by(|a, b| (a.name.as_str(), a.port).cmp(&(b.name.as_str(), b.port)));
    projected
}

/// Whether a subject with the same namespace and name is already bound
pub fn subject_exists(subjects: &[Subject], candidate: &Subject) -> bool {
    subjects
        .iter()
        .any(|s| s.name == candidate.name && s.namespace == candidate.namespace)
}

/// `existing` plus every subject of `desired` not already present.
/// Pre-existing subjects are never dropped.
pub fn merge_subjects(existing: &[Subject], desired: &[Subject]) -> Vec<Subject> {
    let mut merged = existing.to_vec();
    for subject in desired {
        if !subject_exists(&merged, subject) {
            merged.push(subject.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ConfigMapVolumeSource, DownwardAPIVolumeSource, HTTPGetAction, HostPathVolumeSource,
        ObjectFieldSelector, ProjectedVolumeSource, SecretVolumeSource,
        ServiceAccountTokenProjection,
    };

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_env_order_is_irrelevant() {
        let a = sort_envs(&[env("B", "2"), env("A", "1")]);
        let b = sort_envs(&[env("A", "1"), env("B", "2")]);
        assert_eq!(a, b);
        assert_eq!(a[0].name, "A");
    }

    #[test]
    fn test_volume_mount_order_is_irrelevant() {
        let m = |name: &str, path: &str| VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        };
        assert_eq!(
            sort_volume_mounts(&[m("data", "/data"), m("config", "/etc")]),
            sort_volume_mounts(&[m("config", "/etc"), m("data", "/data")])
        );
    }

    #[test]
    fn test_config_map_volume_ignores_default_mode() {
        let live = Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: "app-cfg".to_string(),
                default_mode: Some(420),
                ..Default::default()
            }),
            ..Default::default()
        };
        let desired = Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: "app-cfg".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(sort_volumes(&[live]), sort_volumes(&[desired]));
    }

    #[test]
    fn test_other_volumes_ignore_server_defaults() {
        let live = vec![
            Volume {
                name: "host".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: "/x".to_string(),
                    type_: Some(String::new()),
                }),
                ..Default::default()
            },
            Volume {
                name: "podinfo".to_string(),
                downward_api: Some(DownwardAPIVolumeSource {
                    default_mode: Some(420),
                    items: Some(vec![DownwardAPIVolumeFile {
                        path: "labels".to_string(),
                        field_ref: Some(ObjectFieldSelector {
                            api_version: Some("v1".to_string()),
                            field_path: "metadata.labels".to_string(),
                        }),
                        ..Default::default()
                    }]),
                }),
                ..Default::default()
            },
            Volume {
                name: "token".to_string(),
                projected: Some(ProjectedVolumeSource {
                    default_mode: Some(420),
                    sources: Some(vec![k8s_openapi::api::core::v1::VolumeProjection {
                        service_account_token: Some(ServiceAccountTokenProjection {
                            path: "token".to_string(),
                            expiration_seconds: Some(3600),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                }),
                ..Default::default()
            },
        ];
        let mut desired = live.clone();
        desired[0].host_path.as_mut().unwrap().type_ = None;
        let downward = desired[1].downward_api.as_mut().unwrap();
        downward.default_mode = None;
        downward.items.as_mut().unwrap()[0]
            .field_ref
            .as_mut()
            .unwrap()
            .api_version = None;
        let projected = desired[2].projected.as_mut().unwrap();
        projected.default_mode = None;
        projected.sources.as_mut().unwrap()[0]
            .service_account_token
            .as_mut()
            .unwrap()
            .expiration_seconds = None;
        assert_eq!(sort_volumes(&live), sort_volumes(&desired));

        desired[0].host_path.as_mut().unwrap().type_ = Some("Directory".to_string());
        assert_ne!(sort_volumes(&live), sort_volumes(&desired));
    }

    #[test]
    fn test_secret_volume_items_sorted() {
        let item = |key: &str| KeyToPath {
            key: key.to_string(),
            path: key.to_string(),
            mode: None,
        };
        let volume = |items: Vec<KeyToPath>| Volume {
            name: "tls".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some("certs".to_string()),
                items: Some(items),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            sort_volumes(&[volume(vec![item("b"), item("a")])]),
            sort_volumes(&[volume(vec![item("a"), item("b")])])
        );
    }

    #[test]
    fn test_probe_defaults_are_filled() {
        let desired = Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health".to_string()),
                port: IntOrString::Int(8080),
                ..Default::default()
            }),
            ..Default::default()
        };
        let live = Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health".to_string()),
                port: IntOrString::Int(8080),
                scheme: Some("HTTP".to_string()),
                ..Default::default()
            }),
            timeout_seconds: Some(1),
            period_seconds: Some(10),
            success_threshold: Some(1),
            failure_threshold: Some(3),
            ..Default::default()
        };
        assert_eq!(project_probe(Some(&desired)), project_probe(Some(&live)));
        assert_ne!(project_probe(Some(&desired)), None);
    }

    #[test]
    fn test_canonical_quantity() {
        let q = |s: &str| canonical_quantity(&Quantity(s.to_string()));
        assert_eq!(q("500m"), q("0.5"));
        assert_eq!(q("1"), q("1000m"));
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert_eq!(q("2G"), q("2000M"));
        assert_ne!(q("1G"), q("1Gi"));
        assert_eq!(q("bogus"), "bogus");
    }

    #[test]
    fn test_policy_rule_order_is_irrelevant() {
        let rule = |verbs: &[&str], resources: &[&str]| PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(resources.iter().map(|s| s.to_string()).collect()),
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let a = sort_policy_rules(&[rule(&["get", "list"], &["pods"]), rule(&["get"], &["secrets"])]);
        let b = sort_policy_rules(&[rule(&["get"], &["secrets"]), rule(&["list", "get"], &["pods"])]);
        assert_eq!(a, b);

        let c = sort_policy_rules(&[rule(&["get"], &["pods"]), rule(&["get"], &["secrets"])]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_port_defaults() {
        let desired = ServicePort {
            name: Some("http".to_string()),
            port: 80,
            ..Default::default()
        };
        let live = ServicePort {
            name: Some("http".to_string()),
            port: 80,
            protocol: Some("TCP".to_string()),
            target_port: Some(IntOrString::Int(80)),
            ..Default::default()
        };
        assert_eq!(sort_ports(&[desired]), sort_ports(&[live]));
    }

    #[test]
    fn test_merge_subjects_appends_only() {
        let subject = |name: &str| Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some("ns".to_string()),
            ..Default::default()
        };
        let merged = merge_subjects(&[subject("a")], &[subject("a"), subject("b")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "a");
        assert_eq!(merged[1].name, "b");

        let merged = merge_subjects(&[subject("a"), subject("c")], &[subject("b")]);
        assert_eq!(merged.len(), 3);
    }
}
