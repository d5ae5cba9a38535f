//! Desired-state builders for every resource the file-system store owns
//!
//! Pure functions from [`DeployOptions`] to k8s-openapi objects. The
//! reconciler decides which of these fields are copied onto live objects.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
    LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    Pod, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Secret,
    SecretKeySelector, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;

use snapvault_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_SNAPVAULT};

use crate::config::DeployOptions;
use crate::credentials::{Credentials, CredentialFingerprint, ACCESS_KEY_KEY, SECRET_KEY_KEY};

/// Volume name used by the storage server for its data
pub const SERVER_DATA_VOLUME: &str = "data";
/// Path the storage server serves from
pub const SERVER_DATA_PATH: &str = "/data";
/// Volume name used by worker pods
pub const WORKER_VOLUME: &str = "fs";
/// Path worker scripts see the mount at
pub const WORKER_MOUNT_PATH: &str = "/fs";

/// UID/GID the server and workers run as outside OpenShift
const RUN_AS_ID: i64 = 1001;

/// Secret type for registry pull credentials
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Secret key for registry pull credentials
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

fn labels(opts: &DeployOptions) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), opts.names.app_label.clone()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_SNAPVAULT.to_string(),
        ),
    ])
}

fn selector_labels(opts: &DeployOptions) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), opts.names.app_label.clone())])
}

fn metadata(name: &str, opts: &DeployOptions) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(opts.namespace.clone()),
        labels: Some(labels(opts)),
        ..Default::default()
    }
}

fn pod_security_context(opts: &DeployOptions) -> Option<PodSecurityContext> {
    if opts.is_openshift {
        return None;
    }
    Some(PodSecurityContext {
        run_as_user: Some(RUN_AS_ID),
        fs_group: Some(RUN_AS_ID),
        ..Default::default()
    })
}

fn image_pull_secrets(opts: &DeployOptions) -> Option<Vec<LocalObjectReference>> {
    opts.image_pull_secret().map(|name| {
        vec![LocalObjectReference {
            name: name.to_string(),
        }]
    })
}

/// Require scheduling onto Linux nodes
pub fn linux_node_affinity() -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: "kubernetes.io/os".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec!["linux".to_string()]),
                    }]),
                    match_fields: None,
                }],
            }),
            preferred_during_scheduling_ignored_during_execution: None,
        }),
        ..Default::default()
    }
}

/// ConfigMap persisting the mount configuration
pub fn config_map(opts: &DeployOptions) -> ConfigMap {
    ConfigMap {
        metadata: metadata(&opts.names.config_map, opts),
        data: Some(opts.mount.to_config_data()),
        ..Default::default()
    }
}

/// Secret holding the storage server credentials
pub fn credentials_secret(opts: &DeployOptions, credentials: &Credentials) -> Secret {
    Secret {
        metadata: metadata(&opts.names.secret, opts),
        type_: Some("Opaque".to_string()),
        data: Some(credentials.to_secret_data()),
        ..Default::default()
    }
}

/// Registry pull secret, when a private registry is configured
pub fn registry_secret(opts: &DeployOptions) -> Option<Secret> {
    let content = opts.registry.docker_config_json.as_ref()?;
    if !opts.registry.is_configured() {
        return None;
    }
    Some(Secret {
        metadata: metadata(&opts.names.registry_secret, opts),
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(content.as_bytes().to_vec()),
        )])),
        ..Default::default()
    })
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(20),
        ..Default::default()
    }
}

/// Deployment running the storage server
///
/// The pod template carries the credential fingerprint so a credential
/// change rolls the server.
pub fn deployment(opts: &DeployOptions, fingerprint: &CredentialFingerprint) -> Deployment {
    let names = &opts.names;
    let port = names.service_port;

    let container = Container {
        name: names.server_container.clone(),
        image: Some(opts.server_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "--quiet".to_string(),
            "server".to_string(),
            SERVER_DATA_PATH.to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: port,
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "MINIO_UPDATE".to_string(),
                value: Some("off".to_string()),
                ..Default::default()
            },
            secret_env("MINIO_ACCESS_KEY", &names.secret, ACCESS_KEY_KEY),
            secret_env("MINIO_SECRET_KEY", &names.secret, SECRET_KEY_KEY),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: SERVER_DATA_VOLUME.to_string(),
            mount_path: SERVER_DATA_PATH.to_string(),
            ..Default::default()
        }]),
        liveness_probe: Some(http_probe("/minio/health/live", port)),
        readiness_probe: Some(http_probe("/minio/health/ready", port)),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(&names.deployment, opts),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(opts)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                rolling_update: None,
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(opts)),
                    annotations: Some(BTreeMap::from([(
                        names.fingerprint_annotation.clone(),
                        fingerprint.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    security_context: pod_security_context(opts),
                    image_pull_secrets: image_pull_secrets(opts),
                    affinity: Some(linux_node_affinity()),
                    containers: vec![container],
                    volumes: Some(vec![opts.mount.volume(SERVER_DATA_VOLUME)]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP Service in front of the storage server
pub fn service(opts: &DeployOptions) -> Service {
    let port = opts.names.service_port;
    Service {
        metadata: metadata(&opts.names.service, opts),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(opts)),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn worker_resources() -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("100m".to_string())),
            ("memory".to_string(), Quantity("100Mi".to_string())),
        ])),
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("50m".to_string())),
            ("memory".to_string(), Quantity("50Mi".to_string())),
        ])),
        ..Default::default()
    }
}

fn task_container(opts: &DeployOptions, command: Vec<String>, args: Vec<String>) -> Container {
    Container {
        name: opts.names.worker_container.clone(),
        image: Some(opts.worker_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(command),
        args: (!args.is_empty()).then_some(args),
        resources: Some(worker_resources()),
        ..Default::default()
    }
}

fn task_pod(
    opts: &DeployOptions,
    name: &str,
    container: Container,
    volumes: Option<Vec<Volume>>,
) -> Pod {
    Pod {
        metadata: metadata(name, opts),
        spec: Some(PodSpec {
            security_context: pod_security_context(opts),
            restart_policy: Some("OnFailure".to_string()),
            image_pull_secrets: image_pull_secrets(opts),
            affinity: Some(linux_node_affinity()),
            volumes,
            containers: vec![container],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Short-lived pod running one script against the mount
pub fn worker_pod(
    opts: &DeployOptions,
    name: &str,
    command: Vec<String>,
    args: Vec<String>,
    read_only: bool,
) -> Pod {
    let container = Container {
        volume_mounts: Some(vec![VolumeMount {
            name: WORKER_VOLUME.to_string(),
            mount_path: WORKER_MOUNT_PATH.to_string(),
            read_only: Some(read_only),
            ..Default::default()
        }]),
        ..task_container(opts, command, args)
    };
    task_pod(
        opts,
        name,
        container,
        Some(vec![opts.mount.volume(WORKER_VOLUME)]),
    )
}

/// Short-lived pod talking to the storage server over S3
///
/// Does not mount the storage; credentials come from the server's Secret.
pub fn s3_worker_pod(
    opts: &DeployOptions,
    name: &str,
    command: Vec<String>,
    args: Vec<String>,
) -> Pod {
    let secret = &opts.names.secret;
    let container = Container {
        env: Some(vec![
            secret_env("AWS_ACCESS_KEY_ID", secret, ACCESS_KEY_KEY),
            secret_env("AWS_SECRET_ACCESS_KEY", secret, SECRET_KEY_KEY),
        ]),
        ..task_container(opts, command, args)
    };
    task_pod(opts, name, container, None)
}
