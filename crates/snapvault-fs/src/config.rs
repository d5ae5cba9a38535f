//! Deploy options and the well-known resource names
//!
//! Every name the deployer reads or writes lives in [`StoreNames`] so tests
//! and alternate installs can run side by side in one cluster.

use std::time::Duration;

use crate::mount::StorageMountConfig;

/// Default storage server image
pub const DEFAULT_SERVER_IMAGE: &str = "ghcr.io/snapvault/minio:latest";

/// Default image for mount worker tasks (ships the `/fs-store-*.sh` scripts)
pub const DEFAULT_WORKER_IMAGE: &str = "ghcr.io/snapvault/fs-worker:latest";

/// How long a worker task may run before it is considered stuck
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Names of every resource owned by the file-system store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
    /// ConfigMap persisting the mount configuration
    pub config_map: String,
    /// Secret holding the storage server credentials
    pub secret: String,
    /// Deployment running the storage server
    pub deployment: String,
    /// Service exposing the storage server
    pub service: String,
    /// dockerconfigjson Secret used to pull images from a private registry
    pub registry_secret: String,
    /// Value of the `app` label shared by the server and its workers
    pub app_label: String,
    /// Name of the storage server container inside the Deployment
    pub server_container: String,
    /// Name of the container inside worker pods
    pub worker_container: String,
    /// Prefix for worker pod names
    pub worker_prefix: String,
    /// Port the storage server listens on and the Service exposes
    pub service_port: i32,
    /// Pod template annotation carrying the credential fingerprint
    pub fingerprint_annotation: String,
}

impl Default for StoreNames {
    fn default() -> Self {
        Self {
            config_map: "snapvault-fs-store".to_string(),
            secret: "snapvault-fs-store-creds".to_string(),
            deployment: "snapvault-fs-store".to_string(),
            service: "snapvault-fs-store".to_string(),
            registry_secret: "snapvault-private-registry".to_string(),
            app_label: "snapvault-fs-store".to_string(),
            server_container: "storage".to_string(),
            worker_container: "fs-worker".to_string(),
            worker_prefix: "snapvault-fs-store".to_string(),
            service_port: 9000,
            fingerprint_annotation: "snapvault.io/fs-store-creds-fingerprint".to_string(),
        }
    }
}

/// Private registry access for the server and worker images
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Registry credentials in dockerconfigjson format
    pub docker_config_json: Option<String>,
}

impl RegistryOptions {
    /// Registry access from dockerconfigjson content
    pub fn with_docker_config_json(content: impl Into<String>) -> Self {
        Self {
            docker_config_json: Some(content.into()),
        }
    }

    /// Whether pods need an image pull secret
    pub fn is_configured(&self) -> bool {
        self.docker_config_json
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Inputs for one deploy of the file-system store
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Namespace all resources and workers live in
    pub namespace: String,
    /// Where the storage server keeps its data
    pub mount: StorageMountConfig,
    /// Operator consent to reset a mount configured by someone else
    pub force_reset: bool,
    /// OpenShift assigns UIDs itself; skip the pinned security context
    pub is_openshift: bool,
    /// Storage server image
    pub server_image: String,
    /// Worker task image
    pub worker_image: String,
    /// Private registry access
    pub registry: RegistryOptions,
    /// Upper bound on each worker task
    pub task_timeout: Duration,
    /// Resource names
    pub names: StoreNames,
}

impl DeployOptions {
    /// Options with default images, names and timeout
    pub fn new(namespace: impl Into<String>, mount: StorageMountConfig) -> Self {
        Self {
            namespace: namespace.into(),
            mount,
            force_reset: false,
            is_openshift: false,
            server_image: DEFAULT_SERVER_IMAGE.to_string(),
            worker_image: DEFAULT_WORKER_IMAGE.to_string(),
            registry: RegistryOptions::default(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            names: StoreNames::default(),
        }
    }

    /// Set the reset consent flag
    pub fn with_force_reset(mut self, force: bool) -> Self {
        self.force_reset = force;
        self
    }

    /// Name of the pull secret pods should reference, if a registry is configured
    pub fn image_pull_secret(&self) -> Option<&str> {
        self.registry
            .is_configured()
            .then_some(self.names.registry_secret.as_str())
    }
}
