//! Worker-task protocol
//!
//! The deployer cannot see the mount directly, so it launches a short-lived
//! worker pod bound to the mount, waits for it to finish and reads one JSON
//! object from its output. Bucket creation uses the same protocol but talks to
//! the server instead of the mount. A worker is deleted only after its output was
//! parsed and judged actionable; anything else leaves it behind for
//! inspection.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::DeployOptions;
use crate::resources;

/// What a worker does against the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Report whether the mount holds a prior configuration and its fingerprint
    Check,
    /// Wipe the prior configuration from the mount
    Reset,
    /// Record a credential fingerprint on the mount
    KeysSha,
    /// Create a bucket on the running storage server
    CreateBucket,
}

impl TaskKind {
    /// Name segment used in worker pod names
    pub fn slug(&self) -> &'static str {
        match self {
            TaskKind::Check => "check",
            TaskKind::Reset => "reset",
            TaskKind::KeysSha => "keys-sha",
            TaskKind::CreateBucket => "bucket",
        }
    }

    /// Script the worker image runs for this kind
    pub fn script(&self) -> &'static str {
        match self {
            TaskKind::Check => "/fs-store-check.sh",
            TaskKind::Reset => "/fs-store-reset.sh",
            TaskKind::KeysSha => "/fs-store-keys-sha.sh",
            TaskKind::CreateBucket => "/fs-store-create-bucket.sh",
        }
    }

    /// Only the probe mounts the storage read-only
    pub fn read_only(&self) -> bool {
        matches!(self, TaskKind::Check)
    }

    /// Whether the worker is bound to the storage mount
    pub fn mounts_storage(&self) -> bool {
        !matches!(self, TaskKind::CreateBucket)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// A worker ready to launch
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerTask {
    /// What the worker does
    pub kind: TaskKind,
    /// Pod name, `{prefix}-{kind}-{unix seconds}`
    pub name: String,
    /// Namespace the pod runs in
    pub namespace: String,
    /// Full pod definition
    pub pod: Pod,
}

impl WorkerTask {
    /// Build the worker pod for `kind` with positional `args`
    pub fn new(opts: &DeployOptions, kind: TaskKind, args: Vec<String>) -> Self {
        let name = format!(
            "{}-{}-{}",
            opts.names.worker_prefix,
            kind.slug(),
            chrono::Utc::now().timestamp()
        );
        let command = vec![kind.script().to_string()];
        let pod = if kind.mounts_storage() {
            resources::worker_pod(opts, &name, command, args, kind.read_only())
        } else {
            resources::s3_worker_pod(opts, &name, command, args)
        };
        Self {
            kind,
            name,
            namespace: opts.namespace.clone(),
            pod,
        }
    }
}

/// Reference to a launched worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Errors from running a worker task
#[derive(Debug, Error)]
pub enum TaskError {
    /// The worker could not be created
    #[error("failed to launch worker {task}: {source}")]
    Launch {
        /// Worker name
        task: String,
        /// Underlying cause
        #[source]
        source: snapvault_common::Error,
    },

    /// The worker did not finish in time
    #[error("worker {task} did not finish within {timeout:?}")]
    Timeout {
        /// Worker name
        task: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The worker reached a failed terminal state
    #[error("worker {task} failed: {message}")]
    Failed {
        /// Worker name
        task: String,
        /// Pod status reason or message
        message: String,
    },

    /// The wait was cancelled
    #[error("wait for worker {task} was cancelled")]
    Cancelled {
        /// Worker name
        task: String,
    },

    /// The worker finished without printing anything
    #[error("worker {task} produced no output")]
    EmptyOutput {
        /// Worker name
        task: String,
    },

    /// The worker output is not the expected JSON
    #[error("unable to parse output of worker {task}: {message}")]
    Unparsable {
        /// Worker name
        task: String,
        /// Parser error
        message: String,
        /// Raw output
        output: String,
    },

    /// Reading worker status or output failed
    #[error("failed to read worker {task}: {source}")]
    Api {
        /// Worker name
        task: String,
        /// Underlying cause
        #[source]
        source: snapvault_common::Error,
    },
}

impl TaskError {
    /// Name of the worker this error relates to
    pub fn task(&self) -> &str {
        match self {
            TaskError::Launch { task, .. }
            | TaskError::Timeout { task, .. }
            | TaskError::Failed { task, .. }
            | TaskError::Cancelled { task }
            | TaskError::EmptyOutput { task }
            | TaskError::Unparsable { task, .. }
            | TaskError::Api { task, .. } => task,
        }
    }

    /// Whether the wait was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled { .. })
    }
}

/// Launches workers and collects their output
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Start the worker
    async fn launch(&self, task: &WorkerTask) -> Result<TaskHandle, TaskError>;

    /// Wait until the worker reaches a terminal state
    async fn await_completion(
        &self,
        handle: &TaskHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError>;

    /// Captured stdout of a finished worker
    async fn fetch_output(&self, handle: &TaskHandle) -> Result<String, TaskError>;

    /// Remove the worker
    async fn delete(&self, handle: &TaskHandle) -> Result<(), TaskError>;
}

/// Probe payload: `{"hasMinioConfig": bool, "minioKeysSHA": string}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountProbeResult {
    /// The mount holds configuration from an earlier deploy
    #[serde(rename = "hasMinioConfig")]
    pub has_prior_config: bool,
    /// Fingerprint recorded by the earlier deploy, empty if none
    #[serde(rename = "minioKeysSHA", default)]
    pub prior_fingerprint: String,
}

impl MountProbeResult {
    /// The recorded fingerprint exactly as the worker reported it, `None` when empty
    pub fn prior_fingerprint(&self) -> Option<&str> {
        let fp = self.prior_fingerprint.as_str();
        (!fp.is_empty()).then_some(fp)
    }
}

/// Reset, fingerprint-write and bucket payload: `{"success": bool}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSuccess {
    /// Whether the script did its job
    pub success: bool,
}

/// Parsed output of a finished worker
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput<T> {
    /// The worker, still present in the cluster
    pub handle: TaskHandle,
    /// Parsed payload
    pub value: T,
}

/// Parse worker output, rejecting blank output
pub fn parse_output<T: DeserializeOwned>(task: &str, output: &str) -> Result<T, TaskError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(TaskError::EmptyOutput {
            task: task.to_string(),
        });
    }
    serde_json::from_str(trimmed).map_err(|e| TaskError::Unparsable {
        task: task.to_string(),
        message: e.to_string(),
        output: output.to_string(),
    })
}

/// Launch a worker, wait for it and parse its output
///
/// The worker is not deleted; call [`cleanup`] once the payload has been
/// judged actionable.
pub async fn run_task<T: DeserializeOwned>(
    runner: &dyn TaskRunner,
    opts: &DeployOptions,
    kind: TaskKind,
    args: Vec<String>,
    cancel: &CancellationToken,
) -> Result<TaskOutput<T>, TaskError> {
    let task = WorkerTask::new(opts, kind, args);
    info!(task = %task.name, kind = %kind, namespace = %task.namespace, "launching worker");

    let handle = runner.launch(&task).await?;
    runner
        .await_completion(&handle, opts.task_timeout, cancel)
        .await?;
    let output = runner.fetch_output(&handle).await?;
    let value = parse_output(&handle.name, &output)?;
    Ok(TaskOutput { handle, value })
}

/// Delete a worker, logging instead of failing
pub async fn cleanup(runner: &dyn TaskRunner, handle: &TaskHandle) {
    if let Err(e) = runner.delete(handle).await {
        warn!(task = %handle.name, error = %e, "failed to delete worker");
    }
}
