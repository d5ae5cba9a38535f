//! [`TaskRunner`] backed by bare pods

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams, PostParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::store::ResourceStore;
use crate::task::{TaskError, TaskHandle, TaskRunner, WorkerTask};

/// How often a running worker's phase is polled
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Terminal state of a worker pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodOutcome {
    /// Still pending or running
    Running,
    /// Exited successfully
    Succeeded,
    /// Failed, with the status reason or message
    Failed(String),
}

/// Classify a pod by its status phase
pub fn pod_outcome(pod: &Pod) -> PodOutcome {
    let status = pod.status.as_ref();
    match status.and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => PodOutcome::Succeeded,
        Some("Failed") => PodOutcome::Failed(
            status
                .and_then(|s| s.message.clone().or_else(|| s.reason.clone()))
                .unwrap_or_else(|| "pod failed".to_string()),
        ),
        _ => PodOutcome::Running,
    }
}

/// Runs worker tasks as pods in the task's namespace
pub struct KubeTaskRunner {
    client: Client,
    store: Arc<dyn ResourceStore>,
}

impl KubeTaskRunner {
    /// Create a runner; finished workers are removed through `store`
    pub fn new(client: Client, store: Arc<dyn ResourceStore>) -> Self {
        Self { client, store }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<(), TaskError> {
        let api = self.pods(&handle.namespace);
        loop {
            let pod = api.get(&handle.name).await.map_err(|e| TaskError::Api {
                task: handle.name.clone(),
                source: e.into(),
            })?;
            match pod_outcome(&pod) {
                PodOutcome::Succeeded => return Ok(()),
                PodOutcome::Failed(message) => {
                    return Err(TaskError::Failed {
                        task: handle.name.clone(),
                        message,
                    })
                }
                PodOutcome::Running => {
                    trace!(task = %handle.name, "worker still running");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl TaskRunner for KubeTaskRunner {
    async fn launch(&self, task: &WorkerTask) -> Result<TaskHandle, TaskError> {
        self.pods(&task.namespace)
            .create(&PostParams::default(), &task.pod)
            .await
            .map_err(|e| TaskError::Launch {
                task: task.name.clone(),
                source: e.into(),
            })?;
        Ok(TaskHandle {
            name: task.name.clone(),
            namespace: task.namespace.clone(),
        })
    }

    async fn await_completion(
        &self,
        handle: &TaskHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TaskError::Cancelled {
                task: handle.name.clone(),
            }),
            result = tokio::time::timeout(timeout, self.poll(handle)) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(TaskError::Timeout {
                    task: handle.name.clone(),
                    timeout,
                }),
            },
        }
    }

    async fn fetch_output(&self, handle: &TaskHandle) -> Result<String, TaskError> {
        self.pods(&handle.namespace)
            .logs(&handle.name, &LogParams::default())
            .await
            .map_err(|e| TaskError::Api {
                task: handle.name.clone(),
                source: e.into(),
            })
    }

    async fn delete(&self, handle: &TaskHandle) -> Result<(), TaskError> {
        self.store
            .delete_pod(&handle.name, &handle.namespace)
            .await
            .map_err(|source| TaskError::Api {
                task: handle.name.clone(),
                source,
            })?;
        debug!(task = %handle, "deleted worker");
        Ok(())
    }
}
