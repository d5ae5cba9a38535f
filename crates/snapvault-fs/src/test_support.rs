//! In-memory collaborators for deploy scenario tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use snapvault_common::Error;

use crate::store::ResourceStore;
use crate::task::{TaskError, TaskHandle, TaskKind, TaskRunner, WorkerTask};

type Key = (String, String);

fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

/// Every object the store holds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    config_maps: BTreeMap<Key, ConfigMap>,
    secrets: BTreeMap<Key, Secret>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
}

/// [`ResourceStore`] keeping objects in maps and recording every write
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreSnapshot>,
    mutations: Mutex<Vec<String>>,
}

fn get<K: Clone>(map: &BTreeMap<Key, K>, name: &str, namespace: &str) -> Option<K> {
    map.get(&(namespace.to_string(), name.to_string())).cloned()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_secret(&self, namespace: &str, secret: Secret) {
        let key = (namespace.to_string(), secret.name_any());
        self.state.lock().unwrap().secrets.insert(key, secret);
    }

    pub fn insert_deployment(&self, namespace: &str, deployment: Deployment) {
        let key = (namespace.to_string(), deployment.name_any());
        self.state.lock().unwrap().deployments.insert(key, deployment);
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        get(&self.state.lock().unwrap().config_maps, name, namespace)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        get(&self.state.lock().unwrap().secrets, name, namespace)
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        get(&self.state.lock().unwrap().deployments, name, namespace)
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        get(&self.state.lock().unwrap().services, name, namespace)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn same_content(&self, snapshot: &StoreSnapshot) -> bool {
        *self.state.lock().unwrap() == *snapshot
    }

    /// Writes in order, as `"{verb} {Kind} {name}"`
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn clear_mutations(&self) {
        self.mutations.lock().unwrap().clear();
    }

    fn record(&self, entry: String) {
        self.mutations.lock().unwrap().push(entry);
    }

    fn write<K: kube::Resource + Clone>(
        &self,
        select: impl FnOnce(&mut StoreSnapshot) -> &mut BTreeMap<Key, K>,
        namespace: &str,
        obj: &K,
        create: bool,
    ) -> Result<K, Error> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name);
        let mut state = self.state.lock().unwrap();
        let map = select(&mut *state);
        match (create, map.contains_key(&key)) {
            (true, true) => Err(api_error(409, "AlreadyExists")),
            (false, false) => Err(api_error(404, "NotFound")),
            _ => {
                map.insert(key, obj.clone());
                Ok(obj.clone())
            }
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error> {
        let out = self.write(|s| &mut s.config_maps, namespace, cm, true)?;
        self.record(format!("create ConfigMap {}", cm.name_any()));
        Ok(out)
    }

    async fn update_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error> {
        let out = self.write(|s| &mut s.config_maps, namespace, cm, false)?;
        self.record(format!("update ConfigMap {}", cm.name_any()));
        Ok(out)
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        let out = self.write(|s| &mut s.secrets, namespace, secret, true)?;
        self.record(format!("create Secret {}", secret.name_any()));
        Ok(out)
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        let out = self.write(|s| &mut s.secrets, namespace, secret, false)?;
        self.record(format!("update Secret {}", secret.name_any()));
        Ok(out)
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.deployment(namespace, name))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let out = self.write(|s| &mut s.deployments, namespace, deployment, true)?;
        self.record(format!("create Deployment {}", deployment.name_any()));
        Ok(out)
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        let out = self.write(|s| &mut s.deployments, namespace, deployment, false)?;
        let replicas = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        self.record(format!(
            "update Deployment {} replicas={}",
            deployment.name_any(),
            replicas
        ));
        Ok(out)
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        Ok(self.service(namespace, name))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let out = self.write(|s| &mut s.services, namespace, service, true)?;
        self.record(format!("create Service {}", service.name_any()));
        Ok(out)
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        let out = self.write(|s| &mut s.services, namespace, service, false)?;
        self.record(format!("update Service {}", service.name_any()));
        Ok(out)
    }

    async fn delete_pod(&self, _name: &str, _namespace: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// What the fake mount currently holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountState {
    pub has_config: bool,
    pub fingerprint: Option<String>,
}

impl MountState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn configured(fingerprint: Option<String>) -> Self {
        Self {
            has_config: true,
            fingerprint,
        }
    }
}

#[derive(Default)]
struct RunnerState {
    mount: MountState,
    launched: Vec<TaskKind>,
    tasks: HashMap<String, (TaskKind, Vec<String>)>,
    outputs: HashMap<String, String>,
    deleted: Vec<String>,
    buckets: Vec<(String, String)>,
}

/// [`TaskRunner`] that acts out the worker scripts against a [`MountState`]
pub struct ScriptedRunner {
    state: Mutex<RunnerState>,
    overrides: HashMap<TaskKind, String>,
    cancel_kind: Option<TaskKind>,
    timeout_kind: Option<TaskKind>,
}

impl ScriptedRunner {
    pub fn new(mount: MountState) -> Self {
        Self {
            state: Mutex::new(RunnerState {
                mount,
                ..Default::default()
            }),
            overrides: HashMap::new(),
            cancel_kind: None,
            timeout_kind: None,
        }
    }

    /// Print `output` for every worker of `kind` instead of running the script
    pub fn with_output(mut self, kind: TaskKind, output: &str) -> Self {
        self.overrides.insert(kind, output.to_string());
        self
    }

    /// Report the wait for `kind` as cancelled
    pub fn cancel_during(mut self, kind: TaskKind) -> Self {
        self.cancel_kind = Some(kind);
        self
    }

    /// Let the wait for `kind` run out its timeout
    pub fn time_out_during(mut self, kind: TaskKind) -> Self {
        self.timeout_kind = Some(kind);
        self
    }

    pub fn mount(&self) -> MountState {
        self.state.lock().unwrap().mount.clone()
    }

    pub fn launched_kinds(&self) -> Vec<TaskKind> {
        self.state.lock().unwrap().launched.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Buckets created, as `(endpoint, bucket)`
    pub fn buckets(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().buckets.clone()
    }

    fn run_script(state: &mut RunnerState, kind: TaskKind, args: &[String]) -> String {
        let mount = &mut state.mount;
        match kind {
            TaskKind::Check => serde_json::json!({
                "hasMinioConfig": mount.has_config,
                "minioKeysSHA": mount.fingerprint.clone().unwrap_or_default(),
            })
            .to_string(),
            TaskKind::Reset => {
                *mount = MountState::empty();
                r#"{"success":true}"#.to_string()
            }
            TaskKind::KeysSha => {
                mount.has_config = true;
                mount.fingerprint = args.first().cloned();
                r#"{"success":true}"#.to_string()
            }
            TaskKind::CreateBucket => {
                if let [endpoint, bucket] = args {
                    let entry = (endpoint.clone(), bucket.clone());
                    if !state.buckets.contains(&entry) {
                        state.buckets.push(entry);
                    }
                }
                r#"{"success":true}"#.to_string()
            }
        }
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn launch(&self, task: &WorkerTask) -> Result<TaskHandle, TaskError> {
        let args = task
            .pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.args.clone())
            .unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.launched.push(task.kind);
        state.tasks.insert(task.name.clone(), (task.kind, args));
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
        let mut state = self.state.lock().unwrap();
        let (kind, args) = state
            .tasks
            .get(&handle.name)
            .cloned()
            .ok_or_else(|| TaskError::Failed {
                task: handle.name.clone(),
                message: "unknown worker".to_string(),
            })?;
        if cancel.is_cancelled() || self.cancel_kind == Some(kind) {
            return Err(TaskError::Cancelled {
                task: handle.name.clone(),
            });
        }
        if self.timeout_kind == Some(kind) {
            return Err(TaskError::Timeout {
                task: handle.name.clone(),
                timeout,
            });
        }
        let output = match self.overrides.get(&kind) {
            Some(output) => output.clone(),
            None => Self::run_script(&mut state, kind, &args),
        };
        state.outputs.insert(handle.name.clone(), output);
        Ok(())
    }

    async fn fetch_output(&self, handle: &TaskHandle) -> Result<String, TaskError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .outputs
            .get(&handle.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, handle: &TaskHandle) -> Result<(), TaskError> {
        self.state.lock().unwrap().deleted.push(handle.name.clone());
        Ok(())
    }
}
