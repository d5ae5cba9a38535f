//! Deployment orchestrator
//!
//! Drives one deploy of the file-system store:
//!
//! ```text
//! Idle -> RegistryEnsured -> DriftChecked -> ResetGated -> ResetDone ----+
//!                                        \-> NoResetNeeded --------------+
//!     +-> ResourcesConverged -> FingerprintPersisted -> BucketEnsured -> Ready
//! ```
//!
//! A reset is destructive for anyone else using the mount, so it only runs
//! with explicit consent. Without it the deploy stops before any managed
//! resource is touched.

use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DeployOptions;
use crate::credentials::{CredentialFingerprint, Credentials};
use crate::drift::should_reset;
use crate::error::DeployError;
use crate::mount::StorageMountConfig;
use crate::object_store::FsObjectStore;
use crate::reconciler;
use crate::runner::KubeTaskRunner;
use crate::store::{KubeResourceStore, ResourceStore};
use crate::task::{cleanup, run_task, TaskKind, TaskRunner, TaskSuccess};

/// How far a deploy got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployPhase {
    /// Nothing done yet
    #[default]
    Idle,
    /// Registry pull secret is in place (or not needed)
    RegistryEnsured,
    /// Mount has been probed
    DriftChecked,
    /// Reset consented to and started
    ResetGated,
    /// Mount reset completed
    ResetDone,
    /// Mount is usable as is
    NoResetNeeded,
    /// ConfigMap, Secret, Deployment and Service converged
    ResourcesConverged,
    /// Current fingerprint recorded on the mount
    FingerprintPersisted,
    /// Backup bucket exists on the server
    BucketEnsured,
    /// Deploy finished
    Ready,
}

/// Summary of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Final phase, always [`DeployPhase::Ready`]
    pub phase: DeployPhase,
    /// The mount held no prior configuration
    pub first_deploy: bool,
    /// The mount was reset
    pub reset_performed: bool,
    /// Fingerprint of the credentials now in use
    pub fingerprint: CredentialFingerprint,
}

/// Collaborators a deploy runs against
#[derive(Clone)]
pub struct DeployContext {
    /// Cluster resource access
    pub store: Arc<dyn ResourceStore>,
    /// Worker task execution
    pub runner: Arc<dyn TaskRunner>,
}

impl DeployContext {
    /// Context from explicit collaborators
    pub fn new(store: Arc<dyn ResourceStore>, runner: Arc<dyn TaskRunner>) -> Self {
        Self { store, runner }
    }

    /// Context backed by a Kubernetes client
    pub fn from_client(client: Client) -> Self {
        let store: Arc<dyn ResourceStore> = Arc::new(KubeResourceStore::new(client.clone()));
        let runner = Arc::new(KubeTaskRunner::new(client, store.clone()));
        Self::new(store, runner)
    }
}

/// Operator-facing explanation of what a reset does to `mount`
pub fn reset_warning(mount: &StorageMountConfig) -> String {
    format!(
        "The {} directory was previously configured by a different storage server instance.\n\
         Proceeding will re-configure it to be used only by the storage server deployed here, \
         and any other instance using this location will no longer have access.\n\
         If you are attempting to fully restore a prior installation, such as a disaster \
         recovery scenario, this action is expected.",
        mount.path()
    )
}

/// Deploy the file-system store, resetting the mount if needed and allowed
pub async fn deploy(
    ctx: &DeployContext,
    opts: &DeployOptions,
    cancel: &CancellationToken,
) -> Result<DeployOutcome, DeployError> {
    let mut phase = DeployPhase::Idle;
    let result = run(ctx, opts, cancel, &mut phase).await;
    match &result {
        Ok(outcome) => info!(
            namespace = %opts.namespace,
            first_deploy = outcome.first_deploy,
            reset = outcome.reset_performed,
            "file-system store ready"
        ),
        Err(e) if e.is_reset_required() => warn!(
            namespace = %opts.namespace,
            phase = ?phase,
            "mount reset required, waiting for consent"
        ),
        Err(e) => error!(
            namespace = %opts.namespace,
            phase = ?phase,
            error = %e,
            "deploy aborted"
        ),
    }
    result
}

fn advance(phase: &mut DeployPhase, next: DeployPhase, namespace: &str) {
    *phase = next;
    info!(namespace = %namespace, phase = ?next, "deploy phase");
}

async fn run(
    ctx: &DeployContext,
    opts: &DeployOptions,
    cancel: &CancellationToken,
    phase: &mut DeployPhase,
) -> Result<DeployOutcome, DeployError> {
    let store = ctx.store.as_ref();
    let runner = ctx.runner.as_ref();
    let ns = opts.namespace.as_str();

    opts.mount
        .validate()
        .map_err(|e| DeployError::resource("invalid storage mount", e))?;

    // workers pull from the private registry too, so this precedes the probe
    reconciler::ensure_registry_secret(store, opts)
        .await
        .map_err(|e| DeployError::resource("failed to ensure private registry secret", e))?;
    advance(phase, DeployPhase::RegistryEnsured, ns);

    let drift = should_reset(store, runner, opts, cancel).await?;
    advance(phase, DeployPhase::DriftChecked, ns);

    let mut reset_performed = false;
    if drift.should_reset {
        if !opts.force_reset {
            return Err(DeployError::ResetRequired {
                mount_path: opts.mount.path().to_string(),
                warning: reset_warning(&opts.mount),
            });
        }
        advance(phase, DeployPhase::ResetGated, ns);
        reset_mount(runner, opts, cancel).await?;
        reset_performed = true;
        advance(phase, DeployPhase::ResetDone, ns);
    } else {
        advance(phase, DeployPhase::NoResetNeeded, ns);
    }

    if drift.should_reset || !drift.has_prior_config {
        // the server regenerates its config on start; stop it first
        reconciler::scale_down_deployment(store, opts)
            .await
            .map_err(|e| DeployError::resource("failed to scale down storage server", e))?;
    }

    reconciler::ensure_config_map(store, opts)
        .await
        .map_err(|e| DeployError::resource("failed to ensure file-system configmap", e))?;
    let credentials = reconciler::ensure_secret(store, opts)
        .await
        .map_err(|e| DeployError::resource("failed to ensure storage server secret", e))?;
    let fingerprint = credentials.fingerprint();
    reconciler::ensure_deployment(store, opts, &fingerprint)
        .await
        .map_err(|e| DeployError::resource("failed to ensure storage server deployment", e))?;
    reconciler::ensure_service(store, opts)
        .await
        .map_err(|e| DeployError::resource("failed to ensure storage server service", e))?;
    advance(phase, DeployPhase::ResourcesConverged, ns);

    persist_fingerprint(runner, opts, &fingerprint, cancel).await?;
    advance(phase, DeployPhase::FingerprintPersisted, ns);

    ensure_bucket(runner, opts, credentials, cancel).await?;
    advance(phase, DeployPhase::BucketEnsured, ns);

    advance(phase, DeployPhase::Ready, ns);
    Ok(DeployOutcome {
        phase: DeployPhase::Ready,
        first_deploy: !drift.has_prior_config,
        reset_performed,
        fingerprint,
    })
}

async fn reset_mount(
    runner: &dyn TaskRunner,
    opts: &DeployOptions,
    cancel: &CancellationToken,
) -> Result<(), DeployError> {
    info!(namespace = %opts.namespace, mount = %opts.mount, "resetting storage mount");
    let out = run_task::<TaskSuccess>(runner, opts, TaskKind::Reset, Vec::new(), cancel)
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                DeployError::ResetInterrupted {
                    task: e.task().to_string(),
                }
            } else {
                DeployError::task("failed to reset storage mount", e)
            }
        })?;

    if !out.value.success {
        warn!(task = %out.handle.name, "reset worker reported failure, keeping it");
        return Err(DeployError::ResetFailure {
            task: out.handle.name,
        });
    }
    cleanup(runner, &out.handle).await;
    Ok(())
}

async fn persist_fingerprint(
    runner: &dyn TaskRunner,
    opts: &DeployOptions,
    fingerprint: &CredentialFingerprint,
    cancel: &CancellationToken,
) -> Result<(), DeployError> {
    let out = run_task::<TaskSuccess>(
        runner,
        opts,
        TaskKind::KeysSha,
        vec![fingerprint.to_string()],
        cancel,
    )
    .await
    .map_err(|e| DeployError::task("failed to write credential fingerprint", e))?;

    if !out.value.success {
        warn!(task = %out.handle.name, "fingerprint worker reported failure, keeping it");
        return Err(DeployError::FingerprintPersist {
            task: out.handle.name,
        });
    }
    cleanup(runner, &out.handle).await;
    Ok(())
}

async fn ensure_bucket(
    runner: &dyn TaskRunner,
    opts: &DeployOptions,
    credentials: Credentials,
    cancel: &CancellationToken,
) -> Result<(), DeployError> {
    let target = FsObjectStore::new(&opts.namespace, &opts.names, credentials);
    info!(endpoint = %target.endpoint, bucket = %target.bucket, "ensuring backup bucket");
    let out = run_task::<TaskSuccess>(
        runner,
        opts,
        TaskKind::CreateBucket,
        vec![target.endpoint, target.bucket],
        cancel,
    )
    .await
    .map_err(|e| DeployError::task("failed to create backup bucket", e))?;

    if !out.value.success {
        warn!(task = %out.handle.name, "bucket worker reported failure, keeping it");
        return Err(DeployError::BucketCreate {
            task: out.handle.name,
        });
    }
    cleanup(runner, &out.handle).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskError, TaskKind};
    use crate::test_support::{InMemoryStore, MountState, ScriptedRunner};

    fn opts() -> DeployOptions {
        DeployOptions::new("backups", StorageMountConfig::host_path("/var/snapshots"))
    }

    fn ctx(store: &Arc<InMemoryStore>, runner: &Arc<ScriptedRunner>) -> DeployContext {
        DeployContext::new(store.clone(), runner.clone())
    }

    /// Story: a never-configured mount gets the whole stack and a fingerprint
    #[tokio::test]
    async fn story_first_deploy_creates_everything() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(ScriptedRunner::new(MountState::empty()));

        let outcome = deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.phase, DeployPhase::Ready);
        assert!(outcome.first_deploy);
        assert!(!outcome.reset_performed);

        let names = &opts().names;
        assert!(store.config_map("backups", &names.config_map).is_some());
        assert!(store.deployment("backups", &names.deployment).is_some());
        assert!(store.service("backups", &names.service).is_some());
        let secret = store.secret("backups", &names.secret).unwrap();
        let creds = Credentials::from_secret(&secret).unwrap();
        assert_eq!(creds.fingerprint(), outcome.fingerprint);

        assert_eq!(
            runner.mount().fingerprint.as_deref(),
            Some(outcome.fingerprint.as_str())
        );
        assert_eq!(
            runner.launched_kinds(),
            vec![TaskKind::Check, TaskKind::KeysSha, TaskKind::CreateBucket]
        );
        assert_eq!(
            runner.buckets(),
            vec![(
                "http://snapvault-fs-store.backups:9000".to_string(),
                "velero".to_string()
            )]
        );
        assert_eq!(runner.deleted().len(), 3);
    }

    /// Story: running deploy twice changes nothing the second time
    #[tokio::test]
    async fn story_second_deploy_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(ScriptedRunner::new(MountState::empty()));
        let context = ctx(&store, &runner);

        let first = deploy(&context, &opts(), &CancellationToken::new())
            .await
            .unwrap();
        let snapshot = store.snapshot();
        store.clear_mutations();

        let second = deploy(&context, &opts(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(!second.first_deploy);
        assert!(!second.reset_performed);
        assert!(store.mutations().iter().all(|m| m.starts_with("update ")));
        assert!(store.same_content(&snapshot));
        assert!(!runner.launched_kinds().contains(&TaskKind::Reset));
    }

    /// Story: fingerprints match, only the drifted image is rolled
    #[tokio::test]
    async fn story_image_change_updates_deployment_without_reset() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(ScriptedRunner::new(MountState::empty()));
        let context = ctx(&store, &runner);
        deploy(&context, &opts(), &CancellationToken::new())
            .await
            .unwrap();

        let mut upgraded = opts();
        upgraded.server_image = "ghcr.io/snapvault/minio:2025-01-01".to_string();
        let outcome = deploy(&context, &upgraded, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.reset_performed);
        let d = store.deployment("backups", &upgraded.names.deployment).unwrap();
        let spec = d.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.template.spec.unwrap().containers[0].image.as_deref(),
            Some("ghcr.io/snapvault/minio:2025-01-01")
        );
    }

    /// Story: the mount belongs to another install and nobody consented
    #[tokio::test]
    async fn story_foreign_mount_without_consent_mutates_nothing() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_secret(
            "backups",
            crate::resources::credentials_secret(&opts(), &Credentials::new("snapvault", "B")),
        );
        store.clear_mutations();
        let foreign = Credentials::new("snapvault", "A").fingerprint();
        let runner = Arc::new(ScriptedRunner::new(MountState::configured(Some(
            foreign.to_string(),
        ))));

        let err = deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_reset_required());
        assert!(err.to_string().contains("/var/snapshots"));
        assert!(store.mutations().is_empty());
        assert_eq!(runner.launched_kinds(), vec![TaskKind::Check]);
        assert_eq!(runner.mount().fingerprint, Some(foreign.to_string()));
    }

    /// Story: with consent the mount is reset and re-fingerprinted
    #[tokio::test]
    async fn story_forced_reset_reconfigures_mount() {
        let store = Arc::new(InMemoryStore::new());
        let kept = Credentials::new("snapvault", "B");
        store.insert_secret(
            "backups",
            crate::resources::credentials_secret(&opts(), &kept),
        );
        let runner = Arc::new(ScriptedRunner::new(MountState::configured(Some(
            "deadbeef".to_string(),
        ))));

        let outcome = deploy(
            &ctx(&store, &runner),
            &opts().with_force_reset(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.reset_performed);
        assert!(!outcome.first_deploy);
        assert_eq!(outcome.fingerprint, kept.fingerprint());
        assert_eq!(
            runner.launched_kinds(),
            vec![
                TaskKind::Check,
                TaskKind::Reset,
                TaskKind::KeysSha,
                TaskKind::CreateBucket
            ]
        );
        assert_eq!(
            runner.mount().fingerprint.as_deref(),
            Some(kept.fingerprint().as_str())
        );
    }

    #[tokio::test]
    async fn reset_failure_keeps_worker_and_stops() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::configured(None))
                .with_output(TaskKind::Reset, r#"{"success":false}"#),
        );

        let err = deploy(
            &ctx(&store, &runner),
            &opts().with_force_reset(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let DeployError::ResetFailure { task } = &err else {
            panic!("expected reset failure, got {err}");
        };
        assert!(task.starts_with("snapvault-fs-store-reset-"));
        assert!(!runner.deleted().contains(task));
        assert!(store.deployment("backups", "snapvault-fs-store").is_none());
    }

    #[tokio::test]
    async fn cancelled_reset_is_reported_as_interrupted() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::configured(None)).cancel_during(TaskKind::Reset),
        );

        let err = deploy(
            &ctx(&store, &runner),
            &opts().with_force_reset(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DeployError::ResetInterrupted { .. }));
    }

    #[tokio::test]
    async fn empty_probe_output_aborts_and_keeps_probe_worker() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::empty()).with_output(TaskKind::Check, "  \n"),
        );

        let err = deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Task {
                source: TaskError::EmptyOutput { .. },
                ..
            }
        ));
        assert!(runner.deleted().is_empty());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn fingerprint_write_failure_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::empty())
                .with_output(TaskKind::KeysSha, r#"{"success":false}"#),
        );

        let err = deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::FingerprintPersist { .. }));
        assert_eq!(runner.deleted().len(), 1);
    }

    #[tokio::test]
    async fn bucket_failure_keeps_worker_after_fingerprint_is_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::empty())
                .with_output(TaskKind::CreateBucket, r#"{"success":false}"#),
        );

        let err = deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap_err();

        let DeployError::BucketCreate { task } = &err else {
            panic!("expected bucket failure, got {err}");
        };
        assert!(task.starts_with("snapvault-fs-store-bucket-"));
        assert!(!runner.deleted().contains(task));
        assert!(runner.mount().fingerprint.is_some());
        assert!(runner.buckets().is_empty());
    }

    #[tokio::test]
    async fn garbled_probe_output_aborts_and_keeps_probe_worker() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::empty())
                .with_output(TaskKind::Check, "permission denied"),
        );

        let err = deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Task {
                source: TaskError::Unparsable { .. },
                ..
            }
        ));
        assert!(runner.deleted().is_empty());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn garbled_reset_output_aborts_and_keeps_reset_worker() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::configured(None))
                .with_output(TaskKind::Reset, "rm: cannot remove '/fs/.minio.sys'"),
        );

        let err = deploy(
            &ctx(&store, &runner),
            &opts().with_force_reset(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let DeployError::Task {
            source: TaskError::Unparsable { task, .. },
            ..
        } = &err
        else {
            panic!("expected unparsable reset output, got {err}");
        };
        assert!(task.starts_with("snapvault-fs-store-reset-"));
        assert!(!runner.deleted().contains(task));
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn probe_timeout_aborts_and_keeps_probe_worker() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::empty()).time_out_during(TaskKind::Check),
        );

        let err = deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Task {
                source: TaskError::Timeout { .. },
                ..
            }
        ));
        assert!(runner.deleted().is_empty());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn reset_timeout_keeps_reset_worker() {
        let store = Arc::new(InMemoryStore::new());
        let runner = Arc::new(
            ScriptedRunner::new(MountState::configured(None)).time_out_during(TaskKind::Reset),
        );

        let err = deploy(
            &ctx(&store, &runner),
            &opts().with_force_reset(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let DeployError::Task {
            source: TaskError::Timeout { task, .. },
            ..
        } = &err
        else {
            panic!("expected reset timeout, got {err}");
        };
        assert!(!runner.deleted().contains(task));
        assert_eq!(runner.deleted().len(), 1);
    }

    #[tokio::test]
    async fn first_deploy_scales_existing_server_down_before_converging() {
        let store = Arc::new(InMemoryStore::new());
        let fp = CredentialFingerprint::of("snapvault", "x");
        store.insert_deployment("backups", crate::resources::deployment(&opts(), &fp));
        store.clear_mutations();
        let runner = Arc::new(ScriptedRunner::new(MountState::empty()));

        deploy(&ctx(&store, &runner), &opts(), &CancellationToken::new())
            .await
            .unwrap();

        let mutations = store.mutations();
        assert_eq!(
            mutations.first().map(String::as_str),
            Some("update Deployment snapvault-fs-store replicas=0")
        );
    }

    #[test]
    fn reset_warning_names_path_and_consequence() {
        let warning = reset_warning(&StorageMountConfig::nfs("/exports/backups", "nfs"));
        assert!(warning.contains("/exports/backups"));
        assert!(warning.contains("no longer have access"));
        assert!(warning.contains("disaster recovery"));
    }
}
