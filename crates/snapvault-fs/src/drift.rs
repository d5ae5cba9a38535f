//! Drift detection
//!
//! Compares the fingerprint recorded on the mount with the fingerprint of the
//! credentials the cluster holds. A mount with prior configuration but no
//! matching credentials was last configured by someone else and must be reset
//! before the server can use it.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DeployOptions;
use crate::credentials::Credentials;
use crate::error::DeployError;
use crate::store::ResourceStore;
use crate::task::{cleanup, run_task, MountProbeResult, TaskKind, TaskRunner};

/// Result of comparing the mount against the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriftDecision {
    /// The mount must be reset before deploying
    pub should_reset: bool,
    /// The mount holds configuration from an earlier deploy
    pub has_prior_config: bool,
}

impl DriftDecision {
    fn first_deploy() -> Self {
        Self {
            should_reset: false,
            has_prior_config: false,
        }
    }

    fn unchanged() -> Self {
        Self {
            should_reset: false,
            has_prior_config: true,
        }
    }

    fn changed() -> Self {
        Self {
            should_reset: true,
            has_prior_config: true,
        }
    }
}

/// Probe the mount and decide whether it must be reset
pub async fn should_reset(
    store: &dyn ResourceStore,
    runner: &dyn TaskRunner,
    opts: &DeployOptions,
    cancel: &CancellationToken,
) -> Result<DriftDecision, DeployError> {
    let probe = run_task::<MountProbeResult>(runner, opts, TaskKind::Check, Vec::new(), cancel)
        .await
        .map_err(|e| DeployError::task("failed to check storage mount", e))?;
    cleanup(runner, &probe.handle).await;

    let result = probe.value;
    if !result.has_prior_config {
        info!(namespace = %opts.namespace, mount = %opts.mount, "mount has no prior configuration");
        return Ok(DriftDecision::first_deploy());
    }

    let Some(recorded) = result.prior_fingerprint() else {
        info!(namespace = %opts.namespace, "mount has configuration but no recorded fingerprint");
        return Ok(DriftDecision::changed());
    };

    let secret = store
        .get_secret(&opts.names.secret, &opts.namespace)
        .await
        .map_err(|e| DeployError::resource("failed to get existing secret", e))?;
    let Some(secret) = secret else {
        info!(namespace = %opts.namespace, "mount is configured but no credentials exist");
        return Ok(DriftDecision::changed());
    };

    let credentials = Credentials::from_secret(&secret)
        .map_err(|e| DeployError::resource("failed to read existing secret", e))?;
    if credentials.fingerprint().matches(recorded) {
        Ok(DriftDecision::unchanged())
    } else {
        info!(namespace = %opts.namespace, "mount fingerprint differs from current credentials");
        Ok(DriftDecision::changed())
    }
}
