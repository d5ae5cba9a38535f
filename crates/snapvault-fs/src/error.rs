//! Deploy error types

use crate::task::TaskError;

/// Why a deploy stopped
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The mount must be reset and the operator has not consented
    #[error("{warning}")]
    ResetRequired {
        /// Directory that would be reset
        mount_path: String,
        /// Operator-facing warning
        warning: String,
    },

    #[error("storage mount reset reported failure; worker {task} was kept for inspection")]
    ResetFailure { task: String },

    #[error("storage mount reset interrupted after worker {task} started; mount may be partially reset")]
    ResetInterrupted { task: String },

    #[error("failed to record credential fingerprint on the mount; worker {task} was kept")]
    FingerprintPersist { task: String },

    #[error("storage server did not create the backup bucket; worker {task} was kept")]
    BucketCreate { task: String },

    #[error("{context}: {source}")]
    Task {
        context: String,
        #[source]
        source: TaskError,
    },

    #[error("{context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: snapvault_common::Error,
    },
}

impl DeployError {
    /// Whether the deploy stopped at the consent gate
    pub fn is_reset_required(&self) -> bool {
        matches!(self, DeployError::ResetRequired { .. })
    }

    pub(crate) fn task(context: impl Into<String>, source: TaskError) -> Self {
        DeployError::Task {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn resource(context: impl Into<String>, source: snapvault_common::Error) -> Self {
        DeployError::Resource {
            context: context.into(),
            source,
        }
    }
}
