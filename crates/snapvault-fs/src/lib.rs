//! File-system object store provisioning for snapvault
//!
//! Deploys an S3-compatible storage server whose data lives on a host path or
//! NFS share, and keeps it safe to re-run:
//! - **reconciler**: idempotent ensure-or-update of the ConfigMap, Secret,
//!   Deployment and Service the store owns
//! - **task**/**runner**: short-lived worker pods that inspect or modify the
//!   mount and report a JSON result
//! - **drift**: compares the fingerprint recorded on the mount with the
//!   cluster's credentials
//! - **orchestrator**: registry access, drift check, consent-gated reset,
//!   convergence and fingerprint recording, in that order

pub mod config;
pub mod credentials;
pub mod drift;
pub mod error;
pub mod mount;
pub mod object_store;
pub mod orchestrator;
pub mod reconciler;
pub mod resources;
pub mod runner;
pub mod store;
pub mod task;

#[cfg(test)]
mod test_support;

pub use config::{DeployOptions, RegistryOptions, StoreNames};
pub use credentials::{CredentialFingerprint, Credentials};
pub use drift::{should_reset, DriftDecision};
pub use error::DeployError;
pub use mount::StorageMountConfig;
pub use object_store::{current_mount_config, fs_object_store, FsObjectStore};
pub use orchestrator::{deploy, reset_warning, DeployContext, DeployOutcome, DeployPhase};
pub use runner::KubeTaskRunner;
pub use store::{KubeResourceStore, ResourceStore};
pub use task::{TaskError, TaskKind, TaskRunner};
