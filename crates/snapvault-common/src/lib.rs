//! Common types for snapvault: errors, kube client helpers and logging setup

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key identifying the tool that manages a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by snapvault
pub const LABEL_MANAGED_BY_SNAPVAULT: &str = "snapvault";

/// Namespace used when the caller does not pick one
pub const DEFAULT_NAMESPACE: &str = "default";
