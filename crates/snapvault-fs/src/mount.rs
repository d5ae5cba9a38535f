//! Storage mount configuration
//!
//! The storage server keeps its data on either a node host path or an NFS
//! share. Exactly one is in use for a deploy cycle; the choice is persisted in
//! a ConfigMap so later invocations (and operators) can read it back.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{HostPathVolumeSource, NFSVolumeSource, Volume};
use serde::{Deserialize, Serialize};

use snapvault_common::{Error, Result};

/// ConfigMap key holding the host path
pub const HOSTPATH_KEY: &str = "HOSTPATH";
/// ConfigMap key holding the NFS export path
pub const NFS_PATH_KEY: &str = "NFS_PATH";
/// ConfigMap key holding the NFS server address
pub const NFS_SERVER_KEY: &str = "NFS_SERVER";

/// Where the storage server's data lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StorageMountConfig {
    /// A directory on the node
    HostPath {
        /// Absolute path on the node
        path: String,
    },
    /// An NFS export
    Nfs {
        /// Export path on the server
        path: String,
        /// NFS server hostname or IP
        server: String,
    },
}

impl StorageMountConfig {
    /// Host path mount
    pub fn host_path(path: impl Into<String>) -> Self {
        Self::HostPath { path: path.into() }
    }

    /// NFS mount
    pub fn nfs(path: impl Into<String>, server: impl Into<String>) -> Self {
        Self::Nfs {
            path: path.into(),
            server: server.into(),
        }
    }

    /// The directory this mount points at (host path or export path)
    pub fn path(&self) -> &str {
        match self {
            Self::HostPath { path } | Self::Nfs { path, .. } => path,
        }
    }

    /// Reject empty paths and servers before anything touches the cluster
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::HostPath { path } if path.trim().is_empty() => Err(
                Error::validation_for_field("mount", "hostPath", "host path must not be empty"),
            ),
            Self::Nfs { path, .. } if path.trim().is_empty() => Err(
                Error::validation_for_field("mount", "nfs.path", "NFS path must not be empty"),
            ),
            Self::Nfs { server, .. } if server.trim().is_empty() => Err(
                Error::validation_for_field("mount", "nfs.server", "NFS server must not be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// ConfigMap data persisted for this mount
    pub fn to_config_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        match self {
            Self::HostPath { path } => {
                data.insert(HOSTPATH_KEY.to_string(), path.clone());
            }
            Self::Nfs { path, server } => {
                data.insert(NFS_PATH_KEY.to_string(), path.clone());
                data.insert(NFS_SERVER_KEY.to_string(), server.clone());
            }
        }
        data
    }

    /// Parse persisted ConfigMap data back into a mount.
    ///
    /// `HOSTPATH` wins when both variants are present. Data carrying neither
    /// variant is an error: a persisted config always names one.
    pub fn from_config_data(resource: &str, data: &BTreeMap<String, String>) -> Result<Self> {
        if let Some(path) = data.get(HOSTPATH_KEY) {
            return Ok(Self::host_path(path.clone()));
        }
        if let Some(path) = data.get(NFS_PATH_KEY) {
            let server = data.get(NFS_SERVER_KEY).ok_or_else(|| {
                Error::validation_for_field(
                    resource,
                    format!("data.{}", NFS_SERVER_KEY),
                    "NFS mount is missing its server",
                )
            })?;
            return Ok(Self::nfs(path.clone(), server.clone()));
        }
        Err(Error::validation_for(
            resource,
            format!(
                "config holds neither {} nor {}",
                HOSTPATH_KEY, NFS_PATH_KEY
            ),
        ))
    }

    /// Pod volume backed by this mount
    pub fn volume(&self, name: &str) -> Volume {
        let mut volume = Volume {
            name: name.to_string(),
            ..Default::default()
        };
        match self {
            Self::HostPath { path } => {
                volume.host_path = Some(HostPathVolumeSource {
                    path: path.clone(),
                    type_: None,
                });
            }
            Self::Nfs { path, server } => {
                volume.nfs = Some(NFSVolumeSource {
                    path: path.clone(),
                    server: server.clone(),
                    read_only: None,
                });
            }
        }
        volume
    }
}

impl std::fmt::Display for StorageMountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostPath { path } => write!(f, "hostPath {}", path),
            Self::Nfs { path, server } => write!(f, "nfs {}:{}", server, path),
        }
    }
}
