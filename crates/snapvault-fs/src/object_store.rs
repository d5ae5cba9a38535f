//! Read-side views of a deployed file-system store

use std::collections::BTreeMap;

use serde::Serialize;

use snapvault_common::error::ResultExt;
use snapvault_common::Result;

use crate::config::StoreNames;
use crate::credentials::Credentials;
use crate::mount::StorageMountConfig;
use crate::store::ResourceStore;

/// Object store provider name backup tooling expects for S3-compatible stores
pub const OBJECT_STORE_PROVIDER: &str = "aws";
/// Bucket the storage server serves backups from
pub const OBJECT_STORE_BUCKET: &str = "velero";
/// Region reported for the storage server
pub const OBJECT_STORE_REGION: &str = "minio";

/// How backup tooling reaches the deployed storage server
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsObjectStore {
    /// Provider name
    pub provider: String,
    /// Bucket name
    pub bucket: String,
    /// Region
    pub region: String,
    /// In-cluster endpoint, `http://{service}.{namespace}:{port}`
    pub endpoint: String,
    /// Access identifier
    pub access_key_id: String,
    /// Secret value
    pub secret_access_key: String,
}

impl std::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsObjectStore")
            .field("provider", &self.provider)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl FsObjectStore {
    /// Descriptor for the server behind `names.service` in `namespace`
    pub fn new(namespace: &str, names: &StoreNames, credentials: Credentials) -> Self {
        Self {
            provider: OBJECT_STORE_PROVIDER.to_string(),
            bucket: OBJECT_STORE_BUCKET.to_string(),
            region: OBJECT_STORE_REGION.to_string(),
            endpoint: format!(
                "http://{}.{}:{}",
                names.service, namespace, names.service_port
            ),
            access_key_id: credentials.access_key,
            secret_access_key: credentials.secret_key,
        }
    }

    /// Copy with the secret value masked, for display
    pub fn redacted(&self) -> Self {
        Self {
            secret_access_key: "********".to_string(),
            ..self.clone()
        }
    }
}

/// Build the object store descriptor from the live credentials
///
/// Returns `None` when the store has not been deployed.
pub async fn fs_object_store(
    store: &dyn ResourceStore,
    namespace: &str,
    names: &StoreNames,
) -> Result<Option<FsObjectStore>> {
    let Some(secret) = store
        .get_secret(&names.secret, namespace)
        .await
        .context("failed to get storage server secret")?
    else {
        return Ok(None);
    };
    let credentials =
        Credentials::from_secret(&secret).context("failed to read storage server secret")?;
    Ok(Some(FsObjectStore::new(namespace, names, credentials)))
}

/// Read back the persisted mount configuration
///
/// Returns `None` when nothing was ever deployed to `namespace`.
pub async fn current_mount_config(
    store: &dyn ResourceStore,
    namespace: &str,
    names: &StoreNames,
) -> Result<Option<StorageMountConfig>> {
    let Some(cm) = store
        .get_config_map(&names.config_map, namespace)
        .await
        .context("failed to get file-system configmap")?
    else {
        return Ok(None);
    };
    let data = cm.data.unwrap_or_else(BTreeMap::new);
    StorageMountConfig::from_config_data(&names.config_map, &data).map(Some)
}
