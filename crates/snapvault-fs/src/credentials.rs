//! Storage server credentials and their fingerprint
//!
//! The fingerprint is a version tag for a credential set. It is written onto
//! the mount after every deploy so a later deploy can tell whether the mount
//! was last configured with the credentials the cluster holds now.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

use snapvault_common::kube_utils::sha256_hex;
use snapvault_common::{Error, Result};

/// Secret key holding the access identifier
pub const ACCESS_KEY_KEY: &str = "ACCESS_KEY";
/// Secret key holding the secret value
pub const SECRET_KEY_KEY: &str = "SECRET_KEY";

/// Access identifier used for every generated credential set
pub const DEFAULT_ACCESS_KEY: &str = "snapvault";

/// Access key pair for the storage server
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access identifier
    pub access_key: String,
    /// Secret value
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Credentials from explicit values
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Fresh credentials: the well-known access key and a random secret
    pub fn generate() -> Self {
        Self::new(DEFAULT_ACCESS_KEY, uuid::Uuid::new_v4().to_string())
    }

    /// Read credentials from a live Secret
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let name = secret.metadata.name.as_deref().unwrap_or("<unnamed>");
        let data = secret.data.as_ref();
        let read = |key: &str| -> Result<String> {
            let bytes = data.and_then(|d| d.get(key)).ok_or_else(|| {
                Error::validation_for_field(name, format!("data.{}", key), "key is missing")
            })?;
            String::from_utf8(bytes.0.clone()).map_err(|_| {
                Error::serialization_for_kind("Secret", format!("{}/{} is not UTF-8", name, key))
            })
        };
        Ok(Self::new(read(ACCESS_KEY_KEY)?, read(SECRET_KEY_KEY)?))
    }

    /// Secret data for this credential set
    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        BTreeMap::from([
            (
                ACCESS_KEY_KEY.to_string(),
                ByteString(self.access_key.as_bytes().to_vec()),
            ),
            (
                SECRET_KEY_KEY.to_string(),
                ByteString(self.secret_key.as_bytes().to_vec()),
            ),
        ])
    }

    /// Fingerprint of this credential set
    pub fn fingerprint(&self) -> CredentialFingerprint {
        CredentialFingerprint::of(&self.access_key, &self.secret_key)
    }
}

/// SHA-256 hex digest over `"{access_key},{secret_key}"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialFingerprint(String);

impl CredentialFingerprint {
    /// Compute the fingerprint of a key pair
    pub fn of(access_key: &str, secret_key: &str) -> Self {
        Self(sha256_hex(format!("{},{}", access_key, secret_key).as_bytes()))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte-for-byte comparison with a fingerprint read off the mount
    pub fn matches(&self, recorded: &str) -> bool {
        self.0.as_bytes() == recorded.as_bytes()
    }
}

impl std::fmt::Display for CredentialFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
