//! CLI commands

use std::path::Path;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use snapvault_common::kube_utils;

use crate::Result;

pub mod config;
pub mod deploy;
pub mod store_info;

/// Build a kube client from `--kubeconfig` or the usual resolution chain
pub async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    Ok(kube_utils::create_client(kubeconfig).await?)
}

/// Token cancelled on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}
