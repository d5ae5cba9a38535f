//! `snapvault store-info` - print the object store descriptor

use std::path::PathBuf;

use clap::Args;

use snapvault_common::DEFAULT_NAMESPACE;
use snapvault_fs::{fs_object_store, KubeResourceStore, StoreNames};

use crate::{Error, Result};

/// Print how backup tooling reaches the deployed store
#[derive(Args, Debug)]
pub struct StoreInfoArgs {
    /// Namespace the store is deployed in
    #[arg(long, short = 'n', env = "SNAPVAULT_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Print the secret access key instead of a mask
    #[arg(long)]
    pub show_secret: bool,

    /// Path to kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

/// Run the store-info command
pub async fn run(args: StoreInfoArgs) -> Result<()> {
    let client = super::kube_client(args.kubeconfig.as_deref()).await?;
    let store = KubeResourceStore::new(client);

    let descriptor = fs_object_store(&store, &args.namespace, &StoreNames::default())
        .await?
        .ok_or_else(|| Error::NotDeployed {
            namespace: args.namespace.clone(),
        })?;

    let shown = if args.show_secret {
        descriptor
    } else {
        descriptor.redacted()
    };
    print!("{}", serde_yaml::to_string(&shown)?);
    Ok(())
}
