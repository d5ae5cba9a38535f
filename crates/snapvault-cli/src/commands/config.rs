//! `snapvault config` - print the persisted mount configuration

use std::path::PathBuf;

use clap::Args;

use snapvault_common::DEFAULT_NAMESPACE;
use snapvault_fs::{current_mount_config, KubeResourceStore, StoreNames};

use crate::{Error, Result};

/// Print the mount configuration the store was last deployed with
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Namespace the store is deployed in
    #[arg(long, short = 'n', env = "SNAPVAULT_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Path to kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

/// Run the config command
pub async fn run(args: ConfigArgs) -> Result<()> {
    let client = super::kube_client(args.kubeconfig.as_deref()).await?;
    let store = KubeResourceStore::new(client);

    let mount = current_mount_config(&store, &args.namespace, &StoreNames::default())
        .await?
        .ok_or_else(|| Error::NotDeployed {
            namespace: args.namespace.clone(),
        })?;

    print!("{}", serde_yaml::to_string(&mount)?);
    Ok(())
}
