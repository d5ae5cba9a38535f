//! `snapvault deploy` - deploy or update the file-system store

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use tracing::info;

use snapvault_common::DEFAULT_NAMESPACE;
use snapvault_fs::config::{DEFAULT_SERVER_IMAGE, DEFAULT_WORKER_IMAGE};
use snapvault_fs::{
    deploy, DeployContext, DeployError, DeployOptions, RegistryOptions, StorageMountConfig,
};

use crate::{Error, Result};

/// Deploy the storage server onto a host path or NFS share
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Namespace to deploy into
    #[arg(long, short = 'n', env = "SNAPVAULT_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Directory on the node to store data in
    #[arg(long, conflicts_with_all = ["nfs_path", "nfs_server"])]
    pub host_path: Option<String>,

    /// Export path on the NFS server
    #[arg(long, requires = "nfs_server")]
    pub nfs_path: Option<String>,

    /// NFS server hostname or IP
    #[arg(long, requires = "nfs_path")]
    pub nfs_server: Option<String>,

    /// Reset a mount that was configured by a different install
    #[arg(long)]
    pub force_reset: bool,

    /// Target OpenShift (let the platform assign UIDs)
    #[arg(long)]
    pub openshift: bool,

    /// Storage server image
    #[arg(long, env = "SNAPVAULT_IMAGE", default_value = DEFAULT_SERVER_IMAGE)]
    pub image: String,

    /// Worker task image
    #[arg(long, env = "SNAPVAULT_WORKER_IMAGE", default_value = DEFAULT_WORKER_IMAGE)]
    pub worker_image: String,

    /// Path to registry credentials file (dockerconfigjson format)
    #[arg(long, env = "REGISTRY_CREDENTIALS_FILE")]
    pub registry_credentials_file: Option<PathBuf>,

    /// Timeout for each worker task in seconds
    #[arg(long, default_value = "120")]
    pub task_timeout_secs: u64,

    /// Path to kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

impl DeployArgs {
    /// The mount selected by the flags
    pub fn mount(&self) -> Result<StorageMountConfig> {
        match (&self.host_path, &self.nfs_path, &self.nfs_server) {
            (Some(path), None, None) => Ok(StorageMountConfig::host_path(path.clone())),
            (None, Some(path), Some(server)) => {
                Ok(StorageMountConfig::nfs(path.clone(), server.clone()))
            }
            _ => Err(Error::validation(
                "specify either --host-path or both --nfs-path and --nfs-server",
            )),
        }
    }

    /// Deploy options without registry access
    pub fn options(&self) -> Result<DeployOptions> {
        let mount = self.mount()?;
        mount.validate()?;
        if self.task_timeout_secs == 0 {
            return Err(Error::validation("--task-timeout-secs must be positive"));
        }

        let mut opts =
            DeployOptions::new(&self.namespace, mount).with_force_reset(self.force_reset);
        opts.is_openshift = self.openshift;
        opts.server_image = self.image.clone();
        opts.worker_image = self.worker_image.clone();
        opts.task_timeout = Duration::from_secs(self.task_timeout_secs);
        Ok(opts)
    }
}

async fn read_registry_credentials(path: &Path) -> Result<RegistryOptions> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::RegistryCredentials {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str::<serde_json::Value>(&content)?;
    Ok(RegistryOptions::with_docker_config_json(content))
}

/// Run the deploy command
pub async fn run(args: DeployArgs) -> Result<()> {
    let mut opts = args.options()?;
    if let Some(path) = &args.registry_credentials_file {
        opts.registry = read_registry_credentials(path).await?;
    }

    let client = super::kube_client(args.kubeconfig.as_deref()).await?;
    let ctx = DeployContext::from_client(client);
    let cancel = super::cancel_on_ctrl_c();

    info!(namespace = %opts.namespace, mount = %opts.mount, "deploying file-system store");
    match deploy(&ctx, &opts, &cancel).await {
        Ok(outcome) => {
            println!(
                "File-system store deployed in namespace '{}' ({}).",
                opts.namespace, opts.mount
            );
            if outcome.reset_performed {
                println!("The storage mount was reset and re-configured.");
            }
            Ok(())
        }
        Err(e @ DeployError::ResetRequired { .. }) => {
            eprintln!("{}", e);
            eprintln!();
            eprintln!("Re-run with --force-reset to proceed.");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
