//! Idempotent ensure-or-update for each managed resource kind
//!
//! Every `ensure_*` fetches by name, creates the desired object when it is
//! absent, and otherwise copies an explicit allow-list of owned fields onto
//! the live object before replacing it. Fields outside the allow-list are
//! left as the cluster has them.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use tracing::{debug, info};

use snapvault_common::error::ResultExt;
use snapvault_common::{Error, Result};

use crate::config::DeployOptions;
use crate::credentials::{CredentialFingerprint, Credentials};
use crate::resources;
use crate::store::ResourceStore;

/// Create the mount ConfigMap or replace its data
pub async fn ensure_config_map(
    store: &dyn ResourceStore,
    opts: &DeployOptions,
) -> Result<ConfigMap> {
    let desired = resources::config_map(opts);
    let name = &opts.names.config_map;
    let ns = &opts.namespace;

    let existing = store
        .get_config_map(name, ns)
        .await
        .context("failed to get existing configmap")?;

    match existing {
        None => {
            info!(configmap = %name, namespace = %ns, mount = %opts.mount, "creating configmap");
            store
                .create_config_map(ns, &desired)
                .await
                .context("failed to create configmap")
        }
        Some(mut live) => {
            live.data = desired.data;
            debug!(configmap = %name, namespace = %ns, "updating configmap");
            store
                .update_config_map(ns, &live)
                .await
                .context("failed to update configmap")
        }
    }
}

/// Return the stored credentials, creating them on first use
///
/// An existing credential Secret is never modified.
pub async fn ensure_secret(store: &dyn ResourceStore, opts: &DeployOptions) -> Result<Credentials> {
    let name = &opts.names.secret;
    let ns = &opts.namespace;

    let existing = store
        .get_secret(name, ns)
        .await
        .context("failed to get existing secret")?;

    if let Some(live) = existing {
        debug!(secret = %name, namespace = %ns, "credentials secret exists");
        return Credentials::from_secret(&live).context("failed to read existing secret");
    }

    let credentials = Credentials::generate();
    info!(secret = %name, namespace = %ns, "creating credentials secret");
    store
        .create_secret(ns, &resources::credentials_secret(opts, &credentials))
        .await
        .context("failed to create secret")?;
    Ok(credentials)
}

/// Create the server Deployment or merge owned fields onto the live one
pub async fn ensure_deployment(
    store: &dyn ResourceStore,
    opts: &DeployOptions,
    fingerprint: &CredentialFingerprint,
) -> Result<Deployment> {
    let desired = resources::deployment(opts, fingerprint);
    let name = &opts.names.deployment;
    let ns = &opts.namespace;

    let existing = store
        .get_deployment(name, ns)
        .await
        .context("failed to get existing deployment")?;

    match existing {
        None => {
            info!(
                deployment = %name,
                namespace = %ns,
                image = %opts.server_image,
                "creating deployment"
            );
            store
                .create_deployment(ns, &desired)
                .await
                .context("failed to create deployment")
        }
        Some(live) => {
            let merged = merge_deployment(live, desired, opts)
                .context("failed to merge deployment")?;
            debug!(deployment = %name, namespace = %ns, "updating deployment");
            store
                .update_deployment(ns, &merged)
                .await
                .context("failed to update deployment")
        }
    }
}

/// Copy the owned fields of `desired` onto `live`
///
/// Owned fields are the replica count, the fingerprint annotation, the server
/// container's image, probes and env, and the pod volumes. A live Deployment
/// without containers is overwritten with `desired`, keeping live metadata.
pub fn merge_deployment(
    mut live: Deployment,
    desired: Deployment,
    opts: &DeployOptions,
) -> Result<Deployment> {
    let names = &opts.names;

    let live_has_containers = live
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .is_some_and(|p| !p.containers.is_empty());
    if !live_has_containers {
        debug!(deployment = %names.deployment, "live deployment has no containers, overwriting");
        return Ok(Deployment {
            metadata: live.metadata,
            ..desired
        });
    }

    let desired_spec = desired.spec.ok_or_else(|| {
        Error::internal_with_context("merge_deployment", "desired deployment has no spec")
    })?;
    let desired_pod = desired_spec.template.spec.ok_or_else(|| {
        Error::internal_with_context("merge_deployment", "desired deployment has no pod spec")
    })?;
    let desired_container = desired_pod
        .containers
        .into_iter()
        .find(|c| c.name == names.server_container)
        .ok_or_else(|| {
            Error::internal_with_context(
                "merge_deployment",
                format!("desired deployment has no {} container", names.server_container),
            )
        })?;
    let fingerprint = desired_spec
        .template
        .metadata
        .and_then(|m| m.annotations)
        .and_then(|mut a| a.remove(&names.fingerprint_annotation));

    // live_has_containers guarantees spec and pod spec are present
    let Some(spec) = live.spec.as_mut() else {
        return Err(Error::internal_with_context(
            "merge_deployment",
            "live deployment has no spec",
        ));
    };
    spec.replicas = desired_spec.replicas;

    if let Some(fingerprint) = fingerprint {
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(names.fingerprint_annotation.clone(), fingerprint);
    }

    let Some(pod) = spec.template.spec.as_mut() else {
        return Err(Error::internal_with_context(
            "merge_deployment",
            "live deployment has no pod spec",
        ));
    };
    let container = pod
        .containers
        .iter_mut()
        .find(|c| c.name == names.server_container)
        .ok_or_else(|| {
            Error::validation_for_field(
                &names.deployment,
                "spec.template.spec.containers",
                format!("container {} not found", names.server_container),
            )
        })?;
    container.image = desired_container.image;
    container.liveness_probe = desired_container.liveness_probe;
    container.readiness_probe = desired_container.readiness_probe;
    container.env = desired_container.env;
    pod.volumes = desired_pod.volumes;

    Ok(live)
}

/// Create the Service or replace its port list
pub async fn ensure_service(store: &dyn ResourceStore, opts: &DeployOptions) -> Result<Service> {
    let desired = resources::service(opts);
    let name = &opts.names.service;
    let ns = &opts.namespace;

    let existing = store
        .get_service(name, ns)
        .await
        .context("failed to get existing service")?;

    match existing {
        None => {
            info!(service = %name, namespace = %ns, "creating service");
            store
                .create_service(ns, &desired)
                .await
                .context("failed to create service")
        }
        Some(mut live) => {
            let ports = desired.spec.and_then(|s| s.ports);
            live.spec.get_or_insert_with(Default::default).ports = ports;
            debug!(service = %name, namespace = %ns, "updating service");
            store
                .update_service(ns, &live)
                .await
                .context("failed to update service")
        }
    }
}

/// Scale the server Deployment to zero replicas, if it exists
pub async fn scale_down_deployment(store: &dyn ResourceStore, opts: &DeployOptions) -> Result<()> {
    let name = &opts.names.deployment;
    let ns = &opts.namespace;

    let existing = store
        .get_deployment(name, ns)
        .await
        .context("failed to get existing deployment")?;

    let Some(mut live) = existing else {
        debug!(deployment = %name, namespace = %ns, "no deployment to scale down");
        return Ok(());
    };

    live.spec.get_or_insert_with(Default::default).replicas = Some(0);
    info!(deployment = %name, namespace = %ns, "scaling deployment to zero");
    store
        .update_deployment(ns, &live)
        .await
        .context("failed to scale down deployment")?;
    Ok(())
}

/// Create or refresh the registry pull secret when a registry is configured
pub async fn ensure_registry_secret(store: &dyn ResourceStore, opts: &DeployOptions) -> Result<()> {
    let Some(desired) = resources::registry_secret(opts) else {
        debug!(namespace = %opts.namespace, "no private registry configured");
        return Ok(());
    };
    let name = &opts.names.registry_secret;
    let ns = &opts.namespace;

    let existing = store
        .get_secret(name, ns)
        .await
        .context("failed to get existing registry secret")?;

    match existing {
        None => {
            info!(secret = %name, namespace = %ns, "creating registry pull secret");
            store
                .create_secret(ns, &desired)
                .await
                .context("failed to create registry secret")?;
        }
        Some(mut live) => {
            live.type_ = desired.type_;
            live.data = desired.data;
            debug!(secret = %name, namespace = %ns, "updating registry pull secret");
            store
                .update_secret(ns, &live)
                .await
                .context("failed to update registry secret")?;
        }
    }
    Ok(())
}
