//! Cluster resource store
//!
//! [`ResourceStore`] is the seam between the reconciler and the API server.
//! Reads return `Ok(None)` for a missing object so callers can tell "absent"
//! apart from a failed request.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use snapvault_common::kube_utils::is_not_found;
use snapvault_common::Error;

/// Typed get/create/update access to the resources the store owns
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a ConfigMap, `None` if it does not exist
    async fn get_config_map(&self, name: &str, namespace: &str)
        -> Result<Option<ConfigMap>, Error>;
    /// Create a ConfigMap
    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error>;
    /// Replace a ConfigMap (the object carries its resourceVersion)
    async fn update_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error>;

    /// Get a Secret, `None` if it does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;
    /// Create a Secret
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error>;
    /// Replace a Secret
    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error>;

    /// Get a Deployment, `None` if it does not exist
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;
    /// Create a Deployment
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;
    /// Replace a Deployment
    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Get a Service, `None` if it does not exist
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;
    /// Create a Service
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;
    /// Replace a Service
    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, Error>;

    /// Delete a Pod. Deleting a pod that is already gone succeeds.
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error>;
}

/// [`ResourceStore`] backed by the Kubernetes API
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K>(&self, namespace: &str, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self
            .api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn replace<K>(&self, namespace: &str, obj: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = obj.name_any();
        Ok(self
            .api::<K>(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        self.get(name, namespace).await
    }

    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error> {
        self.create(namespace, cm).await
    }

    async fn update_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error> {
        self.replace(namespace, cm).await
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        self.get(name, namespace).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        self.create(namespace, secret).await
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        self.replace(namespace, secret).await
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get(name, namespace).await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        self.create(namespace, deployment).await
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, Error> {
        self.replace(namespace, deployment).await
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        self.get(name, namespace).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        self.create(namespace, service).await
    }

    async fn update_service(&self, namespace: &str, service: &Service) -> Result<Service, Error> {
        self.replace(namespace, service).await
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<Pod> = self.api(namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(pod = %name, namespace = %namespace, "pod already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
