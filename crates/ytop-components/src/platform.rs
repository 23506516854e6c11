//! Platform resource operations
//!
//! The reconciliation core only needs a handful of calls against the
//! Kubernetes API. They are collected behind [`PlatformClient`] so component
//! logic can be exercised against mocks or the in-memory fake.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use ytop_common::consts::FIELD_MANAGER;
use ytop_common::retry::{retry_with_backoff, RetryConfig};
use ytop_common::{Error, Result};

/// Kubernetes operations used by servers and balancing services.
///
/// Reads return `Ok(None)` for objects that do not exist. Writes are
/// idempotent server-side applies and are attempted exactly once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Get a stateful set
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    /// Create or update a stateful set
    async fn apply_stateful_set(&self, stateful_set: &StatefulSet) -> Result<()>;

    /// Change only the replica count of a stateful set
    async fn scale_stateful_set(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// Get a service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Create or update a service
    async fn apply_service(&self, service: &Service) -> Result<()>;

    /// Delete a service; a missing service is not an error
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get a config map
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create or update a config map
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
}

/// [`PlatformClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
    retry: RetryConfig,
}

impl KubePlatform {
    /// Create a platform client with the default read retry policy
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy used for reads
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let operation = format!("get {}/{}/{}", K::kind(&()), namespace, name);
        retry_with_backoff(&self.retry, &operation, || {
            let api = api.clone();
            async move { api.get_opt(name).await.map_err(Error::from) }
        })
        .await
    }

    async fn apply<K>(&self, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let meta = object.meta();
        let (Some(name), Some(namespace)) = (meta.name.as_deref(), meta.namespace.as_deref())
        else {
            return Err(Error::internal_with_context(
                "platform",
                format!("{} is missing name or namespace", K::kind(&())),
            ));
        };

        debug!(kind = %K::kind(&()), namespace, name, "applying");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(object),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        self.get_opt(namespace, name).await
    }

    async fn apply_stateful_set(&self, stateful_set: &StatefulSet) -> Result<()> {
        self.apply(stateful_set).await
    }

    async fn scale_stateful_set(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        debug!(namespace, name, replicas, "scaling stateful set");
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.get_opt(namespace, name).await
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        self.apply(service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        debug!(namespace, name, "deleting service");
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.get_opt(namespace, name).await
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.apply(config_map).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(selector);
        let operation = format!("list pods {}/{}", namespace, selector);
        retry_with_backoff(&self.retry, &operation, || {
            let api = api.clone();
            let params = params.clone();
            async move { api.list(&params).await.map_err(Error::from) }
        })
        .await
        .map(|list| list.items)
    }
}
