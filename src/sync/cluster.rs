//! The cluster the worker writes to.

use std::future::Future;

use kube_client::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Api, Client,
};
use kube_core::{ApiResource, DynamicObject};
use thiserror::Error;

/// Where a resource lives: its served type, namespace and name.
#[derive(Debug, Clone)]
pub struct Target {
    pub resource: ApiResource,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object does not exist. Callers treat this as recoverable.
    #[error("object not found")]
    NotFound,
    #[error("cluster rejected the request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Kube(kube_client::Error),
}

impl From<kube_client::Error> for ClusterError {
    fn from(err: kube_client::Error) -> Self {
        match err {
            kube_client::Error::Api(response) if response.code == 404 => Self::NotFound,
            err => Self::Kube(err),
        }
    }
}

/// Object access used by the worker.
pub trait Cluster: Send + Sync + 'static {
    fn get(
        &self,
        target: &Target,
    ) -> impl Future<Output = Result<DynamicObject, ClusterError>> + Send;

    fn create(
        &self,
        target: &Target,
        object: &DynamicObject,
    ) -> impl Future<Output = Result<DynamicObject, ClusterError>> + Send;

    fn update(
        &self,
        target: &Target,
        object: &DynamicObject,
    ) -> impl Future<Output = Result<DynamicObject, ClusterError>> + Send;

    /// Deleting an object that does not exist reports [`ClusterError::NotFound`].
    fn delete(&self, target: &Target) -> impl Future<Output = Result<(), ClusterError>> + Send;
}

/// [`Cluster`] backed by the apiserver. Updates are server-side applies owned by one field manager.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, target: &Target) -> Api<DynamicObject> {
        match &target.namespace {
            Some(namespace) => {
                Api::namespaced_with(self.client.clone(), namespace, &target.resource)
            }
            None => Api::all_with(self.client.clone(), &target.resource),
        }
    }
}

impl Cluster for KubeCluster {
    async fn get(&self, target: &Target) -> Result<DynamicObject, ClusterError> {
        Ok(self.api(target).get(&target.name).await?)
    }

    async fn create(
        &self,
        target: &Target,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        };
        Ok(self.api(target).create(&params, object).await?)
    }

    async fn update(
        &self,
        target: &Target,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let params = PatchParams::apply(&self.field_manager).force();
        Ok(self
            .api(target)
            .patch(&target.name, &params, &Patch::Apply(object))
            .await?)
    }

    async fn delete(&self, target: &Target) -> Result<(), ClusterError> {
        self.api(target)
            .delete(&target.name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}
