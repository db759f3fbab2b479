//! Marker persistence onto the consumer objects themselves.

use kube_client::{
    api::{Patch, PatchParams},
    Api, Client,
};
use kube_core::{ApiResource, DynamicObject};
use serde_json::json;

use super::{MarkerStore, StoreError};
use crate::consumer::QualifiedName;

/// Annotation holding the latest marker seen for a consumer.
pub const ANNOTATION_GIT_COMMIT: &str = "apps.open-cluster-management.io/git-commit";

/// Records markers as an annotation on the consumer objects of type `resource`.
#[derive(Clone)]
pub struct KubeMarkerStore {
    client: Client,
    resource: ApiResource,
    annotation: String,
}

impl KubeMarkerStore {
    pub fn new(client: Client, resource: ApiResource) -> Self {
        Self {
            client,
            resource,
            annotation: ANNOTATION_GIT_COMMIT.to_owned(),
        }
    }

    /// Writes markers under `annotation` instead of [`ANNOTATION_GIT_COMMIT`].
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = annotation.into();
        self
    }

    fn api(&self, consumer: &QualifiedName) -> Api<DynamicObject> {
        match &consumer.namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        }
    }
}

impl MarkerStore for KubeMarkerStore {
    async fn record_marker(
        &self,
        consumer: &QualifiedName,
        marker: &str,
    ) -> Result<(), StoreError> {
        let patch = json!({
            "metadata": {
                "annotations": { self.annotation.as_str(): marker },
            },
        });

        match self
            .api(consumer)
            .patch(&consumer.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube_client::Error::Api(response)) if response.code == 404 => {
                Err(StoreError::NotFound(consumer.clone()))
            }
            Err(err) => Err(StoreError::Kube(err)),
        }
    }
}
