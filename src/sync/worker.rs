use std::{collections::HashMap, sync::Arc};

use kube_core::{DynamicObject, GroupVersionKind, TypeMeta};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    cluster::{Cluster, ClusterError, Target},
    helm,
    templates::{HostTemplates, Recorded, RecordedSet},
    ApplyError, Batch, BatchReport, DesiredResource, ResourceFailure, ResourceId, Submission,
};
use crate::{
    consumer::QualifiedName,
    gvk::{Resolution, Resolver},
};

/// The single consumer of a [`Synchronizer`](super::Synchronizer)'s queue.
///
/// Batches are reconciled one at a time in arrival order, so the host templates need no lock.
pub struct Worker<C> {
    resolver: Arc<Resolver>,
    cluster: C,
    receiver: mpsc::Receiver<Batch>,
    templates: HostTemplates,
}

enum Prepared {
    Ready(ResourceId, Target, DynamicObject),
    Skipped(GroupVersionKind),
    Failed(ResourceFailure),
}

enum Applied {
    Created,
    Updated,
    Unchanged,
}

impl<C: Cluster> Worker<C> {
    pub(crate) fn new(
        resolver: Arc<Resolver>,
        cluster: C,
        receiver: mpsc::Receiver<Batch>,
    ) -> Self {
        Self {
            resolver,
            cluster,
            receiver,
            templates: HostTemplates::default(),
        }
    }

    /// Drains the queue until `cancel` fires or every producer handle is dropped.
    ///
    /// The batch being reconciled when `cancel` fires is finished and acknowledged.
    /// Batches still queued are dropped, and their producers see
    /// [`SyncError::Stopped`](super::SyncError::Stopped).
    pub async fn run(mut self, cancel: CancellationToken) {
        log::info!("synchronizer worker started");

        loop {
            let batch = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                batch = self.receiver.recv() => batch,
            };
            let Some(Batch {
                submission,
                respond_to,
            }) = batch
            else {
                break;
            };

            let report = self.reconcile(submission).await;
            if let Err(report) = respond_to.send(report) {
                log::warn!(
                    "producer of {} for {} stopped waiting for its report",
                    report.tag,
                    report.host
                );
            }
        }

        log::info!("synchronizer worker stopped");
    }

    /// Applies one submission and replaces the recorded set of its (host, tag) pair.
    pub(crate) async fn reconcile(&mut self, submission: Submission) -> BatchReport {
        let Submission {
            tag,
            host,
            resources,
        } = submission;
        let mut report = BatchReport::new(host.clone(), tag.clone());

        // Producer order is kept; a repeated resource takes the place of its first occurrence.
        let mut desired: Vec<(ResourceId, Target, DynamicObject)> = Vec::new();
        let mut positions = HashMap::new();
        for resource in resources {
            match self.prepare(&host, resource) {
                Prepared::Ready(id, target, object) => match positions.get(&id) {
                    Some(&position) => desired[position] = (id, target, object),
                    None => {
                        positions.insert(id.clone(), desired.len());
                        desired.push((id, target, object));
                    }
                },
                Prepared::Skipped(gvk) => {
                    log::debug!("skipping ignored kind {gvk:?} for {host}");
                    report.skipped.push(gvk);
                }
                Prepared::Failed(failure) => {
                    log::warn!(
                        "cannot synchronize {} for {host}: {}",
                        failure.resource,
                        failure.error
                    );
                    report.failures.push(failure);
                }
            }
        }

        let previous = self.templates.recorded(&host, &tag);
        let mut next = RecordedSet::new();

        for (id, target, object) in desired {
            let prior = previous
                .and_then(|set| set.get(&id))
                .and_then(|recorded| recorded.fingerprint.as_ref());
            let mut fingerprint = serde_json::to_value(&object).ok();

            match apply(&self.cluster, &target, &object, prior, fingerprint.as_ref()).await {
                Ok(Applied::Created) => {
                    log::debug!("created {id} for {host}");
                    report.created.push(id.clone());
                }
                Ok(Applied::Updated) => {
                    log::debug!("updated {id} for {host}");
                    report.updated.push(id.clone());
                }
                Ok(Applied::Unchanged) => report.unchanged.push(id.clone()),
                Err(err) => {
                    log::warn!("failed to apply {id} for {host}: {err}");
                    fingerprint = None;
                    report.failures.push(ResourceFailure {
                        resource: id.to_string(),
                        error: ApplyError::Cluster(err),
                    });
                }
            }

            next.insert(
                id,
                Recorded {
                    target,
                    fingerprint,
                },
            );
        }

        let orphans: Vec<_> = previous
            .into_iter()
            .flatten()
            .filter(|(id, _)| !next.contains_key(*id))
            .map(|(id, recorded)| (id.clone(), recorded.target.clone()))
            .collect();
        for (id, target) in orphans {
            match self.cluster.delete(&target).await {
                Ok(()) | Err(ClusterError::NotFound) => {
                    log::info!("deleted {id}, no longer desired by {tag}");
                    report.deleted.push(id);
                }
                Err(err) => {
                    // Still live, so it stays recorded and the next submission retries the delete.
                    log::warn!("failed to delete {id} for {host}: {err}");
                    report.failures.push(ResourceFailure {
                        resource: id.to_string(),
                        error: ApplyError::Cluster(err),
                    });
                    next.insert(
                        id,
                        Recorded {
                            target,
                            fingerprint: None,
                        },
                    );
                }
            }
        }

        report.tracked = next.keys().cloned().collect();
        self.templates.replace(&host, &tag, next);
        report
    }

    fn prepare(&self, host: &QualifiedName, resource: DesiredResource) -> Prepared {
        let DesiredResource { gvk, mut object } = resource;

        let entry = match self.resolver.resolution(&gvk) {
            Resolution::Supported(entry) => entry,
            Resolution::Ignored => return Prepared::Skipped(gvk),
            Resolution::Unsupported => {
                return Prepared::Failed(ResourceFailure {
                    resource: describe(&gvk, &object),
                    error: ApplyError::Unsupported(gvk),
                })
            }
        };

        let Some(name) = object.metadata.name.clone() else {
            return Prepared::Failed(ResourceFailure {
                resource: describe(&gvk, &object),
                error: ApplyError::MissingName(gvk),
            });
        };

        let namespace = if entry.namespaced {
            host.namespace
                .clone()
                .or_else(|| object.metadata.namespace.clone())
        } else {
            None
        };
        object.metadata.namespace = namespace.clone();
        object.types = Some(TypeMeta {
            api_version: entry.resource.api_version.clone(),
            kind: entry.resource.kind.clone(),
        });

        let id = ResourceId {
            group: entry.resource.group.clone(),
            kind: entry.resource.kind.clone(),
            namespace: namespace.clone(),
            name: name.clone(),
        };
        let target = Target {
            resource: entry.resource,
            namespace,
            name,
        };
        Prepared::Ready(id, target, object)
    }
}

fn describe(gvk: &GroupVersionKind, object: &DynamicObject) -> String {
    format!(
        "{} {}",
        gvk.kind,
        object.metadata.name.as_deref().unwrap_or("<unnamed>")
    )
}

/// Creates `object` if it is missing, otherwise updates it unless nothing changed.
async fn apply<C: Cluster>(
    cluster: &C,
    target: &Target,
    object: &DynamicObject,
    prior: Option<&Value>,
    fingerprint: Option<&Value>,
) -> Result<Applied, ClusterError> {
    let live = match cluster.get(target).await {
        Ok(live) => live,
        Err(ClusterError::NotFound) => {
            cluster.create(target, object).await?;
            return Ok(Applied::Created);
        }
        Err(err) => return Err(err),
    };

    let unchanged = (prior.is_some() && prior == fingerprint)
        || (helm::is_helm_release(&target.resource) && helm::release_unchanged(&live, object));
    if unchanged {
        return Ok(Applied::Unchanged);
    }

    cluster.update(target, object).await?;
    Ok(Applied::Updated)
}
