//! Single-writer resource synchronization.
//!
//! Producers hand [`Submission`]s to a [`Synchronizer`]. A single [`Worker`] drains them in
//! arrival order, applies each desired resource to the cluster and deletes whatever the same
//! host and tag declared previously but no longer does.

use std::{fmt, sync::Arc, time::Duration};

use kube_core::{DynamicObject, GroupVersionKind};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};

use crate::{
    consumer::QualifiedName,
    gvk::{self, Resolver},
    Config,
};

/// Distinguishes independent producers writing into the same host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Plain manifests and kustomizations pulled from git for `host`.
    pub fn git_resources(host: &QualifiedName) -> Self {
        Self(format!("git-k8s:{host}"))
    }

    /// Helm charts pulled from git for `host`.
    pub fn git_charts(host: &QualifiedName) -> Self {
        Self(format!("git-helm:{host}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a synchronized resource. The version is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)?;
        if !self.group.is_empty() {
            write!(f, ".{}", self.group)?;
        }
        match &self.namespace {
            Some(namespace) => write!(f, " {namespace}/{}", self.name),
            None => write!(f, " {}", self.name),
        }
    }
}

/// A resource a producer wants present, with the kind/version it declares.
#[derive(Debug, Clone)]
pub struct DesiredResource {
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
}

impl DesiredResource {
    pub fn new(gvk: GroupVersionKind, object: DynamicObject) -> Self {
        Self { gvk, object }
    }

    /// Reads the kind/version from the object's own type metadata.
    pub fn from_object(object: DynamicObject) -> Option<Self> {
        let gvk = gvk::gvk_of(object.types.as_ref()?);
        Some(Self { gvk, object })
    }
}

/// The complete desired set of one producer (`tag`) for one `host`.
///
/// An empty submission deletes everything previously submitted for the pair.
#[derive(Debug, Clone)]
pub struct Submission {
    pub tag: Tag,
    pub host: QualifiedName,
    pub resources: Vec<DesiredResource>,
}

impl Submission {
    pub fn new(tag: Tag, host: QualifiedName, resources: Vec<DesiredResource>) -> Self {
        Self {
            tag,
            host,
            resources,
        }
    }

    pub fn cleanup(tag: Tag, host: QualifiedName) -> Self {
        Self::new(tag, host, Vec::new())
    }
}

/// A submission in flight, with the channel its report is sent back on.
pub(crate) struct Batch {
    pub(crate) submission: Submission,
    pub(crate) respond_to: oneshot::Sender<BatchReport>,
}

/// Why a single resource of a batch was not synchronized.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("resource kind {0:?} is not served by the cluster")]
    Unsupported(GroupVersionKind),
    #[error("resource of kind {0:?} has no name")]
    MissingName(GroupVersionKind),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

#[derive(Debug)]
pub struct ResourceFailure {
    /// Human readable identity of the failed resource.
    pub resource: String,
    pub error: ApplyError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    PartialSuccess,
    Failed,
}

/// What the worker did with one submission.
#[derive(Debug)]
pub struct BatchReport {
    pub host: QualifiedName,
    pub tag: Tag,
    pub created: Vec<ResourceId>,
    pub updated: Vec<ResourceId>,
    pub unchanged: Vec<ResourceId>,
    pub deleted: Vec<ResourceId>,
    /// Entries of kinds that are never synchronized.
    pub skipped: Vec<GroupVersionKind>,
    pub failures: Vec<ResourceFailure>,
    /// The recorded set for `(host, tag)` after this batch.
    pub tracked: Vec<ResourceId>,
}

impl BatchReport {
    pub(crate) fn new(host: QualifiedName, tag: Tag) -> Self {
        Self {
            host,
            tag,
            created: Vec::new(),
            updated: Vec::new(),
            unchanged: Vec::new(),
            deleted: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            tracked: Vec::new(),
        }
    }

    pub fn outcome(&self) -> Outcome {
        let succeeded =
            self.created.len() + self.updated.len() + self.unchanged.len() + self.deleted.len();
        match (self.failures.is_empty(), succeeded) {
            (true, _) => Outcome::Success,
            (false, 0) => Outcome::Failed,
            (false, _) => Outcome::PartialSuccess,
        }
    }
}

/// Failure to get a submission through the queue.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The queue stayed full; the submission was dropped.
    #[error("timed out after {0:?} handing the submission to the synchronizer")]
    EnqueueTimeout(Duration),
    /// The submission was queued but no report arrived in time. It may still be applied.
    #[error("timed out after {0:?} waiting for the synchronizer to report")]
    AckTimeout(Duration),
    /// The worker has shut down.
    ///
    /// This is what submissions still queued or waiting at shutdown receive. Like
    /// [`AckTimeout`](Self::AckTimeout) it is an unknown outcome: a submission may have been
    /// applied before the worker stopped.
    #[error("synchronizer worker has stopped")]
    Stopped,
}

impl SyncError {
    /// Whether the submission may have been applied despite the error.
    pub fn is_unknown_outcome(&self) -> bool {
        matches!(self, Self::AckTimeout(_) | Self::Stopped)
    }
}

/// Producer handle of the synchronization queue.
#[derive(Clone)]
pub struct Synchronizer {
    sender: mpsc::Sender<Batch>,
    resolver: Arc<Resolver>,
    enqueue_timeout: Duration,
    ack_timeout: Duration,
}

impl Synchronizer {
    pub(crate) fn new(config: &Config, resolver: Arc<Resolver>) -> (Self, mpsc::Receiver<Batch>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let synchronizer = Self {
            sender,
            resolver,
            enqueue_timeout: config.enqueue_timeout,
            ack_timeout: config.ack_timeout,
        };
        (synchronizer, receiver)
    }

    /// Creates a synchronizer together with the worker that drains it.
    pub fn channel<C: Cluster>(
        config: &Config,
        resolver: Arc<Resolver>,
        cluster: C,
    ) -> (Self, Worker<C>) {
        let (synchronizer, receiver) = Self::new(config, Arc::clone(&resolver));
        (synchronizer, Worker::new(resolver, cluster, receiver))
    }

    /// Queues `submission` and waits for the worker's report.
    ///
    /// Both waits are bounded separately. On [`SyncError::EnqueueTimeout`] nothing was queued;
    /// on [`SyncError::AckTimeout`] the submission may still be applied later. Retrying is up
    /// to the caller.
    pub async fn submit(&self, submission: Submission) -> Result<BatchReport, SyncError> {
        let (respond_to, report) = oneshot::channel();
        let batch = Batch {
            submission,
            respond_to,
        };

        match timeout(self.enqueue_timeout, self.sender.send(batch)).await {
            Err(_) => return Err(SyncError::EnqueueTimeout(self.enqueue_timeout)),
            Ok(Err(_)) => return Err(SyncError::Stopped),
            Ok(Ok(())) => log::debug!("queued submission for synchronization"),
        }

        match timeout(self.ack_timeout, report).await {
            Err(_) => Err(SyncError::AckTimeout(self.ack_timeout)),
            Ok(Err(_)) => Err(SyncError::Stopped),
            Ok(Ok(report)) => Ok(report),
        }
    }

    /// Deletes every resource tracked for `host` under `tag`.
    pub async fn cleanup_by_host(
        &self,
        host: QualifiedName,
        tag: Tag,
    ) -> Result<BatchReport, SyncError> {
        log::info!("cleaning up {tag} resources of {host}");
        let result = self.submit(Submission::cleanup(tag, host)).await;
        if let Err(err) = &result {
            log::error!("failed to clean up by host: {err}");
        }
        result
    }

    pub fn resolve(&self, gvk: &GroupVersionKind) -> Option<GroupVersionKind> {
        self.resolver.resolve(gvk)
    }

    pub fn is_namespaced(&self, gvk: &GroupVersionKind) -> bool {
        self.resolver.is_namespaced(gvk)
    }
}

pub mod cluster;
pub use cluster::{Cluster, ClusterError, KubeCluster, Target};
pub mod helm;
mod templates;
mod worker;
pub use worker::Worker;
