//! Source-change tracking.
//!
//! A [`SourceRegistry`] deduplicates polling of remote sources: however many consumers
//! watch the same repository, branch and credentials, the [`poll`] loop fetches the change
//! marker once per tick and fans the change out to every consumer of that branch.

use std::{fmt, future::Future};

use thiserror::Error;

use crate::consumer::QualifiedName;

/// Credentials used to reach a source.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &if self.secret.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

/// What a consumer watches: one branch of one repository, reached with some credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub url: String,
    pub branch: String,
    pub credentials: Credentials,
}

impl SourceRef {
    pub fn new(
        url: impl Into<String>,
        branch: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            credentials,
        }
    }

    /// The identity of the source this reference points into.
    pub fn key(&self) -> SourceKey {
        SourceKey {
            url: self.url.clone(),
            username: (!self.credentials.secret.is_empty())
                .then(|| self.credentials.username.clone()),
        }
    }
}

/// Identity of a source: the repository URL plus the credential identity used to reach it.
///
/// The username only counts when a secret accompanies it,
/// so anonymous access to a URL is one source regardless of the username given.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    pub url: String,
    pub username: Option<String>,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(username) => write!(f, "{} (as {username})", self.url),
            None => f.write_str(&self.url),
        }
    }
}

/// Fetches change markers (e.g. commit ids) from remote sources.
pub trait MarkerFetcher: Send + Sync + 'static {
    /// Reports the current marker of `source` without materializing its contents.
    fn latest_marker(
        &self,
        source: &SourceRef,
    ) -> impl Future<Output = Result<String, FetchError>> + Send;

    /// Materializes `source` locally and reports the marker that was checked out.
    ///
    /// Used for consumers the registry does not track yet.
    fn checkout(
        &self,
        source: &SourceRef,
    ) -> impl Future<Output = Result<String, FetchError>> + Send {
        self.latest_marker(source)
    }
}

/// Persists a consumer's latest change marker onto the consumer's own record.
pub trait MarkerStore: Send + Sync + 'static {
    fn record_marker(
        &self,
        consumer: &QualifiedName,
        marker: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Failure to read a marker from a remote source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication to {url} was rejected")]
    Unauthorized { url: String },
    #[error("branch {branch} does not exist in {url}")]
    UnknownBranch { url: String, branch: String },
    #[error("failed to reach {url}: {message}")]
    Remote { url: String, message: String },
    #[error("failed to read marker: {0}")]
    Other(String),
}

/// Failure to persist a marker onto a consumer record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("consumer {0} no longer exists")]
    NotFound(QualifiedName),
    #[error("failed to update consumer record: {0}")]
    Kube(#[source] kube_client::Error),
}

mod registry;
pub use registry::{BranchView, SourceRegistry, TickReport};
mod poller;
pub use poller::poll;
pub mod kube_store;
pub use kube_store::KubeMarkerStore;
