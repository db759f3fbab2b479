//! kube-subsync keeps clusters in step with subscriptions to remote manifest sources.
//!
//! It is made of two subsystems that only meet through the consumers' persisted markers:
//!
//! - The [source registry](source::SourceRegistry) deduplicates polling of remote sources.
//!   However many consumers follow the same repository, branch and credentials, the
//!   [poller](source::poll) fetches the change marker (e.g. commit id) once per tick and
//!   records a change exactly once on every consumer of that branch.
//! - The [synchronizer](sync::Synchronizer) queues batches of desired resources from many
//!   producers to a single [worker](sync::Worker), which resolves each resource to a kind the
//!   cluster serves, applies it, and deletes what the same host and tag declared before but
//!   no longer does.
//!
//! Fetching manifests, rendering them and persisting markers are left to the
//! [`MarkerFetcher`](source::MarkerFetcher), [`MarkerStore`](source::MarkerStore) and
//! [`Cluster`](sync::Cluster) collaborators.

pub mod config;
pub use config::Config;
pub mod consumer;
pub use consumer::QualifiedName;
pub mod gvk;
mod runner;
pub use runner::{start, Runtime};
pub mod source;
pub mod sync;
