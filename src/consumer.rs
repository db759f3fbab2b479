//! Consumer identities and the watch loop that keeps the source registry in step with them.

use std::{collections::BTreeMap, fmt};

use kube_core::Resource;

/// Annotation naming the branch a consumer follows.
pub const ANNOTATION_GIT_BRANCH: &str = "apps.open-cluster-management.io/git-branch";
/// Older spelling of [`ANNOTATION_GIT_BRANCH`], consulted when the former is absent.
pub const ANNOTATION_GITHUB_BRANCH: &str = "apps.open-cluster-management.io/github-branch";
/// Branch followed when neither branch annotation is set.
pub const DEFAULT_BRANCH: &str = "master";

/// Uniquely identifies an object of a known type by namespace and name.
///
/// Used both as the consumer key in the source registry and as the host
/// identity in the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Returns `None` for objects that have not been named yet.
    pub fn from_resource<K: Resource>(resource: &K) -> Option<Self> {
        Some(Self {
            namespace: resource.meta().namespace.clone(),
            name: resource.meta().name.clone()?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Resolves the branch a consumer follows from its annotations.
pub fn branch_of(annotations: Option<&BTreeMap<String, String>>) -> String {
    let lookup = |key: &str| {
        annotations
            .and_then(|annotations| annotations.get(key))
            .filter(|branch| !branch.is_empty())
    };

    lookup(ANNOTATION_GIT_BRANCH)
        .or_else(|| lookup(ANNOTATION_GITHUB_BRANCH))
        .cloned()
        .unwrap_or_else(|| DEFAULT_BRANCH.to_owned())
}

pub mod watch;
pub use watch::track;
