//! Resolution of incoming group/version/kinds to what the cluster serves.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use kube_core::{ApiResource, GroupVersionKind, TypeMeta};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

/// A group and kind, independent of version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKind {
    /// The group of the kind, or empty string for the core group.
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    pub fn of(gvk: &GroupVersionKind) -> Self {
        Self::new(&gvk.group, &gvk.kind)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Reads the group/version/kind declared by an object's type metadata.
pub fn gvk_of(types: &TypeMeta) -> GroupVersionKind {
    let (group, version) = types
        .api_version
        .split_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    GroupVersionKind::gvk(group, version, &types.kind)
}

/// One version of a kind served by the cluster.
#[derive(Debug, Clone)]
pub struct ApiEntry {
    pub resource: ApiResource,
    pub namespaced: bool,
}

impl ApiEntry {
    pub fn new(resource: ApiResource, namespaced: bool) -> Self {
        Self {
            resource,
            namespaced,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.resource.group, &self.resource.version, &self.resource.kind)
    }

    fn with_version(&self, version: &str) -> Self {
        let mut resource = self.resource.clone();
        resource.version = version.to_owned();
        resource.api_version = if resource.group.is_empty() {
            version.to_owned()
        } else {
            format!("{}/{version}", resource.group)
        };
        Self {
            resource,
            namespaced: self.namespaced,
        }
    }
}

/// Outcome of resolving a group/version/kind.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The cluster accepts this version.
    Supported(ApiEntry),
    /// The kind is deliberately never synchronized.
    Ignored,
    /// The cluster does not serve the kind at all.
    Unsupported,
}

/// Extension point for kinds that must never be synchronized, on top of [`IGNORED_GROUP_KINDS`].
pub trait IgnoreGroupKinds: Send + Sync {
    fn is_ignored(&self, group_kind: &GroupKind) -> bool;
}

impl<F: Fn(&GroupKind) -> bool + Send + Sync> IgnoreGroupKinds for F {
    fn is_ignored(&self, group_kind: &GroupKind) -> bool {
        self(group_kind)
    }
}

/// Kinds that describe cluster runtime state rather than desired state.
pub const IGNORED_GROUP_KINDS: &[(&str, &str)] = &[
    ("", "Binding"),
    ("", "ComponentStatus"),
    ("", "Event"),
    ("", "Node"),
    ("apps", "ControllerRevision"),
    ("coordination.k8s.io", "Lease"),
    ("events.k8s.io", "Event"),
];

/// Deprecated group/version/kinds and the ones that replaced them.
pub const REPLACED_GROUP_VERSION_KINDS: &[((&str, &str, &str), (&str, &str, &str))] = &[
    (("extensions", "v1beta1", "Deployment"), ("apps", "v1", "Deployment")),
    (("extensions", "v1beta1", "DaemonSet"), ("apps", "v1", "DaemonSet")),
    (("extensions", "v1beta1", "ReplicaSet"), ("apps", "v1", "ReplicaSet")),
    (("extensions", "v1beta1", "Ingress"), ("networking.k8s.io", "v1", "Ingress")),
];

/// Maps incoming group/version/kinds onto the ones the cluster serves.
///
/// The table only grows: a version not seen before for a known group/kind is accepted
/// optimistically and remembered, leaving any conversion to the apiserver.
pub struct Resolver {
    table: RwLock<HashMap<GroupKind, BTreeMap<String, ApiEntry>>>,
    replaced: HashMap<GroupVersionKind, GroupVersionKind>,
    ignored: HashSet<GroupKind>,
    extension: Option<Box<dyn IgnoreGroupKinds>>,
}

impl Resolver {
    pub fn new(entries: impl IntoIterator<Item = ApiEntry>) -> Self {
        let resolver = Self {
            table: RwLock::new(HashMap::new()),
            replaced: REPLACED_GROUP_VERSION_KINDS
                .iter()
                .map(|&((g, v, k), (rg, rv, rk))| {
                    (
                        GroupVersionKind::gvk(g, v, k),
                        GroupVersionKind::gvk(rg, rv, rk),
                    )
                })
                .collect(),
            ignored: IGNORED_GROUP_KINDS
                .iter()
                .map(|&(group, kind)| GroupKind::new(group, kind))
                .collect(),
            extension: None,
        };
        resolver.extend(entries);
        resolver
    }

    /// Never synchronize `group_kind`.
    pub fn with_ignored(mut self, group_kind: GroupKind) -> Self {
        self.ignored.insert(group_kind);
        self
    }

    pub fn with_extension(mut self, extension: impl IgnoreGroupKinds + 'static) -> Self {
        self.extension = Some(Box::new(extension));
        self
    }

    /// Adds served versions to the table. Known versions are kept as they are.
    pub fn extend(&self, entries: impl IntoIterator<Item = ApiEntry>) {
        let mut table = self.table.write();
        for entry in entries {
            table
                .entry(GroupKind::new(&entry.resource.group, &entry.resource.kind))
                .or_default()
                .entry(entry.resource.version.clone())
                .or_insert(entry);
        }
    }

    pub fn resolution(&self, incoming: &GroupVersionKind) -> Resolution {
        let gvk = self.replaced.get(incoming).unwrap_or(incoming);
        let group_kind = GroupKind::of(gvk);

        let table = self.table.upgradable_read();
        if let Some(versions) = table.get(&group_kind) {
            if let Some(entry) = versions.get(&gvk.version) {
                return Resolution::Supported(entry.clone());
            }

            if let Some(known) = versions.values().next() {
                let entry = known.with_version(&gvk.version);
                let mut table = RwLockUpgradableReadGuard::upgrade(table);
                table
                    .entry(group_kind.clone())
                    .or_default()
                    .insert(gvk.version.clone(), entry.clone());
                log::info!(
                    "accepting version {} of {group_kind} alongside served versions",
                    gvk.version
                );
                return Resolution::Supported(entry);
            }
        }
        drop(table);

        if self.ignored.contains(&group_kind)
            || self
                .extension
                .as_ref()
                .is_some_and(|extension| extension.is_ignored(&group_kind))
        {
            Resolution::Ignored
        } else {
            Resolution::Unsupported
        }
    }

    /// The group/version/kind the cluster accepts for `incoming`, if any.
    pub fn resolve(&self, incoming: &GroupVersionKind) -> Option<GroupVersionKind> {
        match self.resolution(incoming) {
            Resolution::Supported(entry) => Some(entry.gvk()),
            Resolution::Ignored | Resolution::Unsupported => None,
        }
    }

    pub fn is_namespaced(&self, gvk: &GroupVersionKind) -> bool {
        let gvk = self.replaced.get(gvk).unwrap_or(gvk);
        self.table
            .read()
            .get(&GroupKind::of(gvk))
            .and_then(|versions| versions.get(&gvk.version))
            .is_some_and(|entry| entry.namespaced)
    }
}

mod discovery;
