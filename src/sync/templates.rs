use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::{cluster::Target, ResourceId, Tag};
use crate::consumer::QualifiedName;

/// A resource recorded as desired for some host and tag.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub(crate) target: Target,
    /// The payload last applied successfully, or `None` if the last attempt failed.
    pub(crate) fingerprint: Option<Value>,
}

pub(crate) type RecordedSet = BTreeMap<ResourceId, Recorded>;

/// The resources each (host, tag) pair most recently declared desired.
///
/// Owned by the worker alone, which is what serializes writes to it.
#[derive(Default)]
pub(crate) struct HostTemplates {
    hosts: HashMap<QualifiedName, HashMap<Tag, RecordedSet>>,
}

impl HostTemplates {
    pub(crate) fn recorded(&self, host: &QualifiedName, tag: &Tag) -> Option<&RecordedSet> {
        self.hosts.get(host)?.get(tag)
    }

    /// Replaces the recorded set of `(host, tag)` with `set`, pruning empty entries.
    pub(crate) fn replace(&mut self, host: &QualifiedName, tag: &Tag, set: RecordedSet) {
        if set.is_empty() {
            if let Some(tags) = self.hosts.get_mut(host) {
                tags.remove(tag);
                if tags.is_empty() {
                    self.hosts.remove(host);
                }
            }
        } else {
            self.hosts
                .entry(host.clone())
                .or_default()
                .insert(tag.clone(), set);
        }
    }

    pub(crate) fn tracked(&self, host: &QualifiedName, tag: &Tag) -> Vec<ResourceId> {
        self.recorded(host, tag)
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default()
    }
}
