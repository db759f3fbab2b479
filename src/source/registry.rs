use std::collections::{hash_map, BTreeSet, HashMap};

use parking_lot::Mutex;

use super::{Credentials, FetchError, MarkerFetcher, MarkerStore, SourceKey, SourceRef};
use crate::consumer::QualifiedName;

/// Shared registry of watched sources and the consumers of each branch.
///
/// `state` is only ever held for short, synchronous sections. `registration` serializes
/// [`register_consumer`](Self::register_consumer) across the seeding fetch of a new branch,
/// so concurrent registrations of the same branch fetch once.
pub struct SourceRegistry<F, S> {
    fetcher: F,
    store: S,
    state: Mutex<State>,
    registration: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct State {
    consumers: HashMap<QualifiedName, Registered>,
    sources: HashMap<SourceKey, Source>,
}

#[derive(Clone)]
struct Registered {
    source: SourceKey,
    branch: String,
}

struct Source {
    url: String,
    branches: HashMap<String, BranchState>,
}

struct BranchState {
    marker: String,
    credentials: Credentials,
    consumers: BTreeSet<QualifiedName>,
}

impl State {
    fn branch(&self, source: &SourceKey, branch: &str) -> Option<&BranchState> {
        self.sources.get(source)?.branches.get(branch)
    }

    fn branch_mut(&mut self, source: &SourceKey, branch: &str) -> Option<&mut BranchState> {
        self.sources.get_mut(source)?.branches.get_mut(branch)
    }

    fn marker_of(&self, consumer: &QualifiedName) -> Option<String> {
        let registered = self.consumers.get(consumer)?;
        self.branch(&registered.source, &registered.branch)
            .map(|branch| branch.marker.clone())
    }
}

/// A point-in-time view of one registered branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchView {
    pub source: SourceKey,
    pub branch: String,
    pub marker: String,
    pub consumers: Vec<QualifiedName>,
}

/// Outcome of one [`poll_tick`](SourceRegistry::poll_tick).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Branches whose marker was fetched successfully.
    pub fetched: usize,
    /// Branches whose fetch failed; they are retried on the next tick.
    pub failed: usize,
    /// Branches whose marker changed.
    pub changed: usize,
    /// Consumer records successfully updated with a new marker.
    pub notified: usize,
}

impl<F: MarkerFetcher, S: MarkerStore> SourceRegistry<F, S> {
    pub fn new(fetcher: F, store: S) -> Self {
        Self {
            fetcher,
            store,
            state: Mutex::new(State::default()),
            registration: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers `consumer` as watching `source` and returns the branch's current marker.
    ///
    /// A consumer that is already registered is left as is, even if `source` differs from
    /// the one it was registered with; deregister it first to move it. A branch seen for the
    /// first time is seeded with one fetch. If that fetch fails the marker stays empty until
    /// the next successful poll. A non-empty marker is recorded on the new consumer.
    pub async fn register_consumer(&self, consumer: QualifiedName, source: SourceRef) -> String {
        let _registration = self.registration.lock().await;
        let key = source.key();

        let joined = {
            let mut state = self.state.lock();
            if let Some(marker) = state.marker_of(&consumer) {
                return marker;
            }
            match state.branch_mut(&key, &source.branch) {
                Some(branch) => {
                    branch.consumers.insert(consumer.clone());
                    let marker = branch.marker.clone();
                    state.consumers.insert(
                        consumer.clone(),
                        Registered {
                            source: key.clone(),
                            branch: source.branch.clone(),
                        },
                    );
                    Some(marker)
                }
                None => None,
            }
        };
        if let Some(marker) = joined {
            log::info!("registered {consumer} to existing branch at marker {marker:?}");
            self.record_seed(&consumer, &marker).await;
            return marker;
        }

        let marker = match self.fetcher.latest_marker(&source).await {
            Ok(marker) => marker,
            Err(err) => {
                log::error!(
                    "failed to seed marker of {key} branch {}: {err}",
                    source.branch
                );
                String::new()
            }
        };

        {
            let mut state = self.state.lock();
            state
                .sources
                .entry(key.clone())
                .or_insert_with(|| Source {
                    url: source.url.clone(),
                    branches: HashMap::new(),
                })
                .branches
                .insert(
                    source.branch.clone(),
                    BranchState {
                        marker: marker.clone(),
                        credentials: source.credentials,
                        consumers: BTreeSet::from([consumer.clone()]),
                    },
                );
            state.consumers.insert(
                consumer.clone(),
                Registered {
                    source: key.clone(),
                    branch: source.branch.clone(),
                },
            );
        }
        log::info!(
            "registered {consumer} to new branch {} of {key} at marker {marker:?}",
            source.branch
        );
        self.record_seed(&consumer, &marker).await;
        marker
    }

    async fn record_seed(&self, consumer: &QualifiedName, marker: &str) {
        if marker.is_empty() {
            return;
        }
        if let Err(err) = self.store.record_marker(consumer, marker).await {
            log::warn!("failed to record marker {marker:?} on {consumer}: {err}");
        }
    }

    /// Removes `consumer` from its branch, pruning the branch and source once nobody watches them.
    ///
    /// Waits for a registration in progress to finish first, so a consumer deregistered while it
    /// is being seeded ends up unregistered. Returns whether the consumer was registered.
    pub async fn deregister_consumer(&self, consumer: &QualifiedName) -> bool {
        let _registration = self.registration.lock().await;
        let mut state = self.state.lock();
        let Some(registered) = state.consumers.remove(consumer) else {
            return false;
        };

        if let hash_map::Entry::Occupied(mut source) = state.sources.entry(registered.source) {
            if let hash_map::Entry::Occupied(mut branch) =
                source.get_mut().branches.entry(registered.branch)
            {
                branch.get_mut().consumers.remove(consumer);
                if branch.get().consumers.is_empty() {
                    log::info!("no consumers left on branch {}, pruning", branch.key());
                    branch.remove();
                }
            }
            if source.get().branches.is_empty() {
                log::info!("no branches left on {}, pruning", source.key());
                source.remove();
            }
        }

        log::info!("deregistered {consumer}");
        true
    }

    /// Fetches every registered branch once and notifies the consumers of branches that changed.
    ///
    /// No lock is held while fetching or notifying.
    pub async fn poll_tick(&self) -> TickReport {
        let targets: Vec<_> = {
            let state = self.state.lock();
            state
                .sources
                .iter()
                .flat_map(|(key, source)| {
                    source.branches.iter().map(move |(name, branch)| {
                        (
                            key.clone(),
                            SourceRef::new(&source.url, name, branch.credentials.clone()),
                        )
                    })
                })
                .collect()
        };

        let mut report = TickReport::default();
        for (key, source) in targets {
            let fetched = match self.fetcher.latest_marker(&source).await {
                Ok(marker) => marker,
                Err(err) => {
                    log::error!(
                        "failed to fetch latest marker of {key} branch {}: {err}",
                        source.branch
                    );
                    report.failed += 1;
                    continue;
                }
            };
            report.fetched += 1;

            let consumers: Vec<_> = {
                let mut state = self.state.lock();
                let Some(branch) = state.branch_mut(&key, &source.branch) else {
                    log::debug!("branch {} of {key} deregistered during fetch", source.branch);
                    continue;
                };
                if !branch.marker.is_empty() && branch.marker == fetched {
                    continue;
                }
                log::info!(
                    "{key} branch {} moved from {:?} to {fetched:?}",
                    source.branch,
                    branch.marker
                );
                branch.marker = fetched.clone();
                branch.consumers.iter().cloned().collect()
            };
            report.changed += 1;

            for consumer in consumers {
                match self.store.record_marker(&consumer, &fetched).await {
                    Ok(()) => {
                        report.notified += 1;
                        log::info!("updated marker of {consumer} to {fetched:?}");
                    }
                    Err(err) => {
                        log::warn!("failed to record marker {fetched:?} on {consumer}: {err}");
                    }
                }
            }
        }

        log::debug!("poll tick finished: {report:?}");
        report
    }

    /// The marker of the branch `consumer` is registered to.
    ///
    /// Unregistered consumers get a one-off checkout of `source` instead; its result is not
    /// recorded, the consumer's later registration seeds the registry.
    pub async fn latest_marker(
        &self,
        consumer: &QualifiedName,
        source: &SourceRef,
    ) -> Result<String, FetchError> {
        let registered = self.state.lock().marker_of(consumer);
        if let Some(marker) = registered {
            return Ok(marker);
        }

        self.fetcher.checkout(source).await
    }

    /// Whether `consumer` is currently registered.
    pub fn is_registered(&self, consumer: &QualifiedName) -> bool {
        self.state.lock().consumers.contains_key(consumer)
    }

    /// Whether `consumer` is registered to the branch and source identity of `source`.
    pub fn is_registered_to(&self, consumer: &QualifiedName, source: &SourceRef) -> bool {
        self.state
            .lock()
            .consumers
            .get(consumer)
            .is_some_and(|registered| {
                registered.source == source.key() && registered.branch == source.branch
            })
    }

    /// All registered consumers.
    pub fn consumers(&self) -> Vec<QualifiedName> {
        self.state.lock().consumers.keys().cloned().collect()
    }

    /// A snapshot of every registered branch, ordered by source and branch.
    pub fn branches(&self) -> Vec<BranchView> {
        let state = self.state.lock();
        let mut views: Vec<_> = state
            .sources
            .iter()
            .flat_map(|(key, source)| {
                source.branches.iter().map(move |(name, branch)| BranchView {
                    source: key.clone(),
                    branch: name.clone(),
                    marker: branch.marker.clone(),
                    consumers: branch.consumers.iter().cloned().collect(),
                })
            })
            .collect();
        views.sort_by(|a, b| (&a.source, &a.branch).cmp(&(&b.source, &b.branch)));
        views
    }
}
