use std::{collections::HashSet, fmt::Debug, pin::pin, sync::Arc};

use futures::StreamExt;
use kube_client::Api;
use kube_core::Resource;
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::QualifiedName;
use crate::source::{MarkerFetcher, MarkerStore, SourceRef, SourceRegistry};

/// Keeps `registry` in step with the consumer objects served by `api` until `cancel` fires.
///
/// `source_of` maps a consumer to the source it follows, or `None` if it should not be
/// tracked (e.g. its channel is not a git channel). Watch errors are logged and retried with
/// the watcher's default backoff.
pub async fn track<K, F, S, SourceFn>(
    registry: Arc<SourceRegistry<F, S>>,
    api: Api<K>,
    watcher_config: watcher::Config,
    source_of: SourceFn,
    cancel: CancellationToken,
) where
    K: Resource + 'static + Debug + Clone + DeserializeOwned + Send,
    F: MarkerFetcher,
    S: MarkerStore,
    SourceFn: Fn(&K) -> Option<SourceRef>,
{
    let mut events = pin!(watcher(api, watcher_config).default_backoff());

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.next() => event,
        };

        match event {
            None => break,
            Some(Err(err)) => log::warn!("consumer watch failed: {err}"),
            Some(Ok(watcher::Event::Applied(consumer))) => {
                apply(&registry, &consumer, &source_of).await;
            }
            Some(Ok(watcher::Event::Deleted(consumer))) => {
                if let Some(key) = QualifiedName::from_resource(&consumer) {
                    registry.deregister_consumer(&key).await;
                }
            }
            Some(Ok(watcher::Event::Restarted(consumers))) => {
                let listed: HashSet<_> = consumers
                    .iter()
                    .filter_map(QualifiedName::from_resource)
                    .collect();
                for key in registry.consumers() {
                    if !listed.contains(&key) {
                        registry.deregister_consumer(&key).await;
                    }
                }
                for consumer in &consumers {
                    apply(&registry, consumer, &source_of).await;
                }
            }
        }
    }

    log::info!("consumer watch stopped");
}

async fn apply<K, F, S>(
    registry: &SourceRegistry<F, S>,
    consumer: &K,
    source_of: &impl Fn(&K) -> Option<SourceRef>,
) where
    K: Resource,
    F: MarkerFetcher,
    S: MarkerStore,
{
    let Some(key) = QualifiedName::from_resource(consumer) else {
        return;
    };

    match source_of(consumer) {
        Some(source) => {
            if registry.is_registered(&key) && !registry.is_registered_to(&key, &source) {
                log::info!("{key} moved to {} branch {}", source.key(), source.branch);
                registry.deregister_consumer(&key).await;
            }
            registry.register_consumer(key, source).await;
        }
        None => {
            registry.deregister_consumer(&key).await;
        }
    }
}
