use std::{panic, sync::Arc};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    gvk::Resolver,
    source::{self, MarkerFetcher, MarkerStore, SourceRegistry},
    sync::{Cluster, Synchronizer},
    Config,
};

/// Starts the source poller and the synchronizer worker.
///
/// Both stop when `cancel` fires or [`Runtime::shutdown`] is called. Must be called from
/// within a tokio runtime.
pub fn start<F, S, C>(
    config: &Config,
    fetcher: F,
    store: S,
    resolver: Arc<Resolver>,
    cluster: C,
    cancel: &CancellationToken,
) -> Runtime<F, S>
where
    F: MarkerFetcher,
    S: MarkerStore,
    C: Cluster,
{
    let token = cancel.child_token();
    let registry = Arc::new(SourceRegistry::new(fetcher, store));
    let (synchronizer, worker) = Synchronizer::channel(config, resolver, cluster);

    let poller = tokio::spawn(source::poll(
        Arc::clone(&registry),
        config.poll_interval,
        token.clone(),
    ));
    let worker = tokio::spawn(worker.run(token.clone()));

    Runtime {
        registry,
        synchronizer,
        tasks: vec![
            BackgroundTask {
                name: "source poller",
                join_handle: poller,
            },
            BackgroundTask {
                name: "synchronizer worker",
                join_handle: worker,
            },
        ],
        token,
    }
}

/// Handles to the running background tasks.
pub struct Runtime<F, S> {
    registry: Arc<SourceRegistry<F, S>>,
    synchronizer: Synchronizer,
    tasks: Vec<BackgroundTask>,
    token: CancellationToken,
}

impl<F, S> Runtime<F, S> {
    /// The registry the poller works on.
    pub fn registry(&self) -> &Arc<SourceRegistry<F, S>> {
        &self.registry
    }

    /// A producer handle of the synchronizer queue.
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Stops both loops after their current iteration and waits for them.
    ///
    /// A panic in either task is resumed on the caller.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            task.join().await;
        }
    }
}

struct BackgroundTask {
    name: &'static str,
    join_handle: JoinHandle<()>,
}

impl BackgroundTask {
    async fn join(self) {
        if let Err(err) = self.join_handle.await {
            if let Ok(panic) = err.try_into_panic() {
                log::error!("{} panicked", self.name);
                panic::resume_unwind(panic)
            }
        }
    }
}
