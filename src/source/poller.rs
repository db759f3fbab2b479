use std::{sync::Arc, time::Duration};

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{MarkerFetcher, MarkerStore, SourceRegistry};

/// Polls every registered branch of `registry` each `period` until `cancel` fires.
///
/// The first tick runs immediately. A tick that is already running completes before the loop
/// observes cancellation.
pub async fn poll<F: MarkerFetcher, S: MarkerStore>(
    registry: Arc<SourceRegistry<F, S>>,
    period: Duration,
    cancel: CancellationToken,
) {
    log::info!("source poller started, polling every {period:?}");

    let mut ticks = interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }

        registry.poll_tick().await;
    }

    log::info!("source poller stopped");
}
