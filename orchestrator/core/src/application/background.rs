// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Periodic background sweeps.
//!
//! Every sweep (membership liveness, channel liveness, coordination cycle) runs
//! on its own `tokio::time::interval` and stops when the shared
//! [`CancellationToken`] fires.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Longer periods are clamped so the interval deadline stays representable.
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Spawn `cycle` every `period` until `shutdown` is cancelled.
///
/// The first tick is skipped so a freshly started node does not sweep state
/// it has only just created.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.min(MAX_PERIOD);
    tokio::spawn(async move {
        info!(sweep = name, period_ms = period.as_millis() as u64, "Starting background sweep");

        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!(sweep = name, "Running sweep cycle");
                    cycle().await;
                }
                _ = shutdown.cancelled() => {
                    info!(sweep = name, "Shutdown signal received, stopping sweep");
                    break;
                }
            }
        }
    })
}
