// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic ping/pong liveness probing of client connections.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::ConnectionAgent;

/// Spawn the monitor. Each tick runs [`ConnectionAgent::probe_connections`];
/// a client has one full interval to answer a ping.
pub fn spawn_liveness_monitor(
    agent: Arc<ConnectionAgent>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let period = agent.options().monitoring_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let reaped = agent.probe_connections();
                    if reaped > 0 {
                        tracing::info!(agent = %agent.name(), reaped, "reaped unresponsive clients");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "liveness_tests.rs"]
mod tests;
