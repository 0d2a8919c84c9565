// src/services/liveness.rs

//! # Liveness Monitor
//!
//! Periodically asks the hub to sweep the registry: connections that have not
//! acknowledged a probe within `timeout` are evicted, the rest are probed again.

use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::connection_manager::ConnectionManager;

/// Outcome of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The shutdown token fired.
    Cancelled,
    /// The hub stopped before the monitor did.
    HubClosed,
}

/// Sweeps every `period` until `shutdown` fires or the hub goes away.
/// The first sweep happens one full period after start.
pub async fn run_liveness_monitor(
    manager: ConnectionManager,
    period: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> MonitorExit {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return MonitorExit::Cancelled,
            _ = ticker.tick() => match manager.sweep(timeout).await {
                Ok(report) if report.evicted.is_empty() => {
                    debug!("Liveness sweep probed {} client(s)", report.probed);
                }
                Ok(report) => {
                    info!(
                        "Liveness sweep evicted {} client(s): {:?}",
                        report.evicted.len(),
                        report.evicted
                    );
                }
                Err(e) => {
                    warn!("Liveness monitor stopping: {}", e);
                    return MonitorExit::HubClosed;
                }
            },
        }
    }
}
