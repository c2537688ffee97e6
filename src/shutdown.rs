use crate::config::CoordinatorConfig;
use crate::events::EventFanout;
use crate::observability::mutation_metrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Graceful shutdown for the mutation pipeline: stop accepting events, drain subscribers,
/// then report final counters.
pub struct ShutdownCoordinator {
    fanout: Arc<EventFanout>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(fanout: Arc<EventFanout>, drain_timeout: Duration) -> Self {
        Self {
            fanout,
            drain_timeout,
        }
    }

    pub fn from_config(fanout: Arc<EventFanout>, config: &CoordinatorConfig) -> Self {
        Self::new(fanout, Duration::from_secs(config.shutdown_drain_seconds))
    }

    /// Wait for Ctrl-C
    pub async fn wait_for_signal() -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on Ctrl-C");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        Ok(())
    }

    /// Perform graceful shutdown operations
    pub async fn shutdown_all_services(&self) -> Result<()> {
        info!("Initiating graceful shutdown of all services...");

        // Events handed over before this point are still delivered
        if let Err(e) = self.fanout.shutdown(self.drain_timeout).await {
            warn!("Some event subscribers did not drain: {}", e);
        }

        for stats in self.fanout.subscriber_stats() {
            info!(
                subscriber = %stats.name,
                delivered = stats.delivered,
                failed = stats.failed,
                "Final subscriber statistics"
            );
        }
        mutation_metrics().log_stats();

        crate::database::shutdown_database().await;

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
