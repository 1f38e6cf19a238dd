//! Background loops: periodic reorder evaluation and the expiry sweep.
//!
//! Each loop runs on a monotonic ticker, obeys the supplied context's
//! cancellation, and holds no locks across a tick.

use crate::commands::ProcessAutomaticReordersCommand;
use crate::service::InventoryService;
use roastline_core::config::ReorderConfig;
use roastline_core::OpContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// How often expired batches are swept.
const EXPIRY_SWEEP_PERIOD: Duration = Duration::from_secs(6 * 3600);

const SCHEDULER_ACTOR: &str = "scheduler";

pub struct EngineScheduler {
    service: Arc<InventoryService>,
    config: ReorderConfig,
}

impl EngineScheduler {
    pub fn new(service: Arc<InventoryService>, config: ReorderConfig) -> Self {
        Self { service, config }
    }

    /// Spawn the reorder-evaluation loop.
    pub fn spawn_reorder_loop(&self, ctx: OpContext) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let period = self.config.review_cycle();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup does not
            // race data loading.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let command = ProcessAutomaticReordersCommand::default();
                        match service
                            .process_automatic_reorders(&ctx, SCHEDULER_ACTOR, command)
                            .await
                        {
                            Ok(orders) if !orders.is_empty() => {
                                info!(orders = orders.len(), "automatic reorder pass created orders");
                            }
                            Ok(_) => {}
                            Err(err) => error!(error = %err, "automatic reorder pass failed"),
                        }
                    }
                    _ = ctx.done() => {
                        info!("reorder loop stopping");
                        return;
                    }
                }
            }
        })
    }

    /// Spawn the expired-batch sweep loop.
    pub fn spawn_expiry_sweep(&self, ctx: OpContext) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EXPIRY_SWEEP_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.sweep_expired(&ctx, SCHEDULER_ACTOR).await {
                            Ok(movements) if !movements.is_empty() => {
                                info!(movements = movements.len(), "expiry sweep wrote off stock");
                            }
                            Ok(_) => {}
                            Err(err) => error!(error = %err, "expiry sweep failed"),
                        }
                    }
                    _ = ctx.done() => {
                        info!("expiry sweep stopping");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use roastline_core::{MemoryEventSink, ResilienceManager};

    #[tokio::test(start_paused = true)]
    async fn loops_exit_on_cancellation() {
        let ledger = Arc::new(MemoryLedger::new());
        let events = Arc::new(MemoryEventSink::new());
        let config = ReorderConfig::default();
        let service = Arc::new(InventoryService::new(
            ledger,
            events,
            Arc::new(ResilienceManager::new()),
            config.clone(),
        ));

        let scheduler = EngineScheduler::new(service, config);
        let (handle, ctx) = OpContext::cancellable();
        let reorder = scheduler.spawn_reorder_loop(ctx.clone());
        let sweep = scheduler.spawn_expiry_sweep(ctx);

        handle.cancel();
        reorder.await.unwrap();
        sweep.await.unwrap();
    }
}
