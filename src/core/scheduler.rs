// src/core/scheduler.rs
//! Sequential trade loop: one cycle at a time, a fixed pause in between,
//! and log-and-continue as the only fault tolerance. The running flag is
//! advisory and process-local; it guards against accidental concurrent
//! invocation, not against a second process.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::core::executor::TradeExecutor;

pub struct Scheduler {
    executor: TradeExecutor,
    wait: Duration,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(executor: TradeExecutor, wait: Duration) -> Self {
        Self {
            executor,
            wait,
            running: AtomicBool::new(false),
        }
    }

    /// Runs cycles until `stop` flips to true. The in-flight cycle is
    /// never interrupted; only the inter-cycle sleep is cut short.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(
            "scheduler started: one cycle every {} minutes",
            self.wait.as_secs() / 60
        );

        loop {
            if *stop.borrow() {
                break;
            }

            self.run_guarded_cycle().await;

            if *stop.borrow() {
                break;
            }
            info!("next cycle in {:?}", self.wait);
            tokio::select! {
                _ = tokio::time::sleep(self.wait) => {}
                _ = stop.changed() => {}
            }
        }

        info!("scheduler stopped");
    }

    /// One cycle under the reentrancy guard. Errors are logged and
    /// swallowed so the loop survives any single bad cycle.
    async fn run_guarded_cycle(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("previous cycle still running, skipping this one");
            return;
        }

        let started = Instant::now();
        match self.executor.run_cycle().await {
            Ok(report) => info!("cycle finished in {:.2?}: {:?}", started.elapsed(), report),
            Err(e) => error!("cycle failed after {:.2?}: {}", started.elapsed(), e),
        }

        self.running.store(false, Ordering::SeqCst);
    }
}
