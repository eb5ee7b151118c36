//! The scheduler claim-and-deliver loop (§4.E + §5): a long-lived task
//! that wakes on a fixed poll interval, claims due proactive events, and
//! hands each to a `ProactiveSink`. Grounded on the same
//! `tokio::select!`-over-`interval`-and-shutdown-watch shape as
//! `vigil_consolidate::ticker::ConsolidationLoop`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use vigil_core::time::MonotonicMs;
use vigil_scheduler::engine::EventScheduler;

use crate::sink::ProactiveSink;

const POLL_INTERVAL_MS: u64 = 5_000;
const CLAIM_WINDOW_MS: i64 = 0;
const CLAIM_LIMIT: usize = 20;
const CLAIM_LEASE_MS: i64 = 5 * 60 * 1_000;

pub struct DeliveryLoop {
    scheduler: Arc<EventScheduler>,
    sink: Arc<dyn ProactiveSink>,
}

impl DeliveryLoop {
    pub fn new(scheduler: Arc<EventScheduler>, sink: Arc<dyn ProactiveSink>) -> Self {
        Self { scheduler, sink }
    }

    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("scheduler delivery loop started");
            let mut interval = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = self.poll_once() {
                            error!(%err, "scheduler delivery tick failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("scheduler delivery loop shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    fn poll_once(&self) -> vigil_scheduler::Result<()> {
        let claim_id = Uuid::new_v4().to_string();
        let now = MonotonicMs::now();
        let claimed = self.scheduler.claim_pending_events(now, CLAIM_WINDOW_MS, CLAIM_LIMIT, CLAIM_LEASE_MS, &claim_id)?;
        for event in claimed {
            self.sink.deliver(&event);
            if let Err(err) = self.scheduler.mark_delivered(&event.event_id, &claim_id, MonotonicMs::now()) {
                warn!(%err, event_id = %event.event_id, "failed to mark proactive event delivered");
            }
        }
        Ok(())
    }
}
