//! ReaperLoop: runs the lease sweep on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::lease::LeaseManager;

/// Handle to the background sweep.
/// - `request_shutdown()` stops it after the current pass
/// - `shutdown_and_join()` also waits for it to finish
pub struct ReaperLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperLoop {
    pub fn spawn(leases: Arc<LeaseManager>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(reaper_loop(leases, interval, shutdown_rx));
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn reaper_loop(
    leases: Arc<LeaseManager>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "reaper started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match leases.sweep().await {
            Ok(reclaimed) if reclaimed.is_empty() => debug!("sweep found no expired leases"),
            Ok(reclaimed) => info!(reclaimed = reclaimed.len(), "sweep reclaimed tasks"),
            Err(e) => error!(error = %e, reason_code = %e.reason_code(), "sweep failed"),
        }
    }
    info!("reaper stopped");
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::domain::task::fixtures::{t0, task};
    use crate::domain::{Agent, TaskStatus};
    use crate::ports::{Clock, FixedClock, MemoryEventSink};
    use crate::store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn reclaims_in_the_background_until_shut_down() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let leases = Arc::new(LeaseManager::new(
            store.clone(),
            clock.clone(),
            Arc::new(MemoryEventSink::new()),
        ));
        let id = store
            .transact(|tables| {
                tables.put_agent(Agent {
                    agent_id: "agent-a".into(),
                    name: None,
                    owner_role: "qa".into(),
                    capabilities: Default::default(),
                    allowed_tools: Default::default(),
                    capacity: 1,
                    leased: 0,
                    online: true,
                    last_seen: t0(),
                });
                let id = tables.insert_task(task("BUG-1", "qa")).unwrap().id;
                tables.lease_capacity("agent-a").unwrap();
                tables.task_mut(id).unwrap().assign("agent-a", clock.now());
                id
            })
            .await;

        let reaper = ReaperLoop::spawn(leases, Duration::from_secs(1));
        clock.advance(TimeDelta::seconds(11));
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (status, leased) = store
            .read(|tables| {
                (
                    tables.task(id).map(|t| t.status).unwrap(),
                    tables.agent("agent-a").map(|a| a.leased).unwrap(),
                )
            })
            .await;
        assert_eq!(status, TaskStatus::Pending);
        assert_eq!(leased, 0);

        tokio::time::timeout(Duration::from_secs(5), reaper.shutdown_and_join())
            .await
            .unwrap();
    }
}
