//! Periodic heartbeat publisher for the local instance

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::LivenessTracker;

/// Background task writing `heartbeat:<instanceId>` every heartbeat interval
///
/// The first heartbeat is written immediately. On [`HeartbeatTask::shutdown`]
/// the heartbeat key is deleted so the instance is reported dead at once
/// instead of after the TTL.
pub struct HeartbeatTask {
    instance_id: String,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    pub fn spawn(tracker: LivenessTracker, instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task_instance_id = instance_id.clone();
        let handle = tokio::spawn(async move {
            let instance_id = task_instance_id;
            let mut interval = tokio::time::interval(tracker.config().heartbeat_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                instance_id = %instance_id,
                interval_secs = tracker.config().heartbeat_interval_secs,
                "Heartbeat publisher started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        match tracker.set_heartbeat(&instance_id, now_ms, None).await {
                            Ok(()) => debug!(instance_id = %instance_id, "Heartbeat sent"),
                            Err(e) => warn!(
                                instance_id = %instance_id,
                                error = %e,
                                "Failed to send heartbeat"
                            ),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            if let Err(e) = tracker.delete_heartbeat(&instance_id).await {
                warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "Failed to delete heartbeat on shutdown, it will expire"
                );
            }
            info!(instance_id = %instance_id, "Heartbeat publisher stopped");
        });

        Self {
            instance_id,
            shutdown_tx,
            handle,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop publishing and wait for the heartbeat key to be removed
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!(instance_id = %self.instance_id, error = %e, "Heartbeat task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LivenessConfig;
    use fleet_store::{MemoryStore, SharedStore};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_publishes_and_cleans_up() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let tracker = LivenessTracker::new(store, LivenessConfig::default()).unwrap();

        let task = HeartbeatTask::spawn(tracker.clone(), "inst-1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = tracker.get_heartbeat("inst-1").await;
        assert!(first.is_some());

        // Survives well past the TTL because it keeps refreshing
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(tracker.get_heartbeat("inst-1").await.is_some());

        task.shutdown().await;
        assert_eq!(tracker.get_heartbeat("inst-1").await, None);
    }
}
