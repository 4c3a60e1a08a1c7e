use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::room::RoomRegistry;
use super::router::SignalingRouter;
use crate::config::RoomConfig;

/// Shared relay state: the room table plus the connection router.
pub struct SignalingServer {
    registry: Arc<RoomRegistry>,
    router: Arc<SignalingRouter>,
    rooms: RoomConfig,
}

impl SignalingServer {
    pub fn new(rooms: RoomConfig) -> Self {
        Self {
            registry: RoomRegistry::new(),
            router: SignalingRouter::new(),
            rooms,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<SignalingRouter> {
        &self.router
    }

    pub async fn sweep_idle_rooms(&self) -> Vec<String> {
        let removed = self.registry.sweep_idle(self.rooms.max_idle).await;
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Swept idle rooms");
        }
        removed
    }

    /// Runs the idle-room sweep every `sweep_interval` until the task is aborted.
    pub fn start_room_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.rooms.sweep_interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep_idle_rooms().await;
            }
        })
    }
}
