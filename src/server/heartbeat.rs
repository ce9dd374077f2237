use chrono::Utc;
use std::time::Duration;

use crate::protocol::ConnId;
use crate::store::LobbyStore;

use super::LobbyServer;

impl LobbyServer {
    /// `CONNECTION.HEARTBEAT`: refresh registry liveness on every beat,
    /// persist `last_ping` only when the debounce window has elapsed.
    pub async fn handle_heartbeat(&self, conn_id: ConnId) {
        self.metrics().increment_heartbeats_received();
        self.registry.touch(&conn_id);

        let Some((user_id, room_code)) = self.registry.get(&conn_id) else {
            return;
        };

        let debounce = Duration::from_secs(self.config().lobby.heartbeat_db_debounce_secs);
        if !self.registry.should_persist_ping(&conn_id, debounce) {
            self.metrics().increment_heartbeat_db_skipped();
            tracing::trace!(%conn_id, "Skipped ping persist (debounced)");
            return;
        }

        self.metrics().increment_heartbeat_db_writes();
        match self.store().get_room_by_code(&room_code).await {
            Ok(Some(room)) => {
                if let Err(err) = self
                    .store()
                    .record_member_ping(&room.id, &user_id, Utc::now())
                    .await
                {
                    tracing::warn!(%user_id, %room_code, error = %err, "Failed to persist ping");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%room_code, error = %err, "Room lookup failed during heartbeat");
            }
        }
    }
}
