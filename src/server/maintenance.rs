use chrono::{Duration, Timelike, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::ServerEvent;
use crate::store::LobbyStore;

use super::LobbyServer;

impl LobbyServer {
    /// Spawn the periodic reapers. Each runs on its own schedule and
    /// swallows per-row failures so one bad room never stalls a sweep.
    pub fn spawn_reapers(self: &Arc<Self>) {
        let stale = Arc::clone(self);
        tokio::spawn(async move {
            stale.run_stale_member_reaper().await;
        });

        let rooms = Arc::clone(self);
        tokio::spawn(async move {
            rooms.run_room_reaper().await;
        });

        let sessions = Arc::clone(self);
        tokio::spawn(async move {
            sessions.run_session_purger().await;
        });
    }

    /// Every sweep interval: flip silent members to disconnected and close
    /// out return cycles that ran their course.
    pub async fn run_stale_member_reaper(self: Arc<Self>) {
        let interval_secs = self.config().lobby.stale_sweep_interval_secs.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.registry_sweep().await;
            self.stale_member_sweep().await;
            self.pending_return_sweep().await;
        }
    }

    /// Detach registry bindings that stopped heartbeating entirely and run
    /// them through the normal disconnect pipeline (which is grace-aware).
    pub(crate) async fn registry_sweep(&self) {
        let threshold =
            std::time::Duration::from_secs(self.config().lobby.stale_member_threshold_secs);
        for (conn_id, user_id, room_code) in self.registry.sweep(threshold) {
            tracing::info!(%conn_id, %user_id, %room_code, "Detaching silent connection");
            self.on_conn_closed(conn_id).await;
        }
    }

    /// One stale-member pass; returns the number of members flipped.
    pub async fn stale_member_sweep(&self) -> usize {
        let threshold = Duration::seconds(self.config().lobby.stale_member_threshold_secs as i64);
        let cutoff = Utc::now() - threshold;

        let flipped = match self.store().sweep_stale_members(cutoff).await {
            Ok(flipped) => flipped,
            Err(err) => {
                tracing::error!(error = %err, "Stale member sweep failed");
                return 0;
            }
        };
        if flipped.is_empty() {
            return 0;
        }

        for stale in &flipped {
            self.log_event(
                stale.room_id,
                Some(stale.user_id),
                "stale_member_reaped",
                serde_json::json!({}),
            )
            .await;
            self.broadcast_to_room_except(
                &stale.room_code,
                &stale.user_id,
                ServerEvent::PlayerDisconnected {
                    player_id: stale.user_id,
                },
            );

            if stale.was_host {
                match self.store().get_room(&stale.room_id).await {
                    Ok(Some(room)) => {
                        if let Err(err) = self.schedule_host_grace(&room).await {
                            tracing::warn!(
                                room_id = %stale.room_id,
                                error = %err,
                                "Failed to start host grace after stale reap"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(room_id = %stale.room_id, error = %err, "Room lookup failed");
                    }
                }
            }
        }

        let count = flipped.len();
        self.metrics().add_stale_members_reaped(count as u64);
        self.log_reaper_run("stale_member_reaper", count).await;
        tracing::info!(count, "Stale members flipped to disconnected");
        count
    }

    /// Close out pending returns whose members all rejoined or whose
    /// clear-after window elapsed.
    pub async fn pending_return_sweep(&self) {
        let pending = match self.store().list_rooms_pending_return().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::error!(error = %err, "Pending-return listing failed");
                return;
            }
        };

        for room in pending {
            let _room_guard = self.locks.acquire(&room.code).await;
            let fresh = match self.store().get_room(&room.id).await {
                Ok(Some(fresh)) => fresh,
                _ => continue,
            };
            let members = match self.store().list_members(&fresh.id).await {
                Ok(members) => members,
                Err(err) => {
                    tracing::warn!(room_id = %fresh.id, error = %err, "Member listing failed");
                    continue;
                }
            };
            if let Err(err) = self.maybe_complete_return(&fresh, &members).await {
                tracing::warn!(room_id = %fresh.id, error = %err, "Return completion check failed");
            }
        }
    }

    /// Every reap interval: mark abandonable rooms, then purge the ones
    /// whose terminal grace elapsed. Between the configured off-peak hours
    /// the idle/age thresholds tighten.
    pub async fn run_room_reaper(self: Arc<Self>) {
        let interval_secs = self.config().lobby.room_reap_interval_secs.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.room_sweep().await;
        }
    }

    /// One room-reaper pass; returns (abandoned, purged).
    pub async fn room_sweep(&self) -> (usize, usize) {
        let lobby = &self.config().lobby;
        let now = Utc::now();

        let hour = now.hour();
        let off_peak = hour >= lobby.offpeak_start_hour && hour < lobby.offpeak_end_hour;
        let (idle_secs, age_secs) = if off_peak {
            (lobby.offpeak_idle_reap_secs, lobby.offpeak_age_reap_secs)
        } else {
            (lobby.room_idle_reap_secs, lobby.room_age_reap_secs)
        };

        let outcome = match self
            .store()
            .sweep_abandonable_rooms(
                now - Duration::seconds(idle_secs as i64),
                now - Duration::seconds(age_secs as i64),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "Room sweep failed");
                return (0, 0);
            }
        };

        for room in &outcome.abandoned {
            self.cancel_host_grace_timer(&room.id);
            self.returns.forget_room(&room.id);
            self.metrics().increment_rooms_abandoned();
            self.log_event(
                room.id,
                None,
                "room_abandoned",
                serde_json::json!({ "reason": "reaped", "off_peak": off_peak }),
            )
            .await;
        }

        let purge_cutoff = now - Duration::seconds(lobby.abandoned_purge_grace_secs as i64);
        let purged = match self.store().purge_abandoned_rooms(purge_cutoff).await {
            Ok(purged) => purged,
            Err(err) => {
                tracing::error!(error = %err, "Abandoned room purge failed");
                Vec::new()
            }
        };
        for (room_id, room_code) in &purged {
            self.forget_room(room_id, room_code);
        }

        let abandoned_count = outcome.abandoned.len();
        let purged_count = purged.len();
        if abandoned_count > 0 || purged_count > 0 {
            self.metrics().add_rooms_purged(purged_count as u64);
            self.log_reaper_run("room_reaper", abandoned_count + purged_count)
                .await;
            tracing::info!(
                abandoned = abandoned_count,
                purged = purged_count,
                off_peak,
                "Room reaper pass complete"
            );
        }
        (abandoned_count, purged_count)
    }

    /// Hourly: delete expired session tokens.
    pub async fn run_session_purger(self: Arc<Self>) {
        let interval_secs = self.config().lobby.session_purge_interval_secs.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.sessions.purge().await {
                Ok(purged) if purged > 0 => {
                    self.log_reaper_run("session_purger", purged as usize).await;
                    tracing::info!(purged, "Expired session tokens purged");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = %err, "Session token purge failed");
                }
            }
        }
    }

    /// Aggregate audit record for one reaper pass. Reaper runs are not
    /// owned by any room, so they log under the nil room id.
    async fn log_reaper_run(&self, reaper: &str, cleaned: usize) {
        self.log_event(
            Uuid::nil(),
            None,
            "reaper_run",
            serde_json::json!({ "reaper": reaper, "cleaned": cleaned }),
        )
        .await;
    }
}
