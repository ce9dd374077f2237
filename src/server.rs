use std::future::Future;
use std::sync::{Arc, Weak};

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::ApiKeyValidator;
use crate::config::Config;
use crate::locks::RoomLocks;
use crate::metrics::ServerMetrics;
use crate::protocol::{ConnId, RoomEvent, RoomId, ServerEvent, UserId};
use crate::registry::ConnectionRegistry;
use crate::returns::ReturnCoordinator;
use crate::session::SessionService;
use crate::store::{InMemoryStore, LobbyStore};

mod disconnect;
mod game_flow;
mod heartbeat;
mod maintenance;
mod message_router;
mod return_flow;
mod room_service;

pub use return_flow::{ReportedStatus, ReturnCaller};

/// The lobby manager: owns the room state machine and everything that feeds
/// it. The edge translates wire traffic into calls on this type and never
/// makes policy decisions of its own.
pub struct LobbyServer {
    store: Arc<dyn LobbyStore>,
    /// Authoritative map of live inbound connections.
    pub(crate) registry: ConnectionRegistry,
    /// Per-room locks serializing every state transition.
    pub(crate) locks: RoomLocks,
    /// Outbound channel per connection; frames are dropped (and counted)
    /// rather than blocking a room on a slow socket.
    channels: DashMap<ConnId, mpsc::Sender<Arc<ServerEvent>>>,
    pub(crate) sessions: Arc<SessionService>,
    pub(crate) returns: ReturnCoordinator,
    pub(crate) api_keys: ApiKeyValidator,
    config: Config,
    metrics: Arc<ServerMetrics>,
    /// Cancellable host-grace timers, one at most per room.
    host_grace_timers: DashMap<RoomId, CancellationToken>,
    /// Weak self-handle so timer tasks can re-enter the server.
    self_ref: Weak<LobbyServer>,
}

impl LobbyServer {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let store: Arc<dyn LobbyStore> = Arc::new(InMemoryStore::new());
        Self::with_store(config, store).await
    }

    /// Construct over an explicit store (integration tests hydrate state
    /// through this).
    pub async fn with_store(config: Config, store: Arc<dyn LobbyStore>) -> Result<Arc<Self>> {
        store.initialize().await?;

        let metrics = Arc::new(ServerMetrics::new());
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            config.lobby.session_token_ttl_secs,
            metrics.clone(),
        ));
        let returns = ReturnCoordinator::new(store.clone(), sessions.clone(), &config.lobby)?;
        let api_keys = ApiKeyValidator::new(config.security.api_keys.clone());

        Ok(Arc::new_cyclic(|self_ref| Self {
            store,
            registry: ConnectionRegistry::new(),
            locks: RoomLocks::new(),
            channels: DashMap::new(),
            sessions,
            returns,
            api_keys,
            config,
            metrics,
            host_grace_timers: DashMap::new(),
            self_ref: self_ref.clone(),
        }))
    }

    /// Strong self-handle for spawned timer tasks. None only during
    /// teardown, when the timers no longer matter.
    pub(crate) fn self_arc(&self) -> Option<Arc<LobbyServer>> {
        self.self_ref.upgrade()
    }

    pub fn store(&self) -> &dyn LobbyStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    pub fn sessions(&self) -> Arc<SessionService> {
        self.sessions.clone()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn api_keys(&self) -> &ApiKeyValidator {
        &self.api_keys
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }

    /// Whether error payloads should omit debug details.
    pub fn production(&self) -> bool {
        self.config.security.production
    }

    // --- connection channels -------------------------------------------------

    /// Register the outbound channel for a fresh connection.
    pub fn register_channel(&self, conn_id: ConnId, sender: mpsc::Sender<Arc<ServerEvent>>) {
        self.channels.insert(conn_id, sender);
        self.metrics.increment_active_connections();
    }

    /// Drop a connection's channel (the socket loop has ended).
    pub fn remove_channel(&self, conn_id: &ConnId) {
        if self.channels.remove(conn_id).is_some() {
            self.metrics.decrement_active_connections();
        }
    }

    /// Queue an event to one connection. Never blocks: a full queue drops
    /// the frame and bumps a counter.
    pub(crate) fn send_to_conn(&self, conn_id: &ConnId, event: Arc<ServerEvent>) {
        if let Some(sender) = self.channels.get(conn_id) {
            if sender.try_send(event).is_err() {
                self.metrics.increment_frames_dropped();
                tracing::warn!(%conn_id, "Outbound queue full, dropping frame");
            }
        }
    }

    /// Queue an event to every connection a user holds in a room.
    pub(crate) fn send_to_user(&self, room_code: &str, user_id: &UserId, event: Arc<ServerEvent>) {
        for conn_id in self.registry.lookup(user_id, room_code) {
            self.send_to_conn(&conn_id, Arc::clone(&event));
        }
    }

    /// Queue an event to every connection attached to a room.
    pub(crate) fn broadcast_to_room(&self, room_code: &str, event: ServerEvent) {
        let event = Arc::new(event);
        for (conn_id, _) in self.registry.conns_in_room(room_code) {
            self.send_to_conn(&conn_id, Arc::clone(&event));
        }
    }

    /// Queue an event to every room connection except one user's.
    pub(crate) fn broadcast_to_room_except(
        &self,
        room_code: &str,
        except: &UserId,
        event: ServerEvent,
    ) {
        let event = Arc::new(event);
        for (conn_id, user_id) in self.registry.conns_in_room(room_code) {
            if user_id != *except {
                self.send_to_conn(&conn_id, Arc::clone(&event));
            }
        }
    }

    /// Surface an error to the originating connection; the room is not
    /// disturbed.
    pub(crate) fn send_error_to_conn(&self, conn_id: &ConnId, error: &crate::protocol::LobbyError) {
        let debug = if self.production() {
            None
        } else if let crate::protocol::LobbyError::Internal(inner) = error {
            Some(format!("{inner:#}"))
        } else {
            None
        };
        self.send_to_conn(
            conn_id,
            Arc::new(ServerEvent::Error {
                message: error.client_message(),
                code: error.code(),
                debug,
            }),
        );
    }

    // --- audit log -----------------------------------------------------------

    /// Append an audit event; failures are logged, never propagated.
    pub(crate) async fn log_event(
        &self,
        room_id: RoomId,
        user_id: Option<UserId>,
        event_type: &str,
        payload: serde_json::Value,
    ) {
        if let Err(err) = self
            .store
            .append_event(RoomEvent::new(room_id, user_id, event_type, payload))
            .await
        {
            tracing::warn!(%room_id, event_type, error = %err, "Failed to append audit event");
        }
    }

    // --- timers --------------------------------------------------------------

    pub(crate) fn cancel_host_grace_timer(&self, room_id: &RoomId) {
        if let Some((_, token)) = self.host_grace_timers.remove(room_id) {
            token.cancel();
        }
    }

    pub(crate) fn host_grace_timer_entry(&self, room_id: RoomId) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.host_grace_timers.insert(room_id, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Drop all per-room coordination state after a room is deleted.
    pub(crate) fn forget_room(&self, room_id: &RoomId, room_code: &str) {
        self.cancel_host_grace_timer(room_id);
        self.returns.forget_room(room_id);
        self.locks.forget(room_code);
    }
}

/// Retry a store mutation once with a fresh attempt, per the propagation
/// policy: the second failure surfaces.
pub(crate) async fn retry_once<T, Fut, F>(label: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::warn!(label, error = %first, "Store operation failed, retrying once");
            op().await
                .map_err(|second| second.context(format!("{label} failed after retry")))
        }
    }
}
