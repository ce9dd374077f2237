//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use gamebuddies_server::config::Config;
use gamebuddies_server::protocol::{
    ConnId, MemberRole, RoomSnapshot, ServerEvent, UserId,
};
use gamebuddies_server::server::LobbyServer;
use gamebuddies_server::store::LobbyStore;

/// One simulated lobby client: an identified user holding one connection
/// with its outbound event queue.
pub struct TestClient {
    pub conn_id: ConnId,
    pub user_id: UserId,
    pub rx: mpsc::Receiver<Arc<ServerEvent>>,
}

impl TestClient {
    /// Register a fresh connection channel on the server.
    pub fn connect(server: &LobbyServer) -> Self {
        Self::connect_as(server, Uuid::new_v4())
    }

    pub fn connect_as(server: &LobbyServer, user_id: UserId) -> Self {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);
        server.register_channel(conn_id, tx);
        Self {
            conn_id,
            user_id,
            rx,
        }
    }

    /// Next queued event, with a timeout so broken tests fail fast.
    pub async fn recv(&mut self) -> Arc<ServerEvent> {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    /// Assert no event arrives within a short quiet window.
    pub async fn expect_silence(&mut self) {
        let outcome = tokio::time::timeout(Duration::from_millis(150), self.rx.recv()).await;
        assert!(
            outcome.is_err(),
            "expected no event, got {:?}",
            outcome.unwrap()
        );
    }

    /// Drain until an event matching `pred` arrives, skipping others.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> Arc<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        for _ in 0..32 {
            let event = self.recv().await;
            if pred(&event) {
                return event;
            }
        }
        panic!("matching event never arrived");
    }
}

/// Server with defaults suitable for fast tests.
pub async fn test_server() -> Arc<LobbyServer> {
    test_server_with(Config::default()).await
}

pub async fn test_server_with(config: Config) -> Arc<LobbyServer> {
    LobbyServer::new(config).await.expect("server construction")
}

/// Create a room through the public path; returns the creator's client and
/// the room snapshot from `ROOM.CREATED`.
pub async fn create_room(
    server: &LobbyServer,
    name: &str,
    options: gamebuddies_server::protocol::RoomOptions,
) -> (TestClient, RoomSnapshot) {
    let mut client = TestClient::connect(server);
    server
        .create_room(client.conn_id, client.user_id, name.to_string(), options)
        .await
        .expect("room creation");
    let event = client.recv().await;
    let snapshot = match &*event {
        ServerEvent::RoomCreated(payload) => payload.room.clone(),
        other => panic!("expected ROOM.CREATED, got {other:?}"),
    };
    (client, snapshot)
}

/// Join an existing room; returns the joiner's client.
pub async fn join_room(server: &LobbyServer, room_code: &str, name: &str) -> TestClient {
    let mut client = TestClient::connect(server);
    server
        .join_room(
            client.conn_id,
            client.user_id,
            room_code.to_string(),
            name.to_string(),
        )
        .await
        .expect("room join");
    let event = client.recv().await;
    assert!(
        matches!(&*event, ServerEvent::RoomJoined(_)),
        "expected ROOM.JOINED, got {event:?}"
    );
    client
}

/// Assert the core member-state invariants for a room: exactly one host
/// among live rooms, and connectivity matching location for every member.
pub async fn assert_room_invariants(server: &LobbyServer, room_code: &str) {
    let room = server
        .store()
        .get_room_by_code(room_code)
        .await
        .expect("store read")
        .expect("room exists");
    let members = server.store().list_members(&room.id).await.expect("members");

    if room.status != gamebuddies_server::protocol::RoomStatus::Abandoned {
        let hosts: Vec<_> = members
            .iter()
            .filter(|m| m.role == MemberRole::Host)
            .collect();
        assert_eq!(
            hosts.len(),
            1,
            "exactly one host expected in room {room_code}"
        );
        assert_eq!(hosts[0].user_id, room.host_id, "host role matches host_id");
    }

    for member in &members {
        assert_eq!(
            member.is_connected,
            member.current_location.implies_connected(),
            "connectivity invariant violated for {}",
            member.user_id
        );
    }
}
