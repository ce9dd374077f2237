//! End-to-end tests over real sockets: the HTTP game API and the lobby
//! WebSocket, served from a bound listener.

mod common;

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use common::{create_room, join_room};
use gamebuddies_server::config::{ApiKeyEntry, Config};
use gamebuddies_server::protocol::RoomOptions;
use gamebuddies_server::server::LobbyServer;
use gamebuddies_server::store::LobbyStore;
use gamebuddies_server::websocket::{self, AppState};

struct TestStack {
    server: Arc<LobbyServer>,
    addr: SocketAddr,
}

async fn spawn_stack(config: Config) -> TestStack {
    let server = LobbyServer::new(config).await.expect("server construction");
    let state = AppState::new(Arc::clone(&server));
    let router = websocket::create_router("*").with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    TestStack { server, addr }
}

fn service_key() -> String {
    format!("gb_ddf_{}", "7b2e".repeat(16))
}

fn config_with_key() -> Config {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(service_key().as_bytes());
    let key_hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    let mut config = Config::default();
    config.security.api_keys.push(ApiKeyEntry {
        service: "ddf".to_string(),
        key_hash,
        all_rooms: false,
    });
    config
}

fn ddf_options() -> RoomOptions {
    RoomOptions {
        game_type: Some("ddf".to_string()),
        ..RoomOptions::default()
    }
}

#[tokio::test]
async fn health_and_metrics_respond() {
    let stack = spawn_stack(Config::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/health", stack.addr))
        .send()
        .await
        .expect("health request");
    assert!(response.status().is_success());

    let response = client
        .get(format!("http://{}/metrics", stack.addr))
        .send()
        .await
        .expect("metrics request");
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("metrics json");
    assert!(body.get("rooms_created").is_some());
}

#[tokio::test]
async fn game_session_resolution_round_trips() {
    let stack = spawn_stack(config_with_key()).await;
    let client = reqwest::Client::new();

    let (host, room) = create_room(&stack.server, "A1", ddf_options()).await;
    let _guest = join_room(&stack.server, &room.room_code, "B2").await;
    stack
        .server
        .start_game(host.user_id, &room.room_code)
        .await
        .expect("start");

    // Pull the host's freshly minted token straight from the handoff URL.
    let mut host = host;
    let event = host
        .recv_until(|e| {
            matches!(
                e,
                gamebuddies_server::protocol::ServerEvent::GameStarted { .. }
            )
        })
        .await;
    let game_url = match &*event {
        gamebuddies_server::protocol::ServerEvent::GameStarted { game_url, .. } => game_url.clone(),
        other => panic!("unexpected event {other:?}"),
    };
    let token = url::Url::parse(&game_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "session")
        .map(|(_, v)| v.into_owned())
        .expect("session token in game url");

    let response = client
        .get(format!("http://{}/api/game-sessions/{token}", stack.addr))
        .send()
        .await
        .expect("session request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("session json");
    assert_eq!(body["roomCode"], room.room_code);
    assert_eq!(body["gameType"], "ddf");
    assert_eq!(body["playerId"], host.user_id.to_string());
    assert_eq!(body["metadata"]["isHost"], true);

    // Unknown tokens 404.
    let response = client
        .get(format!("http://{}/api/game-sessions/bogus", stack.addr))
        .send()
        .await
        .expect("bogus request");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn return_to_lobby_requires_a_valid_scoped_key() {
    let stack = spawn_stack(config_with_key()).await;
    let client = reqwest::Client::new();

    let (host, room) = create_room(&stack.server, "A1", ddf_options()).await;
    let _guest = join_room(&stack.server, &room.room_code, "B2").await;
    stack
        .server
        .start_game(host.user_id, &room.room_code)
        .await
        .expect("start");

    let endpoint = format!("http://{}/api/returnToLobby", stack.addr);
    let body = serde_json::json!({ "roomCode": room.room_code, "isHost": true });

    // Missing key.
    let response = client.post(&endpoint).json(&body).send().await.unwrap();
    assert_eq!(response.status(), 401);

    // Wrong key.
    let response = client
        .post(&endpoint)
        .header("X-API-Key", format!("gb_ddf_{}", "0000".repeat(16)))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Valid key.
    let response = client
        .post(&endpoint)
        .header("X-API-Key", service_key())
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["success"], true);
    assert_eq!(payload["playersAffected"], 2);
    assert!(payload["returnUrl"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/lobby/{}", room.room_code)));
    assert_eq!(
        payload["pollEndpoint"],
        format!("/api/v2/rooms/{}/return-status", room.room_code)
    );
}

#[tokio::test]
async fn return_status_polling_is_rate_limited_per_ip() {
    let mut config = config_with_key();
    config.security.return_status_rate_per_minute = 3;
    let stack = spawn_stack(config).await;
    let client = reqwest::Client::new();

    let (_host, room) = create_room(&stack.server, "A1", ddf_options()).await;
    let guest = join_room(&stack.server, &room.room_code, "B2").await;

    let endpoint = format!(
        "http://{}/api/v2/rooms/{}/return-status?playerId={}",
        stack.addr, room.room_code, guest.user_id
    );

    for _ in 0..3 {
        let response = client.get(&endpoint).send().await.unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["shouldReturn"], false);
        assert!(body.get("timestamp").is_some());
    }

    let response = client.get(&endpoint).send().await.unwrap();
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn player_status_reports_flow_through_the_api() {
    let stack = spawn_stack(config_with_key()).await;
    let client = reqwest::Client::new();

    let (host, room) = create_room(&stack.server, "A1", ddf_options()).await;
    let guest = join_room(&stack.server, &room.room_code, "B2").await;
    stack
        .server
        .start_game(host.user_id, &room.room_code)
        .await
        .expect("start");

    let endpoint = format!(
        "http://{}/api/v2/rooms/{}/players/{}/status",
        stack.addr, room.room_code, guest.user_id
    );
    let response = client
        .post(&endpoint)
        .header("X-API-Key", service_key())
        .json(&serde_json::json!({ "status": "in_game" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let member = stack
        .server
        .store()
        .get_member(&room.room_id, &guest.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        member.current_location,
        gamebuddies_server::protocol::MemberLocation::Game
    );
}

#[tokio::test]
async fn websocket_identify_then_create_room_with_sequenced_frames() {
    let stack = spawn_stack(Config::default()).await;

    let (ws, _) = connect_async(format!("ws://{}/ws", stack.addr))
        .await
        .expect("ws connect");
    let (mut tx, mut rx) = ws.split();

    let user_id = Uuid::new_v4();
    tx.send(Message::Text(
        serde_json::json!({ "type": "USER.IDENTIFY", "data": { "userId": user_id } })
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    tx.send(Message::Text(
        serde_json::json!({
            "type": "ROOM.CREATE",
            "data": { "playerName": "Alice", "gameType": "ddf" }
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), rx.next())
        .await
        .expect("frame within timeout")
        .expect("stream open")
        .expect("frame ok");
    let text = match frame {
        Message::Text(text) => text.to_string(),
        other => panic!("expected text frame, got {other:?}"),
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["seq"], 1);
    assert_eq!(value["type"], "ROOM.CREATED");
    assert_eq!(value["data"]["room"]["players"][0]["displayName"], "Alice");

    // A malformed frame is dropped with an error, and seq keeps ascending.
    tx.send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.next())
        .await
        .expect("frame within timeout")
        .expect("stream open")
        .expect("frame ok");
    let text = match frame {
        Message::Text(text) => text.to_string(),
        other => panic!("expected text frame, got {other:?}"),
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["seq"], 2);
    assert_eq!(value["type"], "ERROR");
}

#[tokio::test]
async fn websocket_rejects_unidentified_traffic() {
    let stack = spawn_stack(Config::default()).await;

    let (ws, _) = connect_async(format!("ws://{}/ws", stack.addr))
        .await
        .expect("ws connect");
    let (mut tx, mut rx) = ws.split();

    tx.send(Message::Text(
        serde_json::json!({ "type": "ROOM.CREATE", "data": { "playerName": "Eve" } })
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), rx.next())
        .await
        .expect("frame within timeout")
        .expect("stream open")
        .expect("frame ok");
    let text = match frame {
        Message::Text(text) => text.to_string(),
        other => panic!("expected text frame, got {other:?}"),
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "ERROR");
    assert_eq!(value["data"]["code"], "UNAUTHORIZED");

    // The server closes the connection after the violation.
    let next = tokio::time::timeout(Duration::from_secs(5), rx.next()).await;
    match next {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}
