//! Reaper behavior: room abandonment and purge thresholds, the in-game
//! protection rule, and session token purging.

mod common;

use common::{create_room, join_room, test_server_with, TestClient};
use gamebuddies_server::config::Config;
use gamebuddies_server::protocol::{MemberLocation, RoomOptions, RoomStatus};
use gamebuddies_server::server::ReturnCaller;
use gamebuddies_server::store::LobbyStore;
use std::time::Duration;

fn aggressive_reaper_config() -> Config {
    let mut config = Config::default();
    config.lobby.room_idle_reap_secs = 0;
    config.lobby.offpeak_idle_reap_secs = 0;
    config.lobby.stale_member_threshold_secs = 0;
    config.lobby.abandoned_purge_grace_secs = 3600;
    config
}

#[tokio::test]
async fn idle_room_whose_members_went_stale_is_abandoned() {
    let server = test_server_with(aggressive_reaper_config()).await;
    let (host, room) = create_room(&server, "Alice", RoomOptions::default()).await;

    // The only member's connection dies silently; the reconciler flips the
    // row, then the room idles out on the next reaper pass.
    server.registry().detach(&host.conn_id);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let flipped = server.stale_member_sweep().await;
    assert_eq!(flipped, 1);

    let (abandoned, purged) = server.room_sweep().await;
    assert_eq!(abandoned, 1);
    assert_eq!(purged, 0, "purge grace has not elapsed");

    let updated = server
        .store()
        .get_room_by_code(&room.room_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, RoomStatus::Abandoned);
}

#[tokio::test]
async fn rooms_with_connected_members_survive_the_idle_sweep() {
    let server = test_server_with(aggressive_reaper_config()).await;
    let (_host, room) = create_room(&server, "Alice", RoomOptions::default()).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (abandoned, _) = server.room_sweep().await;
    assert_eq!(abandoned, 0);

    let updated = server
        .store()
        .get_room_by_code(&room.room_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, RoomStatus::Lobby);
}

#[tokio::test]
async fn a_member_inside_the_game_protects_the_room_from_reaping() {
    let mut config = aggressive_reaper_config();
    // Age threshold of zero would reap every room immediately...
    config.lobby.room_age_reap_secs = 0;
    config.lobby.offpeak_age_reap_secs = 0;
    let server = test_server_with(config).await;

    let (host, room) = create_room(
        &server,
        "Alice",
        RoomOptions {
            game_type: Some("ddf".to_string()),
            ..RoomOptions::default()
        },
    )
    .await;
    let _guest = join_room(&server, &room.room_code, "Bob").await;
    server
        .start_game(host.user_id, &room.room_code)
        .await
        .expect("start");

    tokio::time::sleep(Duration::from_millis(50)).await;

    // ...but a connected member located in the game shields it.
    let (abandoned, _) = server.room_sweep().await;
    assert_eq!(abandoned, 0);

    let updated = server
        .store()
        .get_room_by_code(&room.room_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, RoomStatus::InGame);
}

#[tokio::test]
async fn purge_deletes_aged_out_abandoned_rooms() {
    let mut config = aggressive_reaper_config();
    config.lobby.abandoned_purge_grace_secs = 0;
    let server = test_server_with(config).await;

    let (host, room) = create_room(&server, "Alice", RoomOptions::default()).await;
    server
        .leave_room(host.user_id, &room.room_code)
        .await
        .expect("leave abandons");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_, purged) = server.room_sweep().await;
    assert_eq!(purged, 1);

    assert!(server
        .store()
        .get_room_by_code(&room.room_code)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn session_tokens_expire_at_the_boundary_and_purge() {
    let mut config = Config::default();
    config.lobby.session_token_ttl_secs = 1;
    let server = test_server_with(config).await;

    let (host, room) = create_room(
        &server,
        "Alice",
        RoomOptions {
            game_type: Some("ddf".to_string()),
            ..RoomOptions::default()
        },
    )
    .await;
    let mut guest = join_room(&server, &room.room_code, "Bob").await;
    server
        .start_game(host.user_id, &room.room_code)
        .await
        .expect("start");

    let event = guest
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
        .expect("token present");

    // Inside the TTL the token resolves.
    assert!(server.sessions().resolve(&token).await.unwrap().is_some());

    // Past the TTL it does not, and the purger removes the rows.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(server.sessions().resolve(&token).await.unwrap().is_none());
    let purged = server.sessions().purge().await.unwrap();
    assert_eq!(purged, 2, "one token per connected member");
}

#[tokio::test]
async fn abandoned_room_rejects_joins_until_purged() {
    let server = test_server_with(aggressive_reaper_config()).await;
    let (host, room) = create_room(&server, "Alice", RoomOptions::default()).await;
    server
        .leave_room(host.user_id, &room.room_code)
        .await
        .expect("leave");

    let probe = TestClient::connect(&server);
    let err = server
        .join_room(
            probe.conn_id,
            probe.user_id,
            room.room_code.clone(),
            "Bob".to_string(),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.code(),
        gamebuddies_server::protocol::ErrorCode::RoomNotAvailable
    );
}

#[tokio::test]
async fn finished_rooms_are_purged_after_the_grace_period() {
    let mut config = aggressive_reaper_config();
    config.lobby.abandoned_purge_grace_secs = 0;
    config.security.api_keys.push(service_key_entry());
    let server = test_server_with(config).await;

    let (host, room) = create_room(
        &server,
        "Alice",
        RoomOptions {
            game_type: Some("ddf".to_string()),
            ..RoomOptions::default()
        },
    )
    .await;
    let _guest = join_room(&server, &room.room_code, "Bob").await;
    server
        .start_game(host.user_id, &room.room_code)
        .await
        .expect("start");

    let identity = server.api_keys().validate(&service_key()).unwrap();
    server
        .end_game(&room.room_code, ReturnCaller::Service(identity), false)
        .await
        .expect("finish");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_, purged) = server.room_sweep().await;
    assert_eq!(purged, 1);
    assert!(server
        .store()
        .get_room_by_code(&room.room_code)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn members_reported_alive_by_the_game_survive_the_stale_sweep() {
    let mut config = Config::default();
    config.lobby.stale_member_threshold_secs = 1;
    config.security.api_keys.push(service_key_entry());
    let server = test_server_with(config).await;

    let (host, room) = create_room(
        &server,
        "Alice",
        RoomOptions {
            game_type: Some("ddf".to_string()),
            ..RoomOptions::default()
        },
    )
    .await;
    let guest = join_room(&server, &room.room_code, "Bob").await;
    server
        .start_game(host.user_id, &room.room_code)
        .await
        .expect("start");

    // Lobby sockets are gone; only the game reports for the guest.
    server.registry().detach(&host.conn_id);
    server.registry().detach(&guest.conn_id);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let identity = server.api_keys().validate(&service_key()).unwrap();
    server
        .report_player_status(
            &room.room_code,
            guest.user_id,
            gamebuddies_server::server::ReportedStatus::InGame,
            &identity,
        )
        .await
        .expect("status report");

    let flipped = server.stale_member_sweep().await;
    assert_eq!(flipped, 1, "only the silent host is reaped");

    let guest_row = server
        .store()
        .get_member(&room.room_id, &guest.user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(guest_row.is_connected);
    assert_eq!(guest_row.current_location, MemberLocation::Game);
}

fn service_key() -> String {
    format!("gb_ddf_{}", "9c1d".repeat(16))
}

fn service_key_entry() -> gamebuddies_server::config::ApiKeyEntry {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(service_key().as_bytes());
    gamebuddies_server::config::ApiKeyEntry {
        service: "ddf".to_string(),
        key_hash: digest.iter().map(|b| format!("{b:02x}")).collect(),
        all_rooms: false,
    }
}
