//! Integration tests for the game server over loopback TCP
//!
//! These tests verify the end-to-end behavior of:
//! - Key exchange and encrypted framing
//! - Login, character creation and map entry
//! - Dispatch ordering through the connection's partition
//! - Duplicate identity handling and unknown messages

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;

use common::TestServer;
use embergate_server::game::{CharacterRecord, CharacterRepository};
use embergate_server::net::buffer::PacketWriter;
use embergate_server::protocol::{
    ActionType, MsgAction, MsgConnect, MsgRegister, MsgTalk, Packet, PacketType, TalkChannel,
};

async fn seed_character(server: &TestServer, account_id: u32, name: &str) -> CharacterRecord {
    server
        .repository
        .create(CharacterRecord::new(account_id, name, 1003, 10))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_login_spawn_and_jump() {
    let server = TestServer::start().await;
    let record = seed_character(&server, 77, "Ember").await;

    let mut client = server.login(77).await;
    let answer: MsgTalk = client.recv().await;
    assert_eq!(answer.channel_type(), Some(TalkChannel::Login));
    assert_eq!(answer.message, "ANSWER_OK");
    assert_eq!(server.state.roles.count(), 1);

    client
        .send(&MsgAction::new(record.identity, ActionType::LoginSpawn))
        .await;
    let spawn: MsgAction = client.recv().await;
    assert_eq!(spawn.action_type(), Some(ActionType::LoginSpawn));
    assert_eq!(spawn.identity, record.identity);
    assert_eq!(spawn.command, 1010);
    assert_eq!((spawn.x, spawn.y), (61, 109));
    let map = server.state.maps.get(1010).unwrap();
    assert!(map.contains(record.identity));

    let mut jump = MsgAction::new(record.identity, ActionType::MapJump);
    jump.set_command_x(70);
    jump.set_command_y(112);
    client.send(&jump).await;
    let moved: MsgAction = client.recv().await;
    assert_eq!((moved.x, moved.y), (70, 112));

    // Logout saves the new position and leaves the map.
    drop(client);
    let repository = server.repository.clone();
    let identity = record.identity;
    assert!(
        server
            .eventually(|| repository.get(identity).map(|r| (r.x, r.y)) == Some((70, 112)))
            .await
    );
    assert!(server.eventually(|| server.state.roles.count() == 0).await);
    assert!(!map.contains(record.identity));

    server.stop().await;
}

#[tokio::test]
async fn test_new_account_registers_character() {
    let server = TestServer::start().await;

    let (token, code) = server.state.issue_login_ticket(5).await.unwrap();
    let mut client = server.connect().await;
    client
        .send(&MsgConnect {
            token,
            code,
            client_version: 5017,
            language: "En".to_string(),
            file_checksum: 0,
        })
        .await;
    let answer: MsgTalk = client.recv().await;
    assert_eq!(answer.message, "NEW_ROLE");
    assert!(server.state.registrations.contains(&token));

    // Ninja is closed for creation.
    let mut register = MsgRegister {
        username: "account5".to_string(),
        character_name: "Cinder".to_string(),
        mesh: 1004,
        class: 50,
        token,
    };
    client.send(&register).await;
    let rejected: MsgTalk = client.recv().await;
    assert_eq!(rejected.channel_type(), Some(TalkChannel::Register));
    assert_eq!(rejected.message, MsgTalk::register_invalid().message);

    register.class = 20;
    client.send(&register).await;
    let created: MsgTalk = client.recv().await;
    assert_eq!(created.message, "ANSWER_OK");

    let stored = server.repository.find_by_account(5).await.unwrap().unwrap();
    assert_eq!(stored.name, "Cinder");
    assert_eq!((stored.map_id, stored.level, stored.silver), (1010, 1, 1000));
    assert!(!server.state.registrations.contains(&token));

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_ticket_disconnects() {
    let server = TestServer::start().await;

    let mut client = server.connect().await;
    client
        .send(&MsgConnect {
            token: 1234,
            code: 5678,
            client_version: 5017,
            language: "En".to_string(),
            file_checksum: 0,
        })
        .await;
    let answer: MsgTalk = client.recv().await;
    assert_eq!(answer.message, MsgTalk::login_invalid().message);
    assert!(client.closed().await);

    server.stop().await;
}

#[tokio::test]
async fn test_frame_before_exchange_is_never_dispatched() {
    let server = TestServer::start().await;
    seed_character(&server, 9, "Ash").await;
    let (token, code) = server.state.issue_login_ticket(9).await.unwrap();

    // Skip the key exchange and send an application frame in clear text.
    let mut client = common::TestClient::open(server.address).await;
    let _offer = client.recv_frame().await.unwrap();
    client
        .send(&MsgConnect {
            token,
            code,
            client_version: 5017,
            language: "En".to_string(),
            file_checksum: 0,
        })
        .await;

    assert!(client.closed().await);
    assert_eq!(server.state.roles.count(), 0);
    // The ticket was never redeemed.
    assert!(server.state.logins.contains_key(&token));

    server.stop().await;
}

#[tokio::test]
async fn test_dispatch_waits_for_earlier_partition_work() {
    let server = TestServer::start().await;
    let record = seed_character(&server, 12, "Kai").await;

    let mut client = server.login(12).await;
    let _: MsgTalk = client.recv().await;

    // The first connection is bound to packet partition 0.
    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    server
        .state
        .packet_processor
        .queue_future(0, async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    client
        .send(&MsgAction::new(record.identity, ActionType::LoginComplete))
        .await;
    let echo: MsgAction = client.recv().await;
    assert_eq!(echo.action_type(), Some(ActionType::LoginComplete));
    assert!(done.load(Ordering::SeqCst));

    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_login_disconnects_both() {
    let server = TestServer::start().await;
    seed_character(&server, 21, "Blaze").await;

    let mut first = server.login(21).await;
    let ok: MsgTalk = first.recv().await;
    assert_eq!(ok.message, "ANSWER_OK");

    let mut second = server.login(21).await;
    let refused: MsgTalk = second.recv().await;
    assert_eq!(refused.message, MsgTalk::login_already_online().message);

    assert!(second.closed().await);
    assert!(first.closed().await);
    assert!(server.eventually(|| server.state.roles.count() == 0).await);

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_packet_reported_to_privileged_character() {
    let server = TestServer::start().await;
    let record = seed_character(&server, 31, "Ash[GM]").await;

    let mut client = server.login(31).await;
    let _: MsgTalk = client.recv().await;

    let mut walk = PacketWriter::new();
    walk.write_u32(record.identity).write_u32(0);
    client.send_frame(walk.finish(PacketType::MsgWalk.as_u16())).await;

    let notice: MsgTalk = client.recv().await;
    assert_eq!(notice.channel_type(), Some(TalkChannel::Service));
    assert_eq!(notice.message, "Missing packet 10005, Length 12");

    // The connection survives.
    client
        .send(&MsgAction::new(record.identity, ActionType::LoginComplete))
        .await;
    let echo: MsgAction = client.recv().await;
    assert_eq!(echo.action_type(), Some(ActionType::LoginComplete));

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let server = TestServer::start().await;
    let record = seed_character(&server, 41, "Flint").await;

    let mut client = server.login(41).await;
    let _: MsgTalk = client.recv().await;

    // A MsgAction cut short after the command field.
    let full = MsgAction::new(record.identity, ActionType::LoginComplete).encode();
    let mut short = full[..12].to_vec();
    short[0] = 12;
    short[1] = 0;
    client.send_frame(Bytes::from(short)).await;

    client
        .send(&MsgAction::new(record.identity, ActionType::LoginComplete))
        .await;
    let echo: MsgAction = client.recv().await;
    assert_eq!(echo.identity, record.identity);

    server.stop().await;
}
