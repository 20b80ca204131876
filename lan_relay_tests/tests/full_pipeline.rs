// End-to-end relay scenarios: one `Relay` server, several `Relay` clients,
// all over loopback TCP.
//
// Covers ID negotiation with collisions, roster seeding and upkeep, message
// routing for every audience (including self-echo suppression), disconnect
// cleanup, and automatic reconnect across a server restart.

use lan_relay::{RelayConfig, RelayEvent, RoleState};
use lan_relay_protocol::{Message, Receivers};
use lan_relay_tests::TestPeer;

fn chat(receivers: Receivers, content: &str) -> Message {
    Message::new(receivers, "chat", content)
}

#[test]
fn colliding_ids_are_renamed_in_order() {
    let (mut server, addr) = TestPeer::server();
    let mut first = TestPeer::client(addr, "Alice");
    let second = TestPeer::client(addr, "Alice");
    let third = TestPeer::client(addr, "Alice");

    assert_eq!(first.unique_id(), "Alice");
    assert_eq!(second.unique_id(), "Alice1");
    assert_eq!(third.unique_id(), "Alice2");
    assert_eq!(
        second.count(&RelayEvent::UniqueIdChanged {
            old: "Alice".into(),
            new: "Alice1".into()
        }),
        1
    );
    assert!(
        first
            .history()
            .iter()
            .all(|e| !matches!(e, RelayEvent::UniqueIdChanged { .. }))
    );

    server.poll_until_roster(&["Alice", "Alice1", "Alice2"]);
    first.poll_until_roster(&["Alice", "Alice1", "Alice2"]);
}

#[test]
fn newcomer_roster_is_seeded_from_snapshot() {
    let (_server, addr) = TestPeer::server();
    let mut alice = TestPeer::client(addr, "Alice");
    let mut bob = TestPeer::client(addr, "Bob");

    bob.poll_until_roster(&["Alice", "Bob"]);
    alice.poll_until_roster(&["Alice", "Bob"]);
    alice.wait_for(&RelayEvent::PeerConnected {
        unique_id: "Bob".into(),
    });
}

#[test]
fn chat_reaches_everyone_but_the_sender() {
    let (_server, addr) = TestPeer::server();
    let mut alice = TestPeer::client(addr, "Alice");
    let mut bob = TestPeer::client(addr, "Bob");
    let mut carol = TestPeer::client(addr, "Carol");
    alice.poll_until_roster(&["Alice", "Bob", "Carol"]);

    alice.send(chat(Receivers::AllClients, "hi"));

    for peer in [&mut bob, &mut carol] {
        let msg = peer.poll_until_received();
        assert_eq!(msg.tag, "chat");
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.sender_unique_id.as_deref(), Some("Alice"));
    }
    alice.settle();
    assert!(alice.received().is_empty());
}

#[test]
fn server_direct_message_reaches_only_its_target() {
    let (mut server, addr) = TestPeer::server();
    let mut alice = TestPeer::client(addr, "Alice");
    let mut bob = TestPeer::client(addr, "Bob");
    server.poll_until_roster(&["Alice", "Bob"]);

    server.send(Message::to_client("Bob", "chat", "ping"));

    let msg = bob.poll_until_received();
    assert_eq!(msg.content, "ping");
    assert_eq!(msg.sender_unique_id, None);
    alice.settle();
    assert!(alice.received().is_empty());
}

#[test]
fn server_broadcast_reaches_every_client() {
    let (mut server, addr) = TestPeer::server();
    let mut alice = TestPeer::client(addr, "Alice");
    let mut bob = TestPeer::client(addr, "Bob");
    server.poll_until_roster(&["Alice", "Bob"]);

    server.send(chat(Receivers::AllClients, "news"));
    assert_eq!(alice.poll_until_received().content, "news");
    assert_eq!(bob.poll_until_received().content, "news");
}

#[test]
fn client_direct_message_reaches_only_its_target() {
    let (_server, addr) = TestPeer::server();
    let mut alice = TestPeer::client(addr, "Alice");
    let mut bob = TestPeer::client(addr, "Bob");
    let mut carol = TestPeer::client(addr, "Carol");
    alice.poll_until_roster(&["Alice", "Bob", "Carol"]);

    alice.send(Message::to_client("Carol", "chat", "psst"));

    let msg = carol.poll_until_received();
    assert_eq!(msg.content, "psst");
    assert_eq!(msg.sender_unique_id.as_deref(), Some("Alice"));
    alice.settle();
    bob.settle();
    assert!(alice.received().is_empty());
    assert!(bob.received().is_empty());
}

#[test]
fn server_addressed_messages_surface_on_the_server() {
    let (mut server, addr) = TestPeer::server();
    let alice = TestPeer::client(addr, "Alice");
    let mut bob = TestPeer::client(addr, "Bob");
    server.poll_until_roster(&["Alice", "Bob"]);

    alice.send(chat(Receivers::Server, "for the host"));
    let msg = server.poll_until_received();
    assert_eq!(msg.content, "for the host");
    assert_eq!(msg.sender_unique_id.as_deref(), Some("Alice"));

    alice.send(chat(Receivers::ServerAndAllClients, "for everyone"));
    assert_eq!(server.poll_until_received().content, "for everyone");
    assert_eq!(bob.poll_until_received().content, "for everyone");
    assert_eq!(bob.received().len(), 1);
}

#[test]
fn disconnect_cleans_up_everywhere() {
    let (mut server, addr) = TestPeer::server();
    let mut alice = TestPeer::client(addr, "Alice");
    let mut bob = TestPeer::client(addr, "Bob");
    let mut carol = TestPeer::client(addr, "Carol");
    alice.poll_until_roster(&["Alice", "Bob", "Carol"]);
    carol.poll_until_roster(&["Alice", "Bob", "Carol"]);

    bob.relay_mut().disconnect_client().unwrap();
    assert_eq!(bob.relay().state(), RoleState::Idle);

    let left = RelayEvent::PeerDisconnected {
        unique_id: "Bob".into(),
    };
    server.poll_until_roster(&["Alice", "Carol"]);
    for peer in [&mut alice, &mut carol] {
        peer.wait_for(&left);
        peer.poll_until_roster(&["Alice", "Carol"]);
        peer.settle();
        assert_eq!(peer.count(&left), 1);
    }

    // The freed ID is handed out again as-is.
    let again = TestPeer::client(addr, "Bob");
    assert_eq!(again.unique_id(), "Bob");
}

#[test]
fn client_reconnects_after_server_restart() {
    let (server, addr) = TestPeer::server();
    let config = RelayConfig {
        reconnect_delay_ms: 100,
        ..RelayConfig::loopback()
    };
    let mut alice = TestPeer::client_with(config, addr, "Alice");
    assert!(alice.relay().is_client_connected());

    drop(server);
    alice.wait_for(&RelayEvent::Disconnected);
    alice.poll_until_roster(&[]);
    assert!(!alice.relay().is_client_connected());

    let (mut restarted, _) = TestPeer::server_on(addr.port());
    alice.wait_for(&RelayEvent::Connected {
        unique_id: "Alice".into(),
    });
    alice.poll_until_registered();
    assert_eq!(alice.relay().state(), RoleState::Connected);
    restarted.poll_until_roster(&["Alice"]);

    // The reconnected session relays normally.
    alice.send(chat(Receivers::Server, "back"));
    assert_eq!(restarted.poll_until_received().content, "back");
}

#[test]
fn intentional_disconnect_does_not_reconnect() {
    let (mut server, addr) = TestPeer::server();
    let config = RelayConfig {
        reconnect_delay_ms: 50,
        ..RelayConfig::loopback()
    };
    let mut alice = TestPeer::client_with(config, addr, "Alice");
    server.poll_until_roster(&["Alice"]);

    alice.relay_mut().disconnect_client().unwrap();
    server.poll_until_roster(&[]);
    server.settle();
    assert_eq!(
        server.count(&RelayEvent::PeerConnected {
            unique_id: "Alice".into()
        }),
        1
    );
    assert_eq!(alice.relay().state(), RoleState::Idle);
}
