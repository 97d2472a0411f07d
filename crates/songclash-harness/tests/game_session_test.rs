//! End-to-end sessions: client state machines coupled to the server driver
//! through the in-memory harness, with virtual time.

use std::time::Duration;

use songclash_client::{ClientEvent, RoomNotice};
use songclash_harness::{SimEnv, SimHarness};
use songclash_proto::{RoomPhase, Track, UserProfile};
use songclash_server::collab::{MemoryDirectory, PlaylistSource};

fn profile(id: u64) -> UserProfile {
    UserProfile { user_id: id, name: format!("user-{id}"), icon: 0 }
}

fn harness() -> SimHarness {
    let directory = MemoryDirectory::new()
        .with_user("tok-a", profile(1))
        .with_user("tok-b", profile(2));

    let tracks = PlaylistSource::new(vec![
        Track { title: "Alpha".to_string(), preview_url: None },
        Track { title: "Beta".to_string(), preview_url: None },
    ]);

    SimHarness::new(SimEnv::with_seed(42), directory, tracks)
}

/// Create a room with peer 0 and join peer 1 into it. Returns the code.
fn set_up_room(harness: &mut SimHarness) -> (usize, usize, String) {
    let a = harness.add_client("tok-a").unwrap();
    let b = harness.add_client("tok-b").unwrap();

    harness.intent(a, ClientEvent::CreateRoom).unwrap();
    let code = harness.client(a).room().unwrap().code.clone();

    harness.intent(b, ClientEvent::JoinRoom { room: code.clone() }).unwrap();
    (a, b, code)
}

#[test]
fn handshake_resolves_identity() {
    let mut harness = harness();
    let a = harness.add_client("tok-a").unwrap();

    let profile = harness.client(a).profile().unwrap();
    assert_eq!(profile.user_id, 1);
    assert_eq!(harness.server().driver().connection_count(), 1);
}

#[test]
fn both_clients_observe_membership() {
    let mut harness = harness();
    let (a, b, code) = set_up_room(&mut harness);

    for peer in [a, b] {
        let room = harness.client(peer).room().unwrap();
        assert_eq!(room.code, code);
        assert_eq!(room.users.len(), 2);
        assert_eq!(room.host_id, 1);
    }
    assert!(harness.client(a).is_host());
    assert!(!harness.client(b).is_host());
}

#[test]
fn full_game_with_rematch_readiness() {
    let mut harness = harness();
    let (a, b, _code) = set_up_room(&mut harness);
    harness.take_notices(a);
    harness.take_notices(b);

    // Unanimous readiness starts round 1 on both clients
    harness.intent(a, ClientEvent::ToggleReady).unwrap();
    harness.intent(b, ClientEvent::ToggleReady).unwrap();

    for peer in [a, b] {
        let room = harness.client(peer).room().unwrap();
        assert_eq!(room.phase, RoomPhase::RoundActive);
        assert_eq!(room.current_round, 1);
    }

    // B wins every round; titles alternate Alpha/Beta
    for round in 1..=5u32 {
        let answer = if round % 2 == 1 { "alpha" } else { "beta" };
        harness.intent(b, ClientEvent::SubmitAnswer { answer: answer.to_string() }).unwrap();

        if round < 5 {
            harness.advance(Duration::from_secs(5)).unwrap();
        }
    }

    // Both clients saw the game end with B as winner
    for peer in [a, b] {
        let notices = harness.take_notices(peer);
        assert!(
            notices.iter().any(|n| matches!(n, RoomNotice::GameEnded { winner_id: 2 })),
            "peer missed gameEnd: {notices:?}"
        );

        let room = harness.client(peer).room().unwrap();
        assert_eq!(room.phase, RoomPhase::Waiting);
        assert_eq!(room.current_round, 1);
    }

    // Scores were recorded exactly once per participant
    let mut records = harness.server().scores().recorded();
    records.sort_unstable();
    assert_eq!(records, vec![(1, 0), (2, 5)]);
}

#[test]
fn wrong_answers_do_not_resolve_the_round() {
    let mut harness = harness();
    let (a, b, _code) = set_up_room(&mut harness);

    harness.intent(a, ClientEvent::ToggleReady).unwrap();
    harness.intent(b, ClientEvent::ToggleReady).unwrap();

    harness.intent(a, ClientEvent::SubmitAnswer { answer: "Wrong".to_string() }).unwrap();
    assert_eq!(harness.client(a).room().unwrap().phase, RoomPhase::RoundActive);

    // First correct answer after the wrong one wins
    harness.intent(b, ClientEvent::SubmitAnswer { answer: "Alpha".to_string() }).unwrap();

    let room = harness.client(a).room().unwrap();
    assert_eq!(room.phase, RoomPhase::RoundResolved);
    assert_eq!(room.scores.get(&2), Some(&1));
    assert_eq!(room.scores.get(&1), Some(&0));
}

#[test]
fn unanswered_round_expires_for_everyone() {
    let mut harness = harness();
    let (a, b, _code) = set_up_room(&mut harness);

    harness.intent(a, ClientEvent::ToggleReady).unwrap();
    harness.intent(b, ClientEvent::ToggleReady).unwrap();
    harness.take_notices(a);

    harness.advance(Duration::from_secs(30)).unwrap();

    let notices = harness.take_notices(a);
    assert!(
        notices
            .iter()
            .any(|n| matches!(n, RoomNotice::RoundEnded { round: 1, winner_id: None, .. })),
        "expected an expiry roundEnd: {notices:?}"
    );

    // Grace period later, round 2 starts
    harness.advance(Duration::from_secs(5)).unwrap();
    assert_eq!(harness.client(b).room().unwrap().current_round, 2);
}

#[test]
fn host_drop_mid_round_migrates_host_and_keeps_round() {
    let mut harness = harness();
    let (a, b, _code) = set_up_room(&mut harness);

    harness.intent(a, ClientEvent::ToggleReady).unwrap();
    harness.intent(b, ClientEvent::ToggleReady).unwrap();
    harness.take_notices(b);

    // Host transport drops mid-round
    harness.drop_transport(a).unwrap();

    let room = harness.client(b).room().unwrap();
    assert_eq!(room.host_id, 2, "B promoted to host");
    assert_eq!(room.users.len(), 1);
    assert!(harness.client(b).is_host());

    // The round itself is unaffected by the disconnect
    assert_eq!(room.phase, RoomPhase::RoundActive);
    harness.intent(b, ClientEvent::SubmitAnswer { answer: "Alpha".to_string() }).unwrap();
    assert_eq!(harness.client(b).room().unwrap().phase, RoomPhase::RoundResolved);
}

#[test]
fn reconnect_reconciles_from_snapshot_only() {
    let mut harness = harness();
    let (a, b, code) = set_up_room(&mut harness);

    // A drops; the server reaps its membership while A's local view still
    // shows the room
    harness.drop_transport(a).unwrap();
    assert_eq!(harness.client(a).room().unwrap().code, code);
    assert_eq!(harness.client(b).room().unwrap().users.len(), 1);

    // On reconnect the snapshot shows A is no longer a member; the stale
    // local view is dropped rather than patched from missed events
    harness.reconnect(a).unwrap();
    assert!(harness.client(a).room().is_none());
    let notices = harness.take_notices(a);
    assert!(notices.iter().any(|n| matches!(n, RoomNotice::RoomClosed)));

    // A can rejoin the waiting room and play on
    harness.intent(a, ClientEvent::JoinRoom { room: code.clone() }).unwrap();
    assert_eq!(harness.client(a).room().unwrap().users.len(), 2);
    assert_eq!(harness.client(a).room().unwrap().host_id, 2, "B kept the host role");
}

#[test]
fn last_disconnect_deletes_the_room() {
    let mut harness = harness();
    let (a, b, code) = set_up_room(&mut harness);

    harness.drop_transport(a).unwrap();
    assert!(harness.server().driver().has_room(&code));

    harness.drop_transport(b).unwrap();
    assert!(!harness.server().driver().has_room(&code));
    assert_eq!(harness.server().driver().room_count(), 0);
}
