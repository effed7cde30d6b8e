//! End-to-end scenarios driven through the login pipeline and the
//! packet dispatcher, against the in-memory backend.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::Utc;

use bancho::{
    packets, ClientPacket, MatchData, MatchTeam, Message, Mods, Reader, ServerPacketId,
    SlotStatus, TeamType, WinCondition,
};
use cho::backend::{Backend, MemoryBackend, ModeStats, Privileges, SubmittedScore, User};
use cho::config::Config;
use cho::handlers;
use cho::login::{self, LoginOutcome};
use cho::multiplayer::actions;
use cho::multiplayer::ScoreKey;
use cho::server::Server;
use cho::session::Session;

#[tokio::test]
async fn test_login_bootstrap() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Alice"));

    let alice = login_session(&server, "Alice").await;
    assert_eq!("Alice", alice.name);
    assert!(!alice.restricted());

    // The same session must be reachable through every index.
    let by_id = server.sessions.get_by_id(1001).await.unwrap();
    let by_name = server.sessions.get_by_name("alice").await.unwrap();
    assert_eq!(alice.token, by_id.token);
    assert_eq!(alice.token, by_name.token);
}

#[tokio::test]
async fn test_login_bootstrap_payload_shape() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Alice"));

    let body = login_body("Alice");
    let outcome = login::login(&server, &body, localhost()).await.unwrap();
    let LoginOutcome::Success { body, .. } = outcome else {
        panic!("login failed");
    };

    let ids = packet_ids(&body);
    assert_eq!(&ids[..3], &[75, 5, 71]); // protocol version, user id, privileges
    assert!(ids.contains(&89)); // channel info end
    assert!(ids.contains(&72)); // friends list
    assert!(ids.contains(&83)); // own presence
    assert!(ids.contains(&11)); // own stats
}

#[tokio::test]
async fn test_login_ghost_eviction() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Alice"));

    let alice = login_session(&server, "Alice").await;

    // A second login while the first is still active is refused.
    let outcome = login::login(&server, &login_body("Alice"), localhost())
        .await
        .unwrap();
    match outcome {
        LoginOutcome::Fail { token, body } => {
            assert_eq!("user-ghosted", token);
            assert!(packet_ids(&body).contains(&5));
            assert_eq!(packets::user_id(-1), body[..11].to_vec());
        }
        LoginOutcome::Success { .. } => panic!("ghost login was allowed"),
    }

    // Once the old session has been silent long enough, it is evicted.
    alice.set_last_recv_time(Utc::now().timestamp() - 11);
    let alice2 = login_session(&server, "Alice").await;
    assert_ne!(alice.token, alice2.token);
    assert!(server.sessions.get_by_token(&alice.token).await.is_none());
    assert_eq!(
        alice2.token,
        server.sessions.get_by_id(1001).await.unwrap().token
    );

    // Only the first login paid for a real credential check; the rest
    // hit the memo cache.
    assert_eq!(1, memory.state.lock().unwrap().credential_checks);
}

#[tokio::test]
async fn test_freemods_toggle() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Hoster"));
    let host = login_session(&server, "Hoster").await;

    actions::create_match(
        &server,
        &host,
        match_data("room", "pw", Mods::DOUBLE_TIME | Mods::HIDDEN),
    )
    .await;
    let entry = server.matches.get(0).await.unwrap();
    assert_eq!(Some(0), entry.lock().await.slot_id_of(host.id));

    // Freemods on: slots inherit the non-speed mods, the room keeps
    // the speed-changing subset.
    let mut data = entry.lock().await.to_data();
    data.freemods = true;
    actions::change_settings(&server, &host, data).await;
    {
        let m = entry.lock().await;
        assert_eq!(Mods::DOUBLE_TIME, m.mods);
        assert_eq!(Mods::HIDDEN, m.slots[0].mods);
    }

    // The host swaps their personal pick to HR.
    actions::change_mods(&server, &host, (Mods::DOUBLE_TIME | Mods::HARD_ROCK).bits()).await;
    {
        let m = entry.lock().await;
        assert_eq!(Mods::DOUBLE_TIME, m.mods);
        assert_eq!(Mods::HARD_ROCK, m.slots[0].mods);
    }

    // Freemods off: the host's mods merge back into the room.
    let mut data = entry.lock().await.to_data();
    data.freemods = false;
    actions::change_settings(&server, &host, data).await;
    {
        let m = entry.lock().await;
        assert_eq!(Mods::DOUBLE_TIME | Mods::HARD_ROCK, m.mods);
        assert_eq!(Mods::empty(), m.slots[0].mods);
    }
}

#[tokio::test]
async fn test_match_start_load_skip_complete() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Hoster"));
    memory.add_user(user(1002, "Guest"));
    let host = login_session(&server, "Hoster").await;
    let guest = login_session(&server, "Guest").await;

    actions::create_match(&server, &host, match_data("room", "pw", Mods::empty())).await;
    actions::join_match(&server, &guest, 0, "pw").await;
    let entry = server.matches.get(0).await.unwrap();

    actions::set_slot_status(&server, &host, SlotStatus::READY).await;
    actions::set_slot_status(&server, &guest, SlotStatus::READY).await;
    drain(&[&host, &guest]).await;

    // Start: both ready slots go live.
    actions::start(&server, &host).await;
    {
        let m = entry.lock().await;
        assert!(m.in_progress);
        assert_eq!(SlotStatus::PLAYING, m.slots[0].status);
        assert_eq!(SlotStatus::PLAYING, m.slots[1].status);
    }
    assert!(packet_ids(&host.dequeue().await).contains(&(ServerPacketId::MatchStart as u16)));
    assert!(packet_ids(&guest.dequeue().await).contains(&(ServerPacketId::MatchStart as u16)));

    // Load barrier: releases after the *second* load.
    actions::load_complete(&server, &host).await;
    assert!(!packet_ids(&guest.dequeue().await)
        .contains(&(ServerPacketId::MatchAllPlayersLoaded as u16)));
    actions::load_complete(&server, &guest).await;
    assert!(packet_ids(&guest.dequeue().await)
        .contains(&(ServerPacketId::MatchAllPlayersLoaded as u16)));

    // Skip barrier, same shape.
    actions::skip_request(&server, &host).await;
    assert!(!packet_ids(&guest.dequeue().await).contains(&(ServerPacketId::MatchSkip as u16)));
    actions::skip_request(&server, &guest).await;
    assert!(packet_ids(&guest.dequeue().await).contains(&(ServerPacketId::MatchSkip as u16)));

    // Completion: the last finisher lowers the barrier.
    actions::complete(&server, &host).await;
    assert!(entry.lock().await.in_progress);
    actions::complete(&server, &guest).await;
    {
        let m = entry.lock().await;
        assert!(!m.in_progress);
        assert_eq!(SlotStatus::NOT_READY, m.slots[0].status);
        assert_eq!(SlotStatus::NOT_READY, m.slots[1].status);
    }
    assert!(packet_ids(&guest.dequeue().await).contains(&(ServerPacketId::MatchComplete as u16)));
}

#[tokio::test]
async fn test_scrimmage_winner() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "CaptainA"));
    memory.add_user(user(1002, "CaptainB"));
    let a = login_session(&server, "CaptainA").await;
    let b = login_session(&server, "CaptainB").await;

    actions::create_match(
        &server,
        &a,
        match_data("OWC2015: (A) vs. (B)", "", Mods::empty()),
    )
    .await;
    actions::join_match(&server, &b, 0, "").await;
    let entry = server.matches.get(0).await.unwrap();

    {
        let mut m = entry.lock().await;
        m.team_type = TeamType::TeamVs;
        m.win_condition = WinCondition::Accuracy;
        m.is_scrimming = true;
        m.winning_pts = 3;
        m.map_md5 = "scrim-map".to_string();
        m.slots[0].team = MatchTeam::Blue;
        m.slots[1].team = MatchTeam::Red;
        m.match_points.insert(ScoreKey::Team(MatchTeam::Blue), 2);
        m.match_points.insert(ScoreKey::Team(MatchTeam::Red), 2);
    }

    memory.add_submission(a.id, "scrim-map", submission_with_accuracy(98.4));
    memory.add_submission(b.id, "scrim-map", submission_with_accuracy(95.1));
    drain(&[&a, &b]).await;

    cho::multiplayer::update_matchpoints(&server, entry.clone(), vec![a.id, b.id], 1).await;

    let lines = chat_lines(&a.dequeue().await);
    assert!(lines.contains(&"A takes the point! (98.40% vs. 95.10%)".to_string()));
    assert!(lines.contains(
        &"A takes the match, finishing OWC2015 with a score of 3 - 2! Congratulations!"
            .to_string()
    ));

    let m = entry.lock().await;
    assert!(!m.is_scrimming);
    assert!(m.match_points.is_empty());
    assert_eq!(
        Some(&Some(ScoreKey::Team(MatchTeam::Blue))),
        m.winners.last()
    );
}

#[tokio::test]
async fn test_spectator_fanout() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Alice"));
    memory.add_user(user(1002, "Bob"));
    memory.add_user(user(1003, "Carol"));
    let alice = login_session(&server, "Alice").await;
    let bob = login_session(&server, "Bob").await;
    let carol = login_session(&server, "Carol").await;
    drain(&[&alice, &bob, &carol]).await;

    dispatch(&server, &alice, ClientPacket::StartSpectating { target_id: bob.id }).await;
    let bob_frames = frames(&bob.dequeue().await);
    assert!(bob_frames.contains(&(
        ServerPacketId::SpectatorJoined as u16,
        alice.id.to_le_bytes().to_vec()
    )));

    drain(&[&alice]).await;
    dispatch(&server, &carol, ClientPacket::StartSpectating { target_id: bob.id }).await;
    let bob_frames = frames(&bob.dequeue().await);
    assert!(bob_frames.contains(&(
        ServerPacketId::SpectatorJoined as u16,
        carol.id.to_le_bytes().to_vec()
    )));
    let alice_frames = frames(&alice.dequeue().await);
    assert!(alice_frames.contains(&(
        ServerPacketId::FellowSpectatorJoined as u16,
        carol.id.to_le_bytes().to_vec()
    )));

    // Replay frames are re-framed with id 15 and fanned out verbatim.
    drain(&[&alice, &carol]).await;
    let payload = [9u8, 9, 9];
    dispatch(&server, &bob, ClientPacket::SpectateFrames { raw: &payload }).await;

    let expected = vec![0x0f, 0x00, 0x00, 3, 0, 0, 0, 9, 9, 9];
    assert_eq!(expected, alice.dequeue().await);
    assert_eq!(expected, carol.dequeue().await);

    // Both watchers hang off the same spectator channel.
    let chan = server.channels.fetch(&format!("#spec_{}", bob.id)).await.unwrap();
    assert_eq!(3, chan.num_players().await);
}

#[tokio::test]
async fn test_private_message_blocking() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Dan"));
    memory.add_user(user(1002, "Eve"));
    let dan = login_session(&server, "Dan").await;
    let eve = login_session(&server, "Eve").await;

    dispatch(&server, &dan, ClientPacket::ToggleBlockNonFriendDms { value: 1 }).await;
    drain(&[&dan, &eve]).await;

    dispatch(
        &server,
        &eve,
        ClientPacket::SendPrivateMessage(Message {
            sender: "Eve".to_string(),
            text: "hey!".to_string(),
            recipient: "Dan".to_string(),
            sender_id: eve.id,
        }),
    )
    .await;

    assert!(packet_ids(&eve.dequeue().await).contains(&(ServerPacketId::UserDmBlocked as u16)));
    assert!(dan.dequeue().await.is_empty());
    assert!(memory.state.lock().unwrap().mail.is_empty());
}

#[tokio::test]
async fn test_restricted_sessions_are_invisible() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Alice"));
    let mut shady = user(1002, "Shady");
    shady.privileges = Privileges::VERIFIED; // no UNRESTRICTED bit
    memory.add_user(shady);

    let alice = login_session(&server, "Alice").await;
    drain(&[&alice]).await;

    let shady = login_session(&server, "Shady").await;
    assert!(shady.restricted());

    // Alice hears nothing about the restricted login.
    assert!(!packet_ids(&alice.dequeue().await).contains(&(ServerPacketId::UserPresence as u16)));

    // Restricted sessions may not open multiplayer rooms.
    actions::create_match(&server, &shady, match_data("room", "", Mods::empty())).await;
    assert!(server.matches.get(0).await.is_none());
    assert!(packet_ids(&shady.dequeue().await).contains(&(ServerPacketId::MatchJoinFail as u16)));
}

#[tokio::test]
async fn test_channel_join_and_part() {
    let (server, memory) = test_server().await;
    memory.add_user(user(1001, "Alice"));
    let alice = login_session(&server, "Alice").await;
    drain(&[&alice]).await;

    dispatch(
        &server,
        &alice,
        ClientPacket::ChannelJoin { name: "#osu".to_string() },
    )
    .await;
    let chan = server.channels.fetch("#osu").await.unwrap();
    assert!(chan.contains(alice.id).await);
    assert!(packet_ids(&alice.dequeue().await)
        .contains(&(ServerPacketId::ChannelJoinSuccess as u16)));

    // Staff channels stay closed to the public.
    dispatch(
        &server,
        &alice,
        ClientPacket::ChannelJoin { name: "#staff".to_string() },
    )
    .await;
    let staff = server.channels.fetch("#staff").await.unwrap();
    assert!(!staff.contains(alice.id).await);

    dispatch(
        &server,
        &alice,
        ClientPacket::ChannelPart { name: "#osu".to_string() },
    )
    .await;
    assert!(!chan.contains(alice.id).await);
}

/* Helpers */

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

async fn test_server() -> (Server, Arc<MemoryBackend>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (backend, memory) = Backend::in_memory();
    let server = Server::init(Config::default(), backend)
        .await
        .expect("failed to init server");
    (server, memory)
}

fn user(id: i32, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
        privileges: Privileges::UNRESTRICTED | Privileges::VERIFIED,
        pw_bcrypt: format!("{}-pw-md5", name),
        country: "de".to_string(),
        silence_end: 0,
        friends: Vec::new(),
        blocks: Vec::new(),
        stats: vec![ModeStats::default(); 8],
    }
}

fn login_body(name: &str) -> Vec<u8> {
    let date = Utc::now().format("%Y%m%d");
    format!(
        "{name}\n{name}-pw-md5\nb{date}|0|1|{name}-path:wlan0.:{name}-adapters:{name}-uninstall:{name}-disk:|0\n",
        name = name,
        date = date,
    )
    .into_bytes()
}

async fn login_session(server: &Server, name: &str) -> Arc<Session> {
    let outcome = login::login(server, &login_body(name), localhost())
        .await
        .expect("login errored");
    match outcome {
        LoginOutcome::Success { token, .. } => server
            .sessions
            .get_by_token(&token)
            .await
            .expect("session not registered"),
        LoginOutcome::Fail { token, .. } => panic!("login rejected: {}", token),
    }
}

async fn dispatch(server: &Server, session: &Arc<Session>, packet: ClientPacket<'_>) {
    handlers::dispatch(server, session, packet)
        .await
        .expect("handler failed");
}

async fn drain(sessions: &[&Arc<Session>]) {
    for session in sessions {
        session.dequeue().await;
    }
}

fn match_data(name: &str, passwd: &str, mods: Mods) -> MatchData {
    MatchData {
        id: 0,
        in_progress: false,
        mods,
        name: name.to_string(),
        passwd: passwd.to_string(),
        map_name: "artist - song [diff]".to_string(),
        map_id: 1871928,
        map_md5: "0f1ee35cbcbd9eaf61c1cb11172f8e8c".to_string(),
        slot_statuses: [SlotStatus::OPEN; 16],
        slot_teams: [MatchTeam::Neutral; 16],
        slot_ids: [None; 16],
        host_id: 0,
        mode: 0,
        win_condition: WinCondition::Score,
        team_type: TeamType::HeadToHead,
        freemods: false,
        slot_mods: [Mods::empty(); 16],
        seed: 0,
    }
}

fn submission_with_accuracy(accuracy: f32) -> SubmittedScore {
    SubmittedScore {
        score: (accuracy * 10_000.0) as i64,
        accuracy,
        max_combo: 100,
        pp: 0.0,
    }
}

/// The frame ids of a packet stream, in order.
fn packet_ids(data: &[u8]) -> Vec<u16> {
    frames(data).into_iter().map(|(id, _)| id).collect()
}

/// (id, payload) pairs of a packet stream.
fn frames(data: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while data.len() >= pos + 7 {
        let id = u16::from_le_bytes([data[pos], data[pos + 1]]);
        let len =
            u32::from_le_bytes([data[pos + 3], data[pos + 4], data[pos + 5], data[pos + 6]])
                as usize;
        pos += 7;
        out.push((id, data[pos..pos + len].to_vec()));
        pos += len;
    }
    out
}

/// Chat lines carried in SEND_MESSAGE frames.
fn chat_lines(data: &[u8]) -> Vec<String> {
    frames(data)
        .into_iter()
        .filter(|(id, _)| *id == ServerPacketId::SendMessage as u16)
        .filter_map(|(_, payload)| Reader::new(&payload).read_message().ok())
        .map(|msg| msg.text)
        .collect()
}
