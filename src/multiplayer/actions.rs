//! Multiplayer room operations, from room creation to the completion
//! barrier. Handlers delegate here after decoding; every function locks
//! the match mutex at most once and never while holding a session's
//! state lock.

use std::sync::Arc;

use bancho::{packets, MatchData, MatchTeam, Mods, SlotStatus, TeamType};
use tokio::sync::MutexGuard;

use crate::backend::Privileges;
use crate::chat;
use crate::config::SUBMISSION_TIMEOUT_SECS;
use crate::multiplayer::{update_matchpoints, Match, MAX_MATCHES};
use crate::server::Server;
use crate::session::Session;

/// Enqueue raw bytes to everyone in the match channel, skipping
/// `immune` ids; optionally mirror to `#lobby`.
pub async fn send_data(server: &Server, m: &Match, data: &[u8], lobby: bool, immune: &[i32]) {
    if let Some(chat) = server.channels.fetch(&m.chat_name()).await {
        for id in chat.player_ids().await {
            if immune.contains(&id) {
                continue;
            }
            if let Some(member) = server.sessions.get_by_id(id).await {
                member.enqueue(data).await;
            }
        }
    }

    if lobby {
        if let Some(lobby_chan) = server.channels.fetch("#lobby").await {
            for id in lobby_chan.player_ids().await {
                if let Some(member) = server.sessions.get_by_id(id).await {
                    member.enqueue(data).await;
                }
            }
        }
    }
}

/// Broadcast the room state: with password to members, without to the
/// lobby listing.
pub async fn send_state(server: &Server, m: &Match, lobby: bool) {
    let data = m.to_data();
    send_data(server, m, &packets::update_match(&data, true), false, &[]).await;

    if lobby {
        if let Some(lobby_chan) = server.channels.fetch("#lobby").await {
            let packet = packets::update_match(&data, false);
            for id in lobby_chan.player_ids().await {
                if let Some(member) = server.sessions.get_by_id(id).await {
                    member.enqueue(&packet).await;
                }
            }
        }
    }
}

async fn reject_with(session: &Session, reason: &str) {
    session.enqueue(&packets::match_join_fail()).await;
    session.enqueue(&packets::notification(reason)).await;
}

/// CREATE_MATCH: insert the room, spin up its chat, seat the host.
pub async fn create_match(server: &Server, session: &Arc<Session>, data: MatchData) {
    if session.restricted() {
        reject_with(session, "Multiplayer is not available while restricted.").await;
        return;
    }
    if session.state.lock().await.silenced() {
        reject_with(session, "Multiplayer is not available while silenced.").await;
        return;
    }

    let mut m = Match::from_data(&data);
    m.host_id = session.id;
    let entry = match server.matches.append(m).await {
        Some(entry) => entry,
        None => {
            chat::send_bot_private(
                server,
                session,
                "Failed to create match (no slots available).",
            )
            .await;
            session.enqueue(&packets::match_join_fail()).await;
            return;
        }
    };

    let m = entry.lock().await;
    let chat_name = m.chat_name();
    let created = server
        .channels
        .create(
            &chat_name,
            &format!("Match #{} discussion.", m.id),
            Privileges::UNRESTRICTED,
            Privileges::UNRESTRICTED,
            false,
            true,
        )
        .await;
    if let Err(err) = created {
        log::error!("failed to create {}: {}", chat_name, err);
        let id = m.id;
        drop(m);
        server.matches.remove(id).await;
        reject_with(session, "Failed to create #multiplayer channel.").await;
        return;
    }

    let passwd = m.passwd.clone();
    join_match_locked(server, session, m, &passwd).await;

    chat::send_bot_to_channel_named(
        server,
        &chat_name,
        &format!("Match created by {}.", session.name),
    )
    .await;
    log::info!("{} created a new multiplayer match", session);
}

/// JOIN_MATCH with a real match id (0-63).
pub async fn join_match(server: &Server, session: &Arc<Session>, match_id: i32, passwd: &str) {
    if !(0..MAX_MATCHES as i32).contains(&match_id) {
        session.enqueue(&packets::match_join_fail()).await;
        return;
    }

    let entry = match server.matches.get(match_id as u16).await {
        Some(entry) => entry,
        None => {
            log::warn!("{} tried to join non-existent match {}", session, match_id);
            session.enqueue(&packets::match_join_fail()).await;
            return;
        }
    };

    if session.restricted() {
        reject_with(session, "Multiplayer is not available while restricted.").await;
        return;
    }
    if session.state.lock().await.silenced() {
        reject_with(session, "Multiplayer is not available while silenced.").await;
        return;
    }

    let m = entry.lock().await;
    join_match_locked(server, session, m, passwd).await;
}

/// Seat a session in a locked match; used by both create and join.
async fn join_match_locked(
    server: &Server,
    session: &Arc<Session>,
    mut m: MutexGuard<'_, Match>,
    passwd: &str,
) {
    if session.state.lock().await.match_id.is_some() {
        log::warn!("{} tried to join a match while in one", session);
        session.enqueue(&packets::match_join_fail()).await;
        return;
    }

    if m.passwd != passwd && m.host_id != session.id {
        log::warn!("{} supplied the wrong password for match {}", session, m.id);
        session.enqueue(&packets::match_join_fail()).await;
        return;
    }

    let slot_id = match m.first_free_slot() {
        Some(slot_id) => slot_id,
        None => {
            session.enqueue(&packets::match_join_fail()).await;
            return;
        }
    };

    let versus = matches!(m.team_type, TeamType::TeamVs | TeamType::TagTeamVs);
    let slot = &mut m.slots[slot_id];
    slot.player = Some(session.id);
    slot.status = SlotStatus::NOT_READY;
    if versus {
        slot.team = MatchTeam::Red;
    }

    {
        let mut state = session.state.lock().await;
        state.match_id = Some(m.id);
        state.in_lobby = false;
    }

    if let Some(chat) = server.channels.fetch(&m.chat_name()).await {
        chat::join_channel(server, session, &chat).await;
    }
    if let Some(lobby_chan) = server.channels.fetch("#lobby").await {
        chat::leave_channel(server, session, &lobby_chan, false).await;
    }

    session
        .enqueue(&packets::match_join_success(&m.to_data()))
        .await;
    send_state(server, &m, true).await;
}

/// PART_MATCH / logout path: vacate the slot, transfer or disband.
pub async fn leave_match(server: &Server, session: &Arc<Session>) {
    let match_id = {
        let mut state = session.state.lock().await;
        match state.match_id.take() {
            Some(id) => id,
            None => return,
        }
    };

    let entry = match server.matches.get(match_id).await {
        Some(entry) => entry,
        None => {
            log::error!("{} was in match {} which does not exist", session, match_id);
            return;
        }
    };

    let mut m = entry.lock().await;
    if let Some(slot) = m.slot_of(session.id) {
        slot.reset();
    }

    if let Some(chat) = server.channels.fetch(&m.chat_name()).await {
        chat::leave_channel(server, session, &chat, false).await;
    }

    if m.occupied_ids().is_empty() {
        // Last one out turns off the lights.
        let id = m.id;
        drop(m);
        server.matches.remove(id).await;
        server.channels.delete(&format!("#multi_{}", id)).await;

        if let Some(lobby_chan) = server.channels.fetch("#lobby").await {
            let packet = packets::dispose_match(id as i32);
            for member_id in lobby_chan.player_ids().await {
                if let Some(member) = server.sessions.get_by_id(member_id).await {
                    member.enqueue(&packet).await;
                }
            }
        }
        log::info!("match {} disbanded", id);
        return;
    }

    if m.host_id == session.id {
        // Host left; pass the crown to the lowest occupied slot.
        let new_host = m.slots.iter().find_map(|s| s.player);
        if let Some(new_host_id) = new_host {
            m.host_id = new_host_id;
            if let Some(host) = server.sessions.get_by_id(new_host_id).await {
                host.enqueue(&packets::match_transfer_host()).await;
            }
        }
    }

    send_state(server, &m, true).await;
}

/// MATCH_CHANGE_SLOT: move into an open slot.
pub async fn change_slot(server: &Server, session: &Arc<Session>, slot_id: i32) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    if !(0..16).contains(&slot_id) {
        return;
    }
    if m.slots[slot_id as usize].status != SlotStatus::OPEN {
        log::warn!("{} tried to move into non-open slot", session);
        return;
    }

    let Some(current) = m.slot_id_of(session.id) else {
        log::error!("{} is in match {} but occupies no slot", session, m.id);
        return;
    };

    let moved = m.slots[current].clone();
    m.slots[slot_id as usize].copy_from(&moved);
    m.slots[current].reset();

    send_state(server, &m, true).await;
}

/// MATCH_READY / MATCH_NOT_READY / MATCH_NO_BEATMAP / MATCH_HAS_BEATMAP.
pub async fn set_slot_status(server: &Server, session: &Arc<Session>, status: SlotStatus) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    match m.slot_of(session.id) {
        Some(slot) => slot.status = status,
        None => return,
    }
    send_state(server, &m, false).await;
}

/// MATCH_CHANGE_TEAM: blue and red swap on request.
pub async fn change_team(server: &Server, session: &Arc<Session>) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    match m.slot_of(session.id) {
        Some(slot) => {
            slot.team = match slot.team {
                MatchTeam::Blue => MatchTeam::Red,
                _ => MatchTeam::Blue,
            };
        }
        None => return,
    }
    send_state(server, &m, false).await;
}

/// MATCH_LOCK (host only): toggle a slot between locked and open; an
/// occupied slot is locked over its occupant's head.
pub async fn lock_slot(server: &Server, session: &Arc<Session>, slot_id: i32) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    if m.host_id != session.id {
        log::warn!("{} attempted to lock match as non-host", session);
        return;
    }
    if !(0..16).contains(&slot_id) {
        return;
    }

    let host_id = m.host_id;
    let slot = &mut m.slots[slot_id as usize];

    if slot.status == SlotStatus::LOCKED {
        slot.status = SlotStatus::OPEN;
    } else {
        if slot.player == Some(host_id) {
            // The host can't lock themselves out of their own room.
            return;
        }
        // An occupant stays in the slot; only the status flips, and
        // they learn from the next state broadcast.
        slot.status = SlotStatus::LOCKED;
    }

    send_state(server, &m, true).await;
}

/// MATCH_CHANGE_SETTINGS (host only): the client resends the whole
/// match; diff it against ours and apply the rules per field.
pub async fn change_settings(server: &Server, session: &Arc<Session>, new: MatchData) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    if m.host_id != session.id {
        log::warn!("{} attempted to change settings as non-host", session);
        return;
    }

    if new.freemods != m.freemods {
        m.freemods = new.freemods;

        if new.freemods {
            // Room mods migrate onto the occupants, except the
            // speed-changing subset which stays room-wide.
            let inherited = m.mods & !Mods::SPEED_CHANGING;
            for slot in m.slots.iter_mut() {
                if slot.has_player() {
                    slot.mods = inherited;
                }
            }
            m.mods &= Mods::SPEED_CHANGING;
        } else {
            // Merge the host's slot mods back into the room.
            let host_mods = m.host_slot().map(|s| s.mods).unwrap_or(Mods::empty());
            m.mods = (m.mods & Mods::SPEED_CHANGING) | host_mods;
            for slot in m.slots.iter_mut() {
                if slot.has_player() {
                    slot.mods = Mods::empty();
                }
            }
        }
    }

    if new.map_id == -1 {
        // Host is browsing the map selector.
        m.unready_players(SlotStatus::READY);
        m.prev_map_id = m.map_id;
        m.map_id = -1;
        m.map_md5.clear();
        m.map_name.clear();
    } else if m.map_id == -1 {
        if m.prev_map_id != new.map_id {
            let embed = format!("[https://osu.ppy.sh/b/{} {}]", new.map_id, new.map_name);
            chat::send_bot_to_channel_named(server, &m.chat_name(), &format!("Selected: {}.", embed))
                .await;
        }

        // Prefer our own metadata when we know the map.
        match server.backend.beatmaps.fetch_by_md5(&new.map_md5).await {
            Ok(Some(map)) => {
                m.map_id = map.id;
                m.map_md5 = map.md5;
                m.map_name = map.full_name;
                m.mode = map.mode;
            }
            _ => {
                m.map_id = new.map_id;
                m.map_md5 = new.map_md5.clone();
                m.map_name = new.map_name.clone();
                m.mode = new.mode;
            }
        }
    }

    if m.team_type != new.team_type {
        if m.is_scrimming {
            // Mid-scrim team changes go through the referee commands,
            // where the score reset is explicit.
            let team = match new.team_type {
                TeamType::HeadToHead => "head-to-head",
                TeamType::TagCoop => "tag-coop",
                TeamType::TeamVs => "team-vs",
                TeamType::TagTeamVs => "tag-team-vs",
            };
            let msg = format!(
                "Changing team type while scrimming will reset the overall score - \
                 to do so, please use the !mp teams {} command.",
                team,
            );
            chat::send_bot_to_channel_named(server, &m.chat_name(), &msg).await;
        } else {
            let new_team = if new.team_type.is_ffa() {
                MatchTeam::Neutral
            } else {
                MatchTeam::Red
            };
            for slot in m.slots.iter_mut() {
                if slot.has_player() {
                    slot.team = new_team;
                }
            }
            m.team_type = new.team_type;
        }
    }

    if m.win_condition != new.win_condition {
        if m.use_pp_scoring {
            m.use_pp_scoring = false;
        }
        m.win_condition = new.win_condition;
    }

    m.name = new.name.clone();

    send_state(server, &m, true).await;
}

/// MATCH_CHANGE_MODS: under freemods everyone picks their own, the
/// host additionally steers the speed-changing subset.
pub async fn change_mods(server: &Server, session: &Arc<Session>, mods: u32) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    let mods = Mods::from_bits_truncate(mods);
    if m.freemods {
        if m.host_id == session.id {
            m.mods = mods & Mods::SPEED_CHANGING;
        }
        match m.slot_of(session.id) {
            Some(slot) => slot.mods = mods & !Mods::SPEED_CHANGING,
            None => return,
        }
    } else {
        if m.host_id != session.id {
            log::warn!("{} attempted to change mods as non-host", session);
            return;
        }
        m.mods = mods;
    }

    send_state(server, &m, true).await;
}

/// MATCH_TRANSFER_HOST (host only).
pub async fn transfer_host(server: &Server, session: &Arc<Session>, slot_id: i32) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    if m.host_id != session.id {
        log::warn!("{} attempted to transfer host as non-host", session);
        return;
    }
    if !(0..16).contains(&slot_id) {
        return;
    }

    let Some(target_id) = m.slots[slot_id as usize].player else {
        log::warn!("{} tried to transfer host to an empty slot", session);
        return;
    };

    m.host_id = target_id;
    if let Some(target) = server.sessions.get_by_id(target_id).await {
        target.enqueue(&packets::match_transfer_host()).await;
    }
    send_state(server, &m, true).await;
}

/// MATCH_START (host only): ready slots go live behind the load barrier.
pub async fn start(server: &Server, session: &Arc<Session>) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    if m.host_id != session.id {
        log::warn!("{} attempted to start match as non-host", session);
        return;
    }

    if !m.slots.iter().any(|s| s.status == SlotStatus::READY) {
        log::warn!("{} tried to start a match with no ready players", session);
        return;
    }

    let mut sitting_out = Vec::new();
    for slot in m.slots.iter_mut() {
        match slot.player {
            Some(_) if slot.status == SlotStatus::READY => {
                slot.status = SlotStatus::PLAYING;
                slot.loaded = false;
                slot.skipped = false;
            }
            Some(id) => sitting_out.push(id),
            None => {}
        }
    }

    m.in_progress = true;
    let data = packets::match_start(&m.to_data());
    send_data(server, &m, &data, false, &sitting_out).await;
    send_state(server, &m, true).await;
}

/// MATCH_LOAD_COMPLETE: once every playing slot has loaded, release.
pub async fn load_complete(server: &Server, session: &Arc<Session>) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    match m.slot_of(session.id) {
        Some(slot) => slot.loaded = true,
        None => return,
    }

    let all_loaded = m
        .slots
        .iter()
        .all(|s| s.status != SlotStatus::PLAYING || s.loaded);
    if all_loaded {
        send_data(server, &m, &packets::match_all_players_loaded(), false, &[]).await;
    }
}

/// MATCH_SKIP_REQUEST: relay the skip, release once everyone has.
pub async fn skip_request(server: &Server, session: &Arc<Session>) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    match m.slot_of(session.id) {
        Some(slot) => slot.skipped = true,
        None => return,
    }

    send_data(
        server,
        &m,
        &packets::match_player_skipped(session.id),
        true,
        &[],
    )
    .await;

    let all_skipped = m
        .slots
        .iter()
        .all(|s| s.status != SlotStatus::PLAYING || s.skipped);
    if all_skipped {
        send_data(server, &m, &packets::match_skip(), false, &[]).await;
    }
}

/// MATCH_FAILED: tell the others which slot dropped the combo for good.
pub async fn player_failed(server: &Server, session: &Arc<Session>) {
    let Some(entry) = match_of(server, session).await else { return };
    let m = entry.lock().await;

    let Some(slot_id) = m.slot_id_of(session.id) else { return };
    send_data(
        server,
        &m,
        &packets::match_player_failed(slot_id as i32),
        false,
        &[],
    )
    .await;
}

/// MATCH_SCORE_UPDATE: re-frame with our slot id patched in and fan
/// out to the room.
pub async fn score_update(server: &Server, session: &Arc<Session>, frame: &[u8]) {
    let Some(entry) = match_of(server, session).await else { return };
    let m = entry.lock().await;

    let Some(slot_id) = m.slot_id_of(session.id) else { return };

    let mut buf = bancho::Writer::new()
        .raw(frame)
        .finish(bancho::ServerPacketId::MatchScoreUpdate);
    if buf.len() > 11 {
        // The client's frame carries its own slot view; ours is
        // authoritative.
        buf[11] = slot_id as u8;
    }

    send_data(server, &m, &buf, false, &[]).await;
}

/// MATCH_COMPLETE: the last finisher lowers the barrier and, in a
/// scrimmage, kicks off point computation.
pub async fn complete(server: &Server, session: &Arc<Session>) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    match m.slot_of(session.id) {
        Some(slot) => slot.status = SlotStatus::COMPLETE,
        None => return,
    }

    if m.slots.iter().any(|s| s.status == SlotStatus::PLAYING) {
        return;
    }

    // Bystanders only need fresh room state, not the completion event.
    let not_playing: Vec<i32> = m
        .slots
        .iter()
        .filter(|s| s.has_player() && s.status != SlotStatus::COMPLETE)
        .filter_map(|s| s.player)
        .collect();

    let was_playing: Vec<i32> = m
        .slots
        .iter()
        .filter_map(|s| s.player)
        .filter(|id| !not_playing.contains(id))
        .collect();

    m.in_progress = false;
    m.unready_players(SlotStatus::COMPLETE);

    send_data(server, &m, &packets::match_complete(), false, &not_playing).await;
    send_state(server, &m, true).await;

    if m.is_scrimming {
        let server = server.clone();
        let entry = entry.clone();
        drop(m);
        tokio::spawn(async move {
            update_matchpoints(&server, entry, was_playing, SUBMISSION_TIMEOUT_SECS).await;
        });
    }
}

/// MATCH_INVITE: the bot is flattered but busy.
pub async fn invite(server: &Server, session: &Arc<Session>, user_id: i32) {
    let Some(match_id) = session.state.lock().await.match_id else {
        return;
    };

    let Some(target) = server.sessions.get_by_id(user_id).await else {
        log::warn!("{} tried to invite an offline user ({})", session, user_id);
        return;
    };

    if target.is_bot {
        chat::send_bot_private(server, session, "I'm too busy!").await;
        return;
    }

    let match_url = format!("osump://{}/", match_id);
    target
        .enqueue(&packets::match_invite(
            &session.name,
            session.id,
            &target.name,
            &match_url,
        ))
        .await;
    log::info!("{} invited {} to their match", session, target);
}

/// MATCH_CHANGE_PASSWORD (host only).
pub async fn change_password(server: &Server, session: &Arc<Session>, new: MatchData) {
    let Some(entry) = match_of(server, session).await else { return };
    let mut m = entry.lock().await;

    if m.host_id != session.id {
        log::warn!("{} attempted to change pw as non-host", session);
        return;
    }

    m.passwd = new.passwd;
    send_state(server, &m, true).await;
}

/// The match this session sits in, if any.
async fn match_of(
    server: &Server,
    session: &Session,
) -> Option<Arc<tokio::sync::Mutex<Match>>> {
    let match_id = session.state.lock().await.match_id?;
    let entry = server.matches.get(match_id).await;
    if entry.is_none() {
        log::error!("{} references match {} which does not exist", session, match_id);
    }
    entry
}
