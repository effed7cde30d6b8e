//! Per-packet handlers and the dispatch tables.
//!
//! The "all" table is the match below; the restricted table is the
//! same match behind [`allowed_while_restricted`].

use std::sync::Arc;

use anyhow::Result;
use bancho::{packets, Action, ClientPacket, Mods, PresenceFilter, SlotStatus};
use chrono::Utc;

use crate::channel::resolve_contextual;
use crate::chat;
use crate::login;
use crate::multiplayer::actions as multiplayer;
use crate::multiplayer::MAX_MATCHES;
use crate::presence;
use crate::server::Server;
use crate::session::Session;
use crate::spectator;

/// The subset of packets a restricted session may still use.
pub fn allowed_while_restricted(packet: &ClientPacket<'_>) -> bool {
    matches!(
        packet,
        ClientPacket::Ping
            | ClientPacket::ChangeAction { .. }
            | ClientPacket::Logout
            | ClientPacket::RequestStatusUpdate
            | ClientPacket::ChannelJoin { .. }
            | ClientPacket::ChannelPart { .. }
            | ClientPacket::ReceiveUpdates { .. }
            | ClientPacket::UserStatsRequest { .. }
    )
}

/// Fire-and-forget "this user did something" bookkeeping.
fn touch_activity(server: &Server, user_id: i32) {
    let users = server.backend.users.clone();
    tokio::spawn(async move {
        let _ = users.update_latest_activity(user_id).await;
    });
}

/// Route one decoded packet to its handler.
pub async fn dispatch(
    server: &Server,
    session: &Arc<Session>,
    packet: ClientPacket<'_>,
) -> Result<()> {
    use ClientPacket::*;

    match packet {
        Ping => {}

        ChangeAction {
            action,
            info_text,
            map_md5,
            mut mods,
            mut mode,
            map_id,
        } => {
            // Relax/autopilot are server-side mode offsets, with the
            // combinations the client can't actually play stripped.
            let mods_bits = Mods::from_bits_truncate(mods);
            if mods_bits.contains(Mods::RELAX) {
                if mode == 3 {
                    mods &= !Mods::RELAX.bits();
                } else {
                    mode += 4;
                }
            } else if mods_bits.contains(Mods::AUTOPILOT) {
                if (1..=3).contains(&mode) {
                    mods &= !Mods::AUTOPILOT.bits();
                } else {
                    mode += 8;
                }
            }

            {
                let mut state = session.state.lock().await;
                state.status.action = Action::from_u8(action).unwrap_or(Action::Unknown);
                state.status.info_text = info_text;
                state.status.map_md5 = map_md5;
                state.status.mods = Mods::from_bits_truncate(mods);
                state.status.mode = mode;
                state.status.map_id = map_id;
            }

            presence::broadcast_stats(server, session).await;
        }

        SendPublicMessage(msg) => handle_public_message(server, session, msg).await?,
        SendPrivateMessage(msg) => handle_private_message(server, session, msg).await?,

        Logout => {
            // The client tends to fire a logout right after logging
            // in; ignore anything within the first second.
            if (Utc::now() - session.login_time).num_seconds() < 1 {
                return Ok(());
            }
            login::logout(server, session).await;
            touch_activity(server, session.id);
        }

        RequestStatusUpdate => {
            let stats = presence::stats_packet(session).await;
            session.enqueue(&stats).await;
        }

        StartSpectating { target_id } => {
            let Some(new_host) = server.sessions.get_by_id(target_id).await else {
                log::warn!("{} tried to spectate nonexistent id {}", session, target_id);
                return Ok(());
            };

            let current_host_id = session.state.lock().await.spectating;
            if let Some(current_id) = current_host_id {
                if current_id == new_host.id {
                    // Same host; they just downloaded the map. Replay
                    // the join notifications only.
                    if !session.state.lock().await.stealth {
                        new_host
                            .enqueue(&packets::spectator_joined(session.id))
                            .await;
                        let joined = packets::fellow_spectator_joined(session.id);
                        let fellows = new_host.state.lock().await.spectators.clone();
                        for id in fellows {
                            if id == session.id {
                                continue;
                            }
                            if let Some(fellow) = server.sessions.get_by_id(id).await {
                                fellow.enqueue(&joined).await;
                            }
                        }
                    }
                    return Ok(());
                }

                if let Some(current) = server.sessions.get_by_id(current_id).await {
                    spectator::remove_spectator(server, &current, session).await;
                }
            }

            spectator::add_spectator(server, &new_host, session).await;
        }

        StopSpectating => {
            let host_id = session.state.lock().await.spectating;
            match host_id {
                Some(host_id) => {
                    if let Some(host) = server.sessions.get_by_id(host_id).await {
                        spectator::remove_spectator(server, &host, session).await;
                    }
                }
                None => log::warn!("{} stopped spectating while not spectating", session),
            }
        }

        SpectateFrames { raw } => spectator::broadcast_frames(server, session, raw).await,
        CantSpectate => spectator::cant_spectate(server, session).await,

        PartLobby => session.state.lock().await.in_lobby = false,

        JoinLobby => {
            session.state.lock().await.in_lobby = true;
            for entry in server.matches.all().await {
                let m = entry.lock().await;
                session.enqueue(&packets::new_match(&m.to_data())).await;
            }
        }

        CreateMatch(data) => {
            multiplayer::create_match(server, session, data).await;
            touch_activity(server, session.id);
        }

        JoinMatch { match_id, passwd } => {
            if match_id >= MAX_MATCHES as i32 {
                // Not a match id at all: an in-chat menu option
                // smuggled through the lobby packet.
                handle_menu_option(server, session, match_id).await;
                session.enqueue(&packets::match_join_fail()).await;
                return Ok(());
            }
            if match_id < 0 {
                session.enqueue(&packets::match_join_fail()).await;
                return Ok(());
            }
            touch_activity(server, session.id);
            multiplayer::join_match(server, session, match_id, &passwd).await;
        }

        PartMatch => {
            multiplayer::leave_match(server, session).await;
            touch_activity(server, session.id);
        }

        MatchChangeSlot { slot_id } => multiplayer::change_slot(server, session, slot_id).await,
        MatchReady => multiplayer::set_slot_status(server, session, SlotStatus::READY).await,
        MatchNotReady => {
            multiplayer::set_slot_status(server, session, SlotStatus::NOT_READY).await
        }
        MatchNoBeatmap => {
            multiplayer::set_slot_status(server, session, SlotStatus::NO_MAP).await
        }
        MatchHasBeatmap => {
            multiplayer::set_slot_status(server, session, SlotStatus::NOT_READY).await
        }
        MatchLock { slot_id } => multiplayer::lock_slot(server, session, slot_id).await,
        MatchChangeSettings(data) => multiplayer::change_settings(server, session, data).await,
        MatchStart => multiplayer::start(server, session).await,
        MatchScoreUpdate { frame } => multiplayer::score_update(server, session, frame).await,
        MatchComplete => multiplayer::complete(server, session).await,
        MatchChangeMods { mods } => multiplayer::change_mods(server, session, mods).await,
        MatchLoadComplete => multiplayer::load_complete(server, session).await,
        MatchFailed => multiplayer::player_failed(server, session).await,
        MatchSkipRequest => multiplayer::skip_request(server, session).await,
        MatchChangeTeam => multiplayer::change_team(server, session).await,
        MatchTransferHost { slot_id } => {
            multiplayer::transfer_host(server, session, slot_id).await
        }
        MatchInvite { user_id } => {
            multiplayer::invite(server, session, user_id).await;
            touch_activity(server, session.id);
        }
        MatchChangePassword(data) => multiplayer::change_password(server, session, data).await,

        ChannelJoin { name } => {
            if chat::IGNORED_CHANNELS.contains(&name.as_str()) {
                return Ok(());
            }
            match resolve_contextual(&server.channels, session, &name).await {
                Some(channel) => {
                    if !chat::join_channel(server, session, &channel).await {
                        log::warn!("{} failed to join {}", session, name);
                    }
                }
                None => log::warn!("{} tried to join non-existent {}", session, name),
            }
        }

        ChannelPart { name } => {
            if chat::IGNORED_CHANNELS.contains(&name.as_str()) {
                return Ok(());
            }
            match resolve_contextual(&server.channels, session, &name).await {
                Some(channel) => chat::leave_channel(server, session, &channel, false).await,
                None => log::warn!("{} tried to leave non-existent {}", session, name),
            }
        }

        ReceiveUpdates { filter } => match PresenceFilter::from_i32(filter) {
            Some(filter) => session.state.lock().await.presence_filter = filter,
            None => log::warn!("{} sent an invalid presence filter {}", session, filter),
        },

        SetAwayMessage { text } => {
            session.state.lock().await.away_msg =
                if text.is_empty() { None } else { Some(text) };
        }

        UserStatsRequest { user_ids } => {
            for user_id in user_ids {
                if user_id == session.id {
                    continue;
                }
                if let Some(target) = server.sessions.get_by_id(user_id).await {
                    if target.restricted() {
                        continue;
                    }
                    let stats = presence::stats_packet(&target).await;
                    session.enqueue(&stats).await;
                }
            }
        }

        UserPresenceRequest { user_ids } => {
            for user_id in user_ids {
                if let Some(target) = server.sessions.get_by_id(user_id).await {
                    let p = presence::presence_packet(&target).await;
                    session.enqueue(&p).await;
                }
            }
        }

        UserPresenceRequestAll => {
            // Only sent when >256 players are visible.
            for other in server.sessions.unrestricted().await {
                let p = presence::presence_packet(&other).await;
                session.enqueue(&p).await;
            }
        }

        FriendAdd { user_id } => {
            let Some(target) = server.sessions.get_by_id(user_id).await else {
                log::warn!("{} tried to friend an offline user ({})", session, user_id);
                return Ok(());
            };
            if target.is_bot {
                return Ok(());
            }

            {
                let mut state = session.state.lock().await;
                state.blocks.retain(|id| *id != target.id);
                if !state.friends.contains(&target.id) {
                    state.friends.push(target.id);
                }
            }
            server.backend.users.add_friend(session.id, target.id).await?;
            touch_activity(server, session.id);
        }

        FriendRemove { user_id } => {
            let Some(target) = server.sessions.get_by_id(user_id).await else {
                log::warn!("{} tried to unfriend an offline user ({})", session, user_id);
                return Ok(());
            };
            if target.is_bot {
                return Ok(());
            }

            session
                .state
                .lock()
                .await
                .friends
                .retain(|id| *id != target.id);
            server
                .backend
                .users
                .remove_friend(session.id, target.id)
                .await?;
            touch_activity(server, session.id);
        }

        ToggleBlockNonFriendDms { value } => {
            session.state.lock().await.pm_private = value == 1;
            touch_activity(server, session.id);
        }

        TournamentMatchInfoRequest { match_id } => {
            if !(0..MAX_MATCHES as i32).contains(&match_id) {
                return Ok(());
            }
            if !session
                .privileges()
                .intersects(crate::backend::Privileges::DONATOR)
            {
                return Ok(());
            }
            if let Some(entry) = server.matches.get(match_id as u16).await {
                let m = entry.lock().await;
                session
                    .enqueue(&packets::update_match(&m.to_data(), false))
                    .await;
            }
        }

        TournamentJoinMatchChannel { match_id } => {
            if !(0..MAX_MATCHES as i32).contains(&match_id) {
                return Ok(());
            }
            if !session
                .privileges()
                .intersects(crate::backend::Privileges::DONATOR)
            {
                return Ok(());
            }
            let Some(entry) = server.matches.get(match_id as u16).await else {
                return Ok(());
            };

            let chat_name = {
                let m = entry.lock().await;
                if m.slot_id_of(session.id).is_some() {
                    // Playing in the match; no observer seat for them.
                    return Ok(());
                }
                m.chat_name()
            };
            if let Some(channel) = server.channels.fetch(&chat_name).await {
                if chat::join_channel(server, session, &channel).await {
                    entry.lock().await.tourney_clients.insert(session.id);
                }
            }
        }

        TournamentLeaveMatchChannel { match_id } => {
            if !(0..MAX_MATCHES as i32).contains(&match_id) {
                return Ok(());
            }
            if !session
                .privileges()
                .intersects(crate::backend::Privileges::DONATOR)
            {
                return Ok(());
            }
            let Some(entry) = server.matches.get(match_id as u16).await else {
                return Ok(());
            };

            let chat_name = {
                let mut m = entry.lock().await;
                m.tourney_clients.remove(&session.id);
                m.chat_name()
            };
            if let Some(channel) = server.channels.fetch(&chat_name).await {
                chat::leave_channel(server, session, &channel, false).await;
            }
        }
    }

    Ok(())
}

/// A JOIN_MATCH id of 64+ is a menu option from an in-chat menu.
async fn handle_menu_option(server: &Server, session: &Arc<Session>, option_id: i32) {
    let menu = session.state.lock().await.current_menu;
    match server
        .backend
        .menus
        .execute_option(session.id, menu, option_id)
        .await
    {
        Ok(Some(resp)) => chat::send_bot_private(server, session, &resp).await,
        Ok(None) => {}
        Err(err) => log::warn!("menu option {} failed for {}: {}", option_id, session, err),
    }
}

async fn handle_public_message(
    server: &Server,
    session: &Arc<Session>,
    msg: bancho::Message,
) -> Result<()> {
    if session.state.lock().await.silenced() {
        log::warn!("{} sent a message while silenced", session);
        return Ok(());
    }

    let text = msg.text.trim();
    if text.is_empty() {
        return Ok(());
    }

    if chat::IGNORED_CHANNELS.contains(&msg.recipient.as_str()) {
        return Ok(());
    }

    let Some(channel) = resolve_contextual(&server.channels, session, &msg.recipient).await
    else {
        log::warn!("{} wrote to non-existent {}", session, msg.recipient);
        return Ok(());
    };

    if !channel.contains(session.id).await {
        log::warn!("{} wrote to {} without being in it", session, channel);
        return Ok(());
    }

    if !channel.can_write(session.privileges()) {
        log::warn!("{} wrote to {} with insufficient privileges", session, channel);
        return Ok(());
    }

    let text = chat::truncate_message(session, text).await;

    let command_response = if text.starts_with(&server.config.command_prefix) {
        server
            .backend
            .commands
            .process_commands(session.id, &channel.name, &text)
            .await?
    } else {
        None
    };

    if let Some(response) = command_response {
        if !response.hidden {
            chat::send_to_channel(server, session, &channel, &text).await;
            if let Some(resp) = response.resp {
                chat::send_bot_to_channel(server, &channel, &resp).await;
            }
        } else {
            // The trigger goes to staff only; the response to staff
            // and the sender.
            let staff: Vec<_> = server
                .sessions
                .staff()
                .await
                .into_iter()
                .filter(|s| s.id != session.id)
                .collect();
            chat::send_selective(&session.name, session.id, &channel, &text, &staff).await;

            if let Some(resp) = response.resp {
                let mut recipients = staff;
                recipients.push(session.clone());
                chat::send_selective(
                    &server.config.bot_name,
                    server.config.bot_id,
                    &channel,
                    &resp,
                    &recipients,
                )
                .await;
            }
        }
    } else {
        // Keep the sender's /np context fresh even in public chat.
        chat::parse_now_playing(server, session, &text).await;
        chat::send_to_channel(server, session, &channel, &text).await;
    }

    touch_activity(server, session.id);
    log::info!("{} @ {}: {}", session, channel, text);
    Ok(())
}

async fn handle_private_message(
    server: &Server,
    session: &Arc<Session>,
    msg: bancho::Message,
) -> Result<()> {
    if session.state.lock().await.silenced() {
        log::warn!("{} tried to send a dm while silenced", session);
        return Ok(());
    }

    let text = msg.text.trim();
    if text.is_empty() {
        return Ok(());
    }

    let target_name = &msg.recipient;

    // Online first; otherwise the user store, since offline players
    // can still receive mail.
    let online = server.sessions.get_by_name(target_name).await;

    let (target_id, target_blocks, target_pm_private, target_friends, target_silenced) =
        match &online {
            Some(target) => {
                let state = target.state.lock().await;
                (
                    target.id,
                    state.blocks.clone(),
                    state.pm_private,
                    state.friends.clone(),
                    state.silenced(),
                )
            }
            None => {
                let Some(user) = server
                    .backend
                    .users
                    .fetch_by_name(&crate::session::make_safe(target_name))
                    .await?
                else {
                    log::warn!("{} wrote to non-existent user {}", session, target_name);
                    return Ok(());
                };
                (
                    user.id,
                    user.blocks.clone(),
                    false,
                    user.friends.clone(),
                    user.silence_end > Utc::now().timestamp(),
                )
            }
        };

    if target_blocks.contains(&session.id) {
        session
            .enqueue(&packets::user_dm_blocked(target_name))
            .await;
        log::info!("{} messaged {} who has them blocked", session, target_name);
        return Ok(());
    }

    if target_pm_private && !target_friends.contains(&session.id) {
        session
            .enqueue(&packets::user_dm_blocked(target_name))
            .await;
        log::info!("{} messaged {} who is blocking dms", session, target_name);
        return Ok(());
    }

    if target_silenced {
        session
            .enqueue(&packets::target_silenced(target_name))
            .await;
        log::info!("{} messaged {} who is silenced", session, target_name);
        return Ok(());
    }

    let text = chat::truncate_message(session, text).await;

    if let Some(target) = &online {
        // Auto-reply for away targets.
        let away = {
            let state = target.state.lock().await;
            if state.status.action == Action::Afk {
                state.away_msg.clone()
            } else {
                None
            }
        };
        if let Some(away_msg) = away {
            chat::send_private(target, session, &away_msg).await;
        }

        if target.is_bot {
            chat::handle_bot_message(server, session, &text).await;
            touch_activity(server, session.id);
            return Ok(());
        }

        chat::send_private(session, target, &text).await;
    } else {
        session
            .enqueue(&packets::notification(&format!(
                "{} is currently offline, but will receive your message on their next login.",
                target_name,
            )))
            .await;
    }

    server.backend.mail.send(session.id, target_id, &text).await?;

    touch_activity(server, session.id);
    log::info!("{} @ {}: {}", session, target_name, text);
    Ok(())
}
