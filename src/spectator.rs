//! Spectator attachment and replay-frame fan-out.
//!
//! Invariant kept throughout: `guest ∈ host.spectators` iff
//! `guest.spectating == host`.

use std::sync::Arc;

use bancho::packets;

use crate::backend::Privileges;
use crate::chat;
use crate::server::Server;
use crate::session::Session;

/// Attach `guest` to `host`, creating `#spec_<host>` on first use.
pub async fn add_spectator(server: &Server, host: &Arc<Session>, guest: &Arc<Session>) {
    let chan_name = format!("#spec_{}", host.id);

    let channel = match server.channels.fetch(&chan_name).await {
        Some(channel) => channel,
        None => {
            let created = server
                .channels
                .create(
                    &chan_name,
                    &format!("{}'s spectator channel.", host.name),
                    Privileges::UNRESTRICTED,
                    Privileges::UNRESTRICTED,
                    false,
                    true,
                )
                .await;
            match created {
                Ok(channel) => {
                    chat::join_channel(server, host, &channel).await;
                    channel
                }
                Err(err) => {
                    log::error!("failed to create {}: {}", chan_name, err);
                    return;
                }
            }
        }
    };

    if !chat::join_channel(server, guest, &channel).await {
        log::warn!("{} failed to join {}", guest, chan_name);
        return;
    }

    let stealth = guest.state.lock().await.stealth;
    let fellow_ids = {
        let mut host_state = host.state.lock().await;
        if !host_state.spectators.contains(&guest.id) {
            host_state.spectators.push(guest.id);
        }
        host_state.spectators.clone()
    };
    guest.state.lock().await.spectating = Some(host.id);

    if !stealth {
        let joined = packets::fellow_spectator_joined(guest.id);
        for id in fellow_ids {
            if id == guest.id {
                continue;
            }
            if let Some(fellow) = server.sessions.get_by_id(id).await {
                fellow.enqueue(&joined).await;
                guest
                    .enqueue(&packets::fellow_spectator_joined(fellow.id))
                    .await;
            }
        }
        host.enqueue(&packets::spectator_joined(guest.id)).await;
    }

    log::info!("{} is now spectating {}", guest, host);
}

/// Detach `guest` from `host`; the channel dies with its last member.
pub async fn remove_spectator(server: &Server, host: &Arc<Session>, guest: &Arc<Session>) {
    let remaining = {
        let mut host_state = host.state.lock().await;
        host_state.spectators.retain(|id| *id != guest.id);
        host_state.spectators.clone()
    };
    guest.state.lock().await.spectating = None;

    let chan_name = format!("#spec_{}", host.id);
    match server.channels.fetch(&chan_name).await {
        Some(channel) => {
            chat::leave_channel(server, guest, &channel, false).await;
            if remaining.is_empty() {
                // The host parts last, which tears the channel down.
                chat::leave_channel(server, host, &channel, false).await;
            }
        }
        None => log::warn!("{} is missing for {}", chan_name, host),
    }

    let stealth = guest.state.lock().await.stealth;
    if !stealth {
        host.enqueue(&packets::spectator_left(guest.id)).await;
        let left = packets::fellow_spectator_left(guest.id);
        for id in remaining {
            if let Some(fellow) = server.sessions.get_by_id(id).await {
                fellow.enqueue(&left).await;
            }
        }
    }

    log::info!("{} stopped spectating {}", guest, host);
}

/// Fan a replay-frame bundle out to everyone watching `host`.
pub async fn broadcast_frames(server: &Server, host: &Session, raw: &[u8]) {
    let spectator_ids = host.state.lock().await.spectators.clone();
    if spectator_ids.is_empty() {
        return;
    }

    let data = packets::spectate_frames(raw);
    for id in spectator_ids {
        if let Some(spectator) = server.sessions.get_by_id(id).await {
            spectator.enqueue(&data).await;
        }
    }
}

/// CANT_SPECTATE: tell the host and the other watchers that this
/// spectator lacks the map.
pub async fn cant_spectate(server: &Server, session: &Arc<Session>) {
    let (host_id, stealth) = {
        let state = session.state.lock().await;
        (state.spectating, state.stealth)
    };

    let Some(host_id) = host_id else {
        log::warn!("{} sent can't spectate while not spectating", session);
        return;
    };
    if stealth {
        return;
    }

    let Some(host) = server.sessions.get_by_id(host_id).await else {
        return;
    };

    let data = packets::spectator_cant_spectate(session.id);
    host.enqueue(&data).await;
    let spectator_ids = host.state.lock().await.spectators.clone();
    for id in spectator_ids {
        if let Some(fellow) = server.sessions.get_by_id(id).await {
            fellow.enqueue(&data).await;
        }
    }
}
