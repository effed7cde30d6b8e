//! Presence, stats and channel-info fan-out.
//!
//! Everything here appends bytes to recipients' queues; nothing
//! suspends while holding a state lock of the session it reports on.

use std::sync::Arc;

use bancho::packets;

use crate::server::Server;
use crate::session::Session;

/// A `user_presence` frame for this session, using the compact bot
/// encoding where applicable.
pub async fn presence_packet(session: &Session) -> Vec<u8> {
    if session.is_bot {
        return packets::bot_presence(session.id, &session.name);
    }

    let state = session.state.lock().await;
    packets::user_presence(&packets::UserPresence {
        user_id: session.id,
        name: &session.name,
        utc_offset: state.utc_offset,
        country_code: state.geoloc.country_code,
        privileges: session.privileges().to_client(),
        mode: state.status.mode_vanilla(),
        longitude: state.geoloc.longitude,
        latitude: state.geoloc.latitude,
        global_rank: state
            .stats
            .get(state.status.mode as usize)
            .map(|s| s.global_rank)
            .unwrap_or(0),
    })
}

/// A `user_stats` frame for this session.
pub async fn stats_packet(session: &Session) -> Vec<u8> {
    if session.is_bot {
        return packets::bot_stats(session.id);
    }

    let state = session.state.lock().await;
    let stats = state
        .stats
        .get(state.status.mode as usize)
        .copied()
        .unwrap_or_default();
    packets::user_stats(&packets::UserStats {
        user_id: session.id,
        action: state.status.action,
        info_text: &state.status.info_text,
        map_md5: &state.status.map_md5,
        mods: state.status.mods,
        mode: state.status.mode_vanilla(),
        map_id: state.status.map_id,
        ranked_score: stats.ranked_score,
        accuracy: stats.accuracy,
        plays: stats.plays,
        total_score: stats.total_score,
        global_rank: stats.global_rank,
        pp: stats.pp,
    })
}

/// Broadcast this session's stats to everyone online.
///
/// Restricted sessions are invisible; their updates go nowhere.
pub async fn broadcast_stats(server: &Server, session: &Arc<Session>) {
    if session.restricted() {
        return;
    }
    let packet = stats_packet(session).await;
    server.sessions.enqueue_all(&packet).await;
}

/// Broadcast this session's presence and stats pair to everyone online.
pub async fn broadcast_presence(server: &Server, session: &Arc<Session>) {
    if session.restricted() {
        return;
    }
    let mut data = presence_packet(session).await;
    data.extend(stats_packet(session).await);
    server.sessions.enqueue_all(&data).await;
}

/// Current channel info frame (name, topic, member count).
pub async fn channel_info_packet(channel: &crate::channel::Channel) -> Vec<u8> {
    packets::channel_info(&channel.name, &channel.topic, channel.num_players().await as i16)
}

/// Send a channel's updated member count to everyone allowed to see it.
pub async fn broadcast_channel_info(server: &Server, channel: &crate::channel::Channel) {
    let packet = channel_info_packet(channel).await;
    for other in server.sessions.all().await {
        if channel.can_read(other.privileges()) {
            other.enqueue(&packet).await;
        }
    }
}
