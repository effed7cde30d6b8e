//! Chat plumbing: channel membership, message fan-out, now-playing
//! parsing, and the bot's private-message brain.

use std::sync::Arc;

use bancho::{packets, Message, Mods};
use chrono::Utc;

use crate::backend::Beatmap;
use crate::channel::Channel;
use crate::config::{LAST_NP_LIFETIME_SECS, MAX_MESSAGE_LEN};
use crate::presence;
use crate::server::Server;
use crate::session::{LastNp, Session};

/// Client-side log channels we never mirror.
pub const IGNORED_CHANNELS: [&str; 2] = ["#highlight", "#userlog"];

/// Join a session into a channel, announcing the new member count.
pub async fn join_channel(server: &Server, session: &Arc<Session>, channel: &Arc<Channel>) -> bool {
    if !channel.can_read(session.privileges()) {
        log::warn!("{} lacks read privileges for {}", session, channel);
        return false;
    }

    if channel.contains(session.id).await {
        return false;
    }

    channel.add_player(session.id).await;
    session
        .enqueue(&packets::channel_join_success(&channel.name))
        .await;
    presence::broadcast_channel_info(server, channel).await;
    true
}

/// Remove a session from a channel. Instanced channels die with their
/// last member.
pub async fn leave_channel(
    server: &Server,
    session: &Arc<Session>,
    channel: &Arc<Channel>,
    kick: bool,
) {
    if !channel.contains(session.id).await {
        return;
    }

    channel.remove_player(session.id).await;
    if kick {
        session.enqueue(&packets::channel_kick(&channel.name)).await;
    }

    if channel.instance && channel.num_players().await == 0 {
        server.channels.delete(&channel.name).await;
    } else {
        presence::broadcast_channel_info(server, channel).await;
    }
}

/// Deliver a message to every member of a channel except the sender.
pub async fn send_to_channel(server: &Server, sender: &Arc<Session>, channel: &Channel, text: &str) {
    let packet = packets::send_message(&Message {
        sender: sender.name.clone(),
        text: text.to_string(),
        recipient: channel.name.clone(),
        sender_id: sender.id,
    });

    for id in channel.player_ids().await {
        if id == sender.id {
            continue;
        }
        if let Some(member) = server.sessions.get_by_id(id).await {
            member.enqueue(&packet).await;
        }
    }
}

/// Deliver a message to an explicit set of recipients only.
pub async fn send_selective(
    sender_name: &str,
    sender_id: i32,
    channel: &Channel,
    text: &str,
    recipients: &[Arc<Session>],
) {
    let packet = packets::send_message(&Message {
        sender: sender_name.to_string(),
        text: text.to_string(),
        recipient: channel.name.clone(),
        sender_id,
    });
    for recipient in recipients {
        recipient.enqueue(&packet).await;
    }
}

/// The bot speaking into a channel; every member hears it.
pub async fn send_bot_to_channel(server: &Server, channel: &Channel, text: &str) {
    let packet = packets::send_message(&Message {
        sender: server.config.bot_name.clone(),
        text: text.to_string(),
        recipient: channel.name.clone(),
        sender_id: server.config.bot_id,
    });
    for id in channel.player_ids().await {
        if let Some(member) = server.sessions.get_by_id(id).await {
            member.enqueue(&packet).await;
        }
    }
}

/// Same, addressed by channel name.
pub async fn send_bot_to_channel_named(server: &Server, channel_name: &str, text: &str) {
    match server.channels.fetch(channel_name).await {
        Some(channel) => send_bot_to_channel(server, &channel, text).await,
        None => log::warn!("bot tried to write to non-existent {}", channel_name),
    }
}

/// A private message from one session to another.
pub async fn send_private(sender: &Session, recipient: &Session, text: &str) {
    recipient
        .enqueue(&packets::send_message(&Message {
            sender: sender.name.clone(),
            text: text.to_string(),
            recipient: recipient.name.clone(),
            sender_id: sender.id,
        }))
        .await;
}

/// A private message from the bot.
pub async fn send_bot_private(server: &Server, recipient: &Session, text: &str) {
    recipient
        .enqueue(&packets::send_message(&Message {
            sender: server.config.bot_name.clone(),
            text: text.to_string(),
            recipient: recipient.name.clone(),
            sender_id: server.config.bot_id,
        }))
        .await;
}

/// Cap a message's length, telling the sender when it happens.
pub async fn truncate_message(session: &Session, msg: &str) -> String {
    if msg.chars().count() <= MAX_MESSAGE_LEN {
        return msg.to_string();
    }
    session
        .enqueue(&packets::notification(
            "Your message was truncated\n(exceeded 2000 characters).",
        ))
        .await;
    let truncated: String = msg.chars().take(MAX_MESSAGE_LEN).collect();
    format!("{}... (truncated)", truncated)
}

/// What a now-playing action message parsed into.
pub struct NowPlaying {
    pub map: Beatmap,
    pub mode_vn: u8,
    pub mods: Option<Mods>,
}

/// Parse a `/np` action message; on a hit, the sender's `last_np` is
/// refreshed (or timed out, if we don't know the map).
pub async fn parse_now_playing(
    server: &Server,
    session: &Session,
    msg: &str,
) -> Option<NowPlaying> {
    let captures = server.np_regex.captures(msg)?;

    let map_id: i32 = captures.name("bid")?.as_str().parse().ok()?;
    let map = match server.backend.beatmaps.fetch_by_id(map_id).await {
        Ok(Some(map)) => map,
        Ok(None) => {
            // Unknown map; time out whatever /np we had.
            let mut state = session.state.lock().await;
            if let Some(np) = state.last_np.as_mut() {
                np.timeout = 0;
            }
            return None;
        }
        Err(err) => {
            log::warn!("beatmap lookup for /np failed: {}", err);
            return None;
        }
    };

    let mode_vn = match captures.name("mode_vn").map(|m| m.as_str()) {
        Some("Taiko") => 1,
        Some("CatchTheBeat") => 2,
        Some("osu!mania") => 3,
        _ => session.state.lock().await.status.mode_vanilla(),
    };

    let mods = captures
        .name("mods")
        .map(|m| mods_from_np(m.as_str().trim()));

    let np = LastNp {
        map: map.clone(),
        mode_vn,
        timeout: Utc::now().timestamp() + LAST_NP_LIFETIME_SECS,
    };
    session.state.lock().await.last_np = Some(np);

    Some(NowPlaying { map, mode_vn, mods })
}

const NP_MOD_TOKENS: &[(&str, Mods)] = &[
    ("NOFAIL", Mods::NO_FAIL),
    ("NF", Mods::NO_FAIL),
    ("EASY", Mods::EASY),
    ("EZ", Mods::EASY),
    ("HIDDEN", Mods::HIDDEN),
    ("HD", Mods::HIDDEN),
    ("HARDROCK", Mods::HARD_ROCK),
    ("HR", Mods::HARD_ROCK),
    ("SUDDENDEATH", Mods::SUDDEN_DEATH),
    ("SD", Mods::SUDDEN_DEATH),
    ("DOUBLETIME", Mods::DOUBLE_TIME),
    ("DT", Mods::DOUBLE_TIME),
    ("RELAX", Mods::RELAX),
    ("RX", Mods::RELAX),
    ("HALFTIME", Mods::HALF_TIME),
    ("HT", Mods::HALF_TIME),
    ("NIGHTCORE", Mods::NIGHTCORE),
    ("NC", Mods::NIGHTCORE),
    ("FLASHLIGHT", Mods::FLASHLIGHT),
    ("FL", Mods::FLASHLIGHT),
    ("SPUNOUT", Mods::SPUN_OUT),
    ("SO", Mods::SPUN_OUT),
    ("AUTOPILOT", Mods::AUTOPILOT),
    ("AP", Mods::AUTOPILOT),
    ("FADEIN", Mods::FADE_IN),
    ("FI", Mods::FADE_IN),
    ("MIRROR", Mods::MIRROR),
    ("MR", Mods::MIRROR),
];

/// Mods as they appear in an osu! /np suffix, e.g. "+HDDT" or "+DT ~Relax~".
pub fn mods_from_np(suffix: &str) -> Mods {
    let mut mods = Mods::empty();
    for token in suffix.split_whitespace() {
        let cleaned: String = token
            .trim_matches(|c| matches!(c, '+' | '-' | '~' | '|'))
            .to_uppercase();
        let mut rest = cleaned.as_str();
        while !rest.is_empty() {
            let mut advanced = false;
            for (name, m) in NP_MOD_TOKENS.iter() {
                if rest.starts_with(name) {
                    mods |= *m;
                    rest = &rest[name.len()..];
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                break;
            }
        }
    }
    mods
}

/// Accuracies the /np pp reply quotes.
const NP_ACCURACIES: [f32; 4] = [95.0, 98.0, 99.0, 100.0];

/// Messages sent directly to the bot: commands and /np pp queries.
pub async fn handle_bot_message(server: &Server, session: &Arc<Session>, msg: &str) {
    if msg.starts_with(&server.config.command_prefix) {
        let response = server
            .backend
            .commands
            .process_commands(session.id, &server.config.bot_name, msg)
            .await;
        match response {
            Ok(Some(cmd)) => {
                if let Some(resp) = cmd.resp {
                    send_bot_private(server, session, &resp).await;
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!("command processing failed for {}: {}", session, err),
        }
        return;
    }

    let np = match parse_now_playing(server, session, msg).await {
        Some(np) => np,
        None => {
            if server.np_regex.is_match(msg) {
                send_bot_private(server, session, "Could not find map.").await;
            }
            return;
        }
    };

    let mods = np.mods.unwrap_or(Mods::empty());
    match server
        .backend
        .performance
        .calculate(np.map.id, np.mode_vn, mods.bits(), &NP_ACCURACIES)
        .await
    {
        Ok(pp_values) => {
            let reply = NP_ACCURACIES
                .iter()
                .zip(pp_values)
                .map(|(acc, pp)| format!("{}%: {:.2}pp", acc, pp))
                .collect::<Vec<_>>()
                .join(" | ");
            send_bot_private(server, session, &reply).await;
        }
        Err(err) => {
            log::warn!("pp calculation failed for {}: {}", session, err);
            send_bot_private(server, session, "Performance values are unavailable.").await;
        }
    }
}
