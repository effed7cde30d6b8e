//! Constructors for every packet the server emits.
//!
//! Each returns a complete frame, ready to be appended to a session's
//! outbound queue.

use crate::types::*;
use crate::writer::Writer;
use crate::ServerPacketId as Id;

/// Everything a peer needs to render a user in their player list.
#[derive(Debug, Clone, Copy)]
pub struct UserPresence<'a> {
    pub user_id: i32,
    pub name: &'a str,
    pub utc_offset: i8,
    pub country_code: u8,
    pub privileges: ClientPrivileges,
    /// Vanilla game mode (0-3).
    pub mode: u8,
    pub longitude: f32,
    pub latitude: f32,
    pub global_rank: i32,
}

/// A user's current status and ranked statistics.
#[derive(Debug, Clone, Copy)]
pub struct UserStats<'a> {
    pub user_id: i32,
    pub action: Action,
    pub info_text: &'a str,
    pub map_md5: &'a str,
    pub mods: Mods,
    /// Vanilla game mode (0-3).
    pub mode: u8,
    pub map_id: i32,
    pub ranked_score: i64,
    /// Accuracy in percent (0-100).
    pub accuracy: f32,
    pub plays: i32,
    pub total_score: i64,
    pub global_rank: i32,
    pub pp: i16,
}

pub fn user_id(id: i32) -> Vec<u8> {
    Writer::new().i32(id).finish(Id::UserId)
}

pub fn protocol_version(version: i32) -> Vec<u8> {
    Writer::new().i32(version).finish(Id::ProtocolVersion)
}

pub fn bancho_privileges(privileges: ClientPrivileges) -> Vec<u8> {
    Writer::new()
        .i32(privileges.bits() as i32)
        .finish(Id::Privileges)
}

pub fn notification(msg: &str) -> Vec<u8> {
    Writer::new().string(msg).finish(Id::Notification)
}

pub fn send_message(msg: &Message) -> Vec<u8> {
    Writer::new()
        .string(&msg.sender)
        .string(&msg.text)
        .string(&msg.recipient)
        .i32(msg.sender_id)
        .finish(Id::SendMessage)
}

pub fn pong() -> Vec<u8> {
    Writer::new().finish(Id::Pong)
}

pub fn user_presence(p: &UserPresence<'_>) -> Vec<u8> {
    Writer::new()
        .i32(p.user_id)
        .string(p.name)
        .u8((p.utc_offset + 24) as u8)
        .u8(p.country_code)
        .u8(p.privileges.bits() | (p.mode << 5))
        .f32(p.longitude)
        .f32(p.latitude)
        .i32(p.global_rank)
        .finish(Id::UserPresence)
}

pub fn user_stats(s: &UserStats<'_>) -> Vec<u8> {
    Writer::new()
        .i32(s.user_id)
        .u8(s.action as u8)
        .string(s.info_text)
        .string(s.map_md5)
        .i32(s.mods.bits() as i32)
        .u8(s.mode)
        .i32(s.map_id)
        .i64(s.ranked_score)
        .f32(s.accuracy / 100.0)
        .i32(s.plays)
        .i64(s.total_score)
        .i32(s.global_rank)
        .i16(s.pp)
        .finish(Id::UserStats)
}

/// Compact presence for the bot; its coordinates are nonsense on
/// purpose so it renders off the world map.
pub fn bot_presence(user_id: i32, name: &str) -> Vec<u8> {
    Writer::new()
        .i32(user_id)
        .string(name)
        .u8(24) // utc+0
        .u8(245) // satellite provider
        .u8(31)
        .f32(1234.0)
        .f32(4321.0)
        .i32(0)
        .finish(Id::UserPresence)
}

pub fn bot_stats(user_id: i32) -> Vec<u8> {
    Writer::new()
        .i32(user_id)
        .u8(Action::Watching as u8)
        .string("over the server")
        .string("")
        .i32(0)
        .u8(0)
        .i32(0)
        .i64(0)
        .f32(0.0)
        .i32(0)
        .i64(0)
        .i32(0)
        .i16(0)
        .finish(Id::UserStats)
}

pub fn logout(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).u8(0).finish(Id::UserLogout)
}

pub fn friends_list(friend_ids: &[i32]) -> Vec<u8> {
    Writer::new().i32_list(friend_ids).finish(Id::FriendsList)
}

pub fn silence_end(delta_secs: i32) -> Vec<u8> {
    Writer::new().i32(delta_secs).finish(Id::SilenceEnd)
}

pub fn user_silenced(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).finish(Id::UserSilenced)
}

pub fn user_dm_blocked(target: &str) -> Vec<u8> {
    Writer::new()
        .string("")
        .string("")
        .string(target)
        .i32(0)
        .finish(Id::UserDmBlocked)
}

pub fn target_silenced(target: &str) -> Vec<u8> {
    Writer::new()
        .string("")
        .string("")
        .string(target)
        .i32(0)
        .finish(Id::TargetIsSilenced)
}

pub fn version_update_forced() -> Vec<u8> {
    Writer::new().finish(Id::VersionUpdateForced)
}

pub fn account_restricted() -> Vec<u8> {
    Writer::new().finish(Id::AccountRestricted)
}

/// Tell the client to reconnect after the given delay.
pub fn restart(ms: i32) -> Vec<u8> {
    Writer::new().i32(ms).finish(Id::Restart)
}

pub fn main_menu_icon(icon_url: &str, onclick_url: &str) -> Vec<u8> {
    Writer::new()
        .string(&format!("{}|{}", icon_url, onclick_url))
        .finish(Id::MainMenuIcon)
}

pub fn channel_info(name: &str, topic: &str, player_count: i16) -> Vec<u8> {
    Writer::new()
        .string(name)
        .string(topic)
        .i16(player_count)
        .finish(Id::ChannelInfo)
}

pub fn channel_info_end() -> Vec<u8> {
    Writer::new().finish(Id::ChannelInfoEnd)
}

pub fn channel_join_success(name: &str) -> Vec<u8> {
    Writer::new().string(name).finish(Id::ChannelJoinSuccess)
}

pub fn channel_kick(name: &str) -> Vec<u8> {
    Writer::new().string(name).finish(Id::ChannelKick)
}

pub fn channel_auto_join(name: &str, topic: &str, player_count: i16) -> Vec<u8> {
    Writer::new()
        .string(name)
        .string(topic)
        .i16(player_count)
        .finish(Id::ChannelAutoJoin)
}

pub fn spectator_joined(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).finish(Id::SpectatorJoined)
}

pub fn spectator_left(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).finish(Id::SpectatorLeft)
}

pub fn fellow_spectator_joined(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).finish(Id::FellowSpectatorJoined)
}

pub fn fellow_spectator_left(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).finish(Id::FellowSpectatorLeft)
}

pub fn spectator_cant_spectate(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).finish(Id::SpectatorCantSpectate)
}

/// Re-frame a replay-frame bundle for fan-out to spectators.
pub fn spectate_frames(raw: &[u8]) -> Vec<u8> {
    Writer::new().raw(raw).finish(Id::SpectateFrames)
}

fn write_match(mut w: Writer, m: &MatchData, send_pw: bool) -> Writer {
    w = w
        .i16(m.id as i16)
        .u8(m.in_progress as u8)
        .u8(0) // powerplay, unused
        .u32(m.mods.bits())
        .string(&m.name);

    w = if m.passwd.is_empty() {
        w.string("")
    } else if send_pw {
        w.string(&m.passwd)
    } else {
        w.string_present_empty()
    };

    w = w.string(&m.map_name).i32(m.map_id).string(&m.map_md5);

    for status in &m.slot_statuses {
        w = w.u8(status.bits());
    }
    for team in &m.slot_teams {
        w = w.u8(*team as u8);
    }
    for (i, status) in m.slot_statuses.iter().enumerate() {
        if status.has_player() {
            w = w.i32(m.slot_ids[i].unwrap_or(0));
        }
    }

    w = w
        .i32(m.host_id)
        .u8(m.mode)
        .u8(m.win_condition as u8)
        .u8(m.team_type as u8)
        .u8(m.freemods as u8);

    if m.freemods {
        for mods in &m.slot_mods {
            w = w.u32(mods.bits());
        }
    }

    w.i32(m.seed)
}

pub fn new_match(m: &MatchData) -> Vec<u8> {
    write_match(Writer::new(), m, true).finish(Id::NewMatch)
}

pub fn update_match(m: &MatchData, send_pw: bool) -> Vec<u8> {
    write_match(Writer::new(), m, send_pw).finish(Id::UpdateMatch)
}

pub fn match_join_success(m: &MatchData) -> Vec<u8> {
    write_match(Writer::new(), m, true).finish(Id::MatchJoinSuccess)
}

pub fn match_join_fail() -> Vec<u8> {
    Writer::new().finish(Id::MatchJoinFail)
}

pub fn match_start(m: &MatchData) -> Vec<u8> {
    write_match(Writer::new(), m, true).finish(Id::MatchStart)
}

pub fn dispose_match(match_id: i32) -> Vec<u8> {
    Writer::new().i32(match_id).finish(Id::DisposeMatch)
}

pub fn match_transfer_host() -> Vec<u8> {
    Writer::new().finish(Id::MatchTransferHost)
}

pub fn match_all_players_loaded() -> Vec<u8> {
    Writer::new().finish(Id::MatchAllPlayersLoaded)
}

pub fn match_player_failed(slot_id: i32) -> Vec<u8> {
    Writer::new().i32(slot_id).finish(Id::MatchPlayerFailed)
}

pub fn match_complete() -> Vec<u8> {
    Writer::new().finish(Id::MatchComplete)
}

pub fn match_skip() -> Vec<u8> {
    Writer::new().finish(Id::MatchSkip)
}

pub fn match_player_skipped(user_id: i32) -> Vec<u8> {
    Writer::new().i32(user_id).finish(Id::MatchPlayerSkipped)
}

pub fn match_invite(sender: &str, sender_id: i32, recipient: &str, match_url: &str) -> Vec<u8> {
    Writer::new()
        .string(sender)
        .string(&format!("Come join my game: {}.", match_url))
        .string(recipient)
        .i32(sender_id)
        .finish(Id::MatchInvite)
}

pub fn match_change_password(passwd: &str) -> Vec<u8> {
    Writer::new().string(passwd).finish(Id::MatchChangePassword)
}

pub fn match_abort() -> Vec<u8> {
    Writer::new().finish(Id::MatchAbort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn sample_match(freemods: bool) -> MatchData {
        let mut m = MatchData {
            id: 3,
            in_progress: false,
            mods: Mods::HIDDEN | Mods::DOUBLE_TIME,
            name: "owc: (a) vs (b)".to_string(),
            passwd: "hunter2".to_string(),
            map_name: "artist - title [diff]".to_string(),
            map_id: 1871928,
            map_md5: "1cf5b2c2edfafd055536d2cefcb89c0e".to_string(),
            slot_statuses: [SlotStatus::OPEN; 16],
            slot_teams: [MatchTeam::Neutral; 16],
            slot_ids: [None; 16],
            host_id: 1001,
            mode: 0,
            win_condition: WinCondition::Accuracy,
            team_type: TeamType::TeamVs,
            freemods,
            slot_mods: [Mods::empty(); 16],
            seed: 42,
        };
        m.slot_statuses[0] = SlotStatus::READY;
        m.slot_ids[0] = Some(1001);
        m.slot_teams[0] = MatchTeam::Blue;
        m.slot_statuses[1] = SlotStatus::NOT_READY;
        m.slot_ids[1] = Some(1002);
        m.slot_teams[1] = MatchTeam::Red;
        m.slot_statuses[5] = SlotStatus::LOCKED;
        if freemods {
            m.slot_mods[0] = Mods::HARD_ROCK;
            m.slot_mods[1] = Mods::HIDDEN;
        }
        m
    }

    /// Strip the 7-byte frame header.
    fn payload(packet: &[u8]) -> &[u8] {
        &packet[7..]
    }

    #[test]
    fn match_roundtrip() {
        for freemods in [false, true] {
            let m = sample_match(freemods);
            let encoded = new_match(&m);
            let decoded = Reader::new(payload(&encoded)).read_match().unwrap();
            assert_eq!(m, decoded);
        }
    }

    #[test]
    fn match_password_hidden_when_not_sent() {
        let m = sample_match(false);
        let encoded = update_match(&m, false);
        let decoded = Reader::new(payload(&encoded)).read_match().unwrap();
        assert_eq!("", decoded.passwd);

        // The marker must still signal "has a password".
        let name_end = {
            let mut r = Reader::new(payload(&encoded));
            r.read_i16().unwrap();
            r.read_u8().unwrap();
            r.read_u8().unwrap();
            r.read_u32().unwrap();
            r.read_str().unwrap();
            payload(&encoded).len() - r.remaining()
        };
        assert_eq!(0x0b, payload(&encoded)[name_end]);
    }

    #[test]
    fn message_roundtrip() {
        let msg = Message {
            sender: "alice".to_string(),
            text: "hello there".to_string(),
            recipient: "#osu".to_string(),
            sender_id: 1001,
        };
        let encoded = send_message(&msg);
        let decoded = Reader::new(payload(&encoded)).read_message().unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn spectate_frames_framing() {
        let encoded = spectate_frames(&[9, 9, 9]);
        assert_eq!(vec![0x0f, 0, 0, 3, 0, 0, 0, 9, 9, 9], encoded);
    }

    #[test]
    fn user_id_layout() {
        assert_eq!(vec![5, 0, 0, 4, 0, 0, 0, 0xff, 0xff, 0xff, 0xff], user_id(-1));
    }

    #[test]
    fn presence_bias_and_mode_shift() {
        let p = UserPresence {
            user_id: 1001,
            name: "alice",
            utc_offset: -5,
            country_code: 38,
            privileges: ClientPrivileges::PLAYER | ClientPrivileges::SUPPORTER,
            mode: 1,
            longitude: 0.0,
            latitude: 0.0,
            global_rank: 12,
        };
        let encoded = user_presence(&p);
        let mut r = Reader::new(payload(&encoded));
        assert_eq!(1001, r.read_i32().unwrap());
        assert_eq!("alice", r.read_str().unwrap());
        assert_eq!(19, r.read_u8().unwrap()); // -5 + 24
        assert_eq!(38, r.read_u8().unwrap());
        assert_eq!(0b0010_0101, r.read_u8().unwrap()); // player|supporter, mode 1
    }
}
