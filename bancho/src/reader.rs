use byteorder::{ByteOrder, LittleEndian};

use crate::types::*;
use crate::ProtocolError;

/// Size of the frame header: `id:u16, _pad:u8, length:u32`.
pub const HEADER_LEN: usize = 7;

/// String marker for an absent (zero-length) string.
const STRING_ABSENT: u8 = 0x00;

/// String marker for a present, ULEB128-length-prefixed string.
const STRING_PRESENT: u8 = 0x0b;

/// A cursor over a borrowed byte view; all reads are little-endian and
/// bounds-checked. No bytes are copied except into owned `String`s.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::UnexpectedEof);
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Everything left in the frame, without copying.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn read_uleb128(&mut self) -> Result<usize, ProtocolError> {
        let mut value: usize = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// A marker-prefixed string, borrowed from the frame.
    pub fn read_str(&mut self) -> Result<&'a str, ProtocolError> {
        match self.read_u8()? {
            STRING_ABSENT => Ok(""),
            STRING_PRESENT => {
                let len = self.read_uleb128()?;
                let bytes = self.take(len)?;
                std::str::from_utf8(bytes).map_err(|_| ProtocolError::BadUtf8)
            }
            marker => Err(ProtocolError::BadStringMarker(marker)),
        }
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        Ok(self.read_str()?.to_string())
    }

    /// A 16-bit-length-prefixed list of i32s.
    pub fn read_i32_list(&mut self) -> Result<Vec<i32>, ProtocolError> {
        let len = self.read_u16()? as usize;
        let mut values = Vec::with_capacity(len.min(256));
        for _ in 0..len {
            values.push(self.read_i32()?);
        }
        Ok(values)
    }

    pub fn read_message(&mut self) -> Result<Message, ProtocolError> {
        Ok(Message {
            sender: self.read_string()?,
            text: self.read_string()?,
            recipient: self.read_string()?,
            sender_id: self.read_i32()?,
        })
    }

    pub fn read_match(&mut self) -> Result<MatchData, ProtocolError> {
        let id = self.read_i16()? as u16;
        let in_progress = self.read_u8()? == 1;
        self.read_u8()?; // powerplay, unused
        let mods = Mods::from_bits_truncate(self.read_u32()?);
        let name = self.read_string()?;
        let passwd = self.read_string()?;
        let map_name = self.read_string()?;
        let map_id = self.read_i32()?;
        let map_md5 = self.read_string()?;

        let mut slot_statuses = [SlotStatus::OPEN; 16];
        for status in slot_statuses.iter_mut() {
            let value = self.read_u8()?;
            *status = SlotStatus::from_bits(value)
                .ok_or(ProtocolError::BadEnum { what: "slot status", value })?;
        }

        let mut slot_teams = [MatchTeam::Neutral; 16];
        for team in slot_teams.iter_mut() {
            let value = self.read_u8()?;
            *team = MatchTeam::from_u8(value)
                .ok_or(ProtocolError::BadEnum { what: "team", value })?;
        }

        let mut slot_ids = [None; 16];
        for (i, status) in slot_statuses.iter().enumerate() {
            if status.has_player() {
                slot_ids[i] = Some(self.read_i32()?);
            }
        }

        let host_id = self.read_i32()?;
        let mode = self.read_u8()?;

        let value = self.read_u8()?;
        let win_condition = WinCondition::from_u8(value)
            .ok_or(ProtocolError::BadEnum { what: "win condition", value })?;

        let value = self.read_u8()?;
        let team_type = TeamType::from_u8(value)
            .ok_or(ProtocolError::BadEnum { what: "team type", value })?;

        let freemods = self.read_u8()? == 1;
        let mut slot_mods = [Mods::empty(); 16];
        if freemods {
            for mods in slot_mods.iter_mut() {
                *mods = Mods::from_bits_truncate(self.read_u32()?);
            }
        }

        let seed = self.read_i32()?;

        Ok(MatchData {
            id,
            in_progress,
            mods,
            name,
            passwd,
            map_name,
            map_id,
            map_md5,
            slot_statuses,
            slot_teams,
            slot_ids,
            host_id,
            mode,
            win_condition,
            team_type,
            freemods,
            slot_mods,
            seed,
        })
    }
}

/// A client packet with its payload decoded.
///
/// Raw-frame payloads (`SpectateFrames`, `MatchScoreUpdate`) stay
/// borrowed; they are re-framed and fanned out at a rate that makes
/// copying them worth avoiding.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket<'a> {
    ChangeAction {
        action: u8,
        info_text: String,
        map_md5: String,
        mods: u32,
        mode: u8,
        map_id: i32,
    },
    SendPublicMessage(Message),
    Logout,
    RequestStatusUpdate,
    Ping,
    StartSpectating { target_id: i32 },
    StopSpectating,
    SpectateFrames { raw: &'a [u8] },
    CantSpectate,
    SendPrivateMessage(Message),
    PartLobby,
    JoinLobby,
    CreateMatch(MatchData),
    JoinMatch { match_id: i32, passwd: String },
    PartMatch,
    MatchChangeSlot { slot_id: i32 },
    MatchReady,
    MatchLock { slot_id: i32 },
    MatchChangeSettings(MatchData),
    MatchStart,
    MatchScoreUpdate { frame: &'a [u8] },
    MatchComplete,
    MatchChangeMods { mods: u32 },
    MatchLoadComplete,
    MatchNoBeatmap,
    MatchNotReady,
    MatchFailed,
    MatchHasBeatmap,
    MatchSkipRequest,
    ChannelJoin { name: String },
    MatchTransferHost { slot_id: i32 },
    FriendAdd { user_id: i32 },
    FriendRemove { user_id: i32 },
    MatchChangeTeam,
    ChannelPart { name: String },
    ReceiveUpdates { filter: i32 },
    SetAwayMessage { text: String },
    UserStatsRequest { user_ids: Vec<i32> },
    MatchInvite { user_id: i32 },
    MatchChangePassword(MatchData),
    TournamentMatchInfoRequest { match_id: i32 },
    UserPresenceRequest { user_ids: Vec<i32> },
    UserPresenceRequestAll,
    ToggleBlockNonFriendDms { value: i32 },
    TournamentJoinMatchChannel { match_id: i32 },
    TournamentLeaveMatchChannel { match_id: i32 },
}

impl<'a> ClientPacket<'a> {
    /// Decode the payload for a known packet id.
    pub fn parse(id: ClientPacketId, payload: &'a [u8]) -> Result<ClientPacket<'a>, ProtocolError> {
        use ClientPacketId as Id;

        let mut r = Reader::new(payload);
        Ok(match id {
            Id::ChangeAction => ClientPacket::ChangeAction {
                action: r.read_u8()?,
                info_text: r.read_string()?,
                map_md5: r.read_string()?,
                mods: r.read_u32()?,
                mode: r.read_u8()?,
                map_id: r.read_i32()?,
            },
            Id::SendPublicMessage => ClientPacket::SendPublicMessage(r.read_message()?),
            Id::Logout => {
                r.read_i32()?; // reserved
                ClientPacket::Logout
            }
            Id::RequestStatusUpdate => ClientPacket::RequestStatusUpdate,
            Id::Ping => ClientPacket::Ping,
            Id::StartSpectating => ClientPacket::StartSpectating {
                target_id: r.read_i32()?,
            },
            Id::StopSpectating => ClientPacket::StopSpectating,
            Id::SpectateFrames => ClientPacket::SpectateFrames { raw: r.read_rest() },
            Id::CantSpectate => ClientPacket::CantSpectate,
            Id::SendPrivateMessage => ClientPacket::SendPrivateMessage(r.read_message()?),
            Id::PartLobby => ClientPacket::PartLobby,
            Id::JoinLobby => ClientPacket::JoinLobby,
            Id::CreateMatch => ClientPacket::CreateMatch(r.read_match()?),
            Id::JoinMatch => ClientPacket::JoinMatch {
                match_id: r.read_i32()?,
                passwd: r.read_string()?,
            },
            Id::PartMatch => ClientPacket::PartMatch,
            Id::MatchChangeSlot => ClientPacket::MatchChangeSlot {
                slot_id: r.read_i32()?,
            },
            Id::MatchReady => ClientPacket::MatchReady,
            Id::MatchLock => ClientPacket::MatchLock {
                slot_id: r.read_i32()?,
            },
            Id::MatchChangeSettings => ClientPacket::MatchChangeSettings(r.read_match()?),
            Id::MatchStart => ClientPacket::MatchStart,
            Id::MatchScoreUpdate => ClientPacket::MatchScoreUpdate { frame: r.read_rest() },
            Id::MatchComplete => ClientPacket::MatchComplete,
            Id::MatchChangeMods => ClientPacket::MatchChangeMods {
                mods: r.read_i32()? as u32,
            },
            Id::MatchLoadComplete => ClientPacket::MatchLoadComplete,
            Id::MatchNoBeatmap => ClientPacket::MatchNoBeatmap,
            Id::MatchNotReady => ClientPacket::MatchNotReady,
            Id::MatchFailed => ClientPacket::MatchFailed,
            Id::MatchHasBeatmap => ClientPacket::MatchHasBeatmap,
            Id::MatchSkipRequest => ClientPacket::MatchSkipRequest,
            Id::ChannelJoin => ClientPacket::ChannelJoin {
                name: r.read_string()?,
            },
            Id::MatchTransferHost => ClientPacket::MatchTransferHost {
                slot_id: r.read_i32()?,
            },
            Id::FriendAdd => ClientPacket::FriendAdd {
                user_id: r.read_i32()?,
            },
            Id::FriendRemove => ClientPacket::FriendRemove {
                user_id: r.read_i32()?,
            },
            Id::MatchChangeTeam => ClientPacket::MatchChangeTeam,
            Id::ChannelPart => ClientPacket::ChannelPart {
                name: r.read_string()?,
            },
            Id::ReceiveUpdates => ClientPacket::ReceiveUpdates {
                filter: r.read_i32()?,
            },
            Id::SetAwayMessage => ClientPacket::SetAwayMessage {
                text: r.read_message()?.text,
            },
            Id::UserStatsRequest => ClientPacket::UserStatsRequest {
                user_ids: r.read_i32_list()?,
            },
            Id::MatchInvite => ClientPacket::MatchInvite {
                user_id: r.read_i32()?,
            },
            Id::MatchChangePassword => ClientPacket::MatchChangePassword(r.read_match()?),
            Id::TournamentMatchInfoRequest => ClientPacket::TournamentMatchInfoRequest {
                match_id: r.read_i32()?,
            },
            Id::UserPresenceRequest => ClientPacket::UserPresenceRequest {
                user_ids: r.read_i32_list()?,
            },
            Id::UserPresenceRequestAll => {
                r.read_i32()?; // ingame time
                ClientPacket::UserPresenceRequestAll
            }
            Id::ToggleBlockNonFriendDms => ClientPacket::ToggleBlockNonFriendDms {
                value: r.read_i32()?,
            },
            Id::TournamentJoinMatchChannel => ClientPacket::TournamentJoinMatchChannel {
                match_id: r.read_i32()?,
            },
            Id::TournamentLeaveMatchChannel => ClientPacket::TournamentLeaveMatchChannel {
                match_id: r.read_i32()?,
            },
        })
    }
}

/// Iterates the framed packets of one request body.
///
/// Unknown packet ids are skipped by consuming their declared length.
/// A malformed payload yields an error for that packet only; iteration
/// resumes at the next frame.
pub struct PacketStream<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketStream<'a> {
    pub fn new(buf: &'a [u8]) -> PacketStream<'a> {
        PacketStream { buf, pos: 0 }
    }
}

impl<'a> Iterator for PacketStream<'a> {
    type Item = Result<ClientPacket<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let remaining = self.buf.len() - self.pos;
            if remaining < HEADER_LEN {
                return None;
            }

            let id = LittleEndian::read_u16(&self.buf[self.pos..]);
            let length = LittleEndian::read_u32(&self.buf[self.pos + 3..]) as usize;
            self.pos += HEADER_LEN;

            if length > self.buf.len() - self.pos {
                let err = ProtocolError::TruncatedFrame {
                    declared: length,
                    remaining: self.buf.len() - self.pos,
                };
                self.pos = self.buf.len();
                return Some(Err(err));
            }

            let payload = &self.buf[self.pos..self.pos + length];
            self.pos += length;

            match ClientPacketId::from_u16(id) {
                Some(packet_id) => return Some(ClientPacket::parse(packet_id, payload)),
                None => {
                    log::debug!("skipping unknown packet id {} ({} bytes)", id, length);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer;

    #[test]
    fn read_strings() {
        let mut r = Reader::new(&[0x00]);
        assert_eq!("", r.read_str().unwrap());

        let mut r = Reader::new(&[0x0b, 0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!("hello", r.read_str().unwrap());

        let mut r = Reader::new(&[0x07, 0x00]);
        assert_eq!(Err(ProtocolError::BadStringMarker(0x07)), r.read_str());
    }

    #[test]
    fn stream_dispatches_packets_in_order() {
        let mut body = Vec::new();
        body.extend(writer::frame(4, &[])); // PING
        body.extend(writer::frame(17, &[])); // STOP_SPECTATING
        body.extend(writer::frame(4, &[]));

        let packets: Vec<_> = PacketStream::new(&body).map(Result::unwrap).collect();
        assert_eq!(
            vec![
                ClientPacket::Ping,
                ClientPacket::StopSpectating,
                ClientPacket::Ping,
            ],
            packets
        );
    }

    #[test]
    fn stream_skips_unknown_ids() {
        let mut body = Vec::new();
        body.extend(writer::frame(200, &[1, 2, 3, 4])); // no such client packet
        body.extend(writer::frame(4, &[]));

        let packets: Vec<_> = PacketStream::new(&body).map(Result::unwrap).collect();
        assert_eq!(vec![ClientPacket::Ping], packets);
    }

    #[test]
    fn stream_survives_malformed_payload() {
        // A CHANNEL_JOIN whose string has a bad marker, length-correct.
        let mut body = Vec::new();
        body.extend(writer::frame(63, &[0x07, 0x00, 0x00]));
        body.extend(writer::frame(4, &[]));

        let mut stream = PacketStream::new(&body);
        assert!(stream.next().unwrap().is_err());
        assert_eq!(ClientPacket::Ping, stream.next().unwrap().unwrap());
        assert!(stream.next().is_none());
    }

    #[test]
    fn stream_stops_on_truncated_frame() {
        let mut body = writer::frame(4, &[]);
        body.extend([16u8, 0, 0, 255, 0, 0, 0]); // declares 255 bytes, has none

        let mut stream = PacketStream::new(&body);
        assert_eq!(ClientPacket::Ping, stream.next().unwrap().unwrap());
        assert!(matches!(
            stream.next(),
            Some(Err(ProtocolError::TruncatedFrame { .. }))
        ));
        assert!(stream.next().is_none());
    }
}
