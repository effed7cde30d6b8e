use bitflags::bitflags;

/// Packets sent by the osu! client.
///
/// The numeric identifiers are fixed by the protocol and must never be
/// renumbered; clients are built against them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ClientPacketId {
    ChangeAction = 0,
    SendPublicMessage = 1,
    Logout = 2,
    RequestStatusUpdate = 3,
    Ping = 4,
    StartSpectating = 16,
    StopSpectating = 17,
    SpectateFrames = 18,
    CantSpectate = 21,
    SendPrivateMessage = 25,
    PartLobby = 29,
    JoinLobby = 30,
    CreateMatch = 31,
    JoinMatch = 32,
    PartMatch = 33,
    MatchChangeSlot = 38,
    MatchReady = 39,
    MatchLock = 40,
    MatchChangeSettings = 41,
    MatchStart = 44,
    MatchScoreUpdate = 47,
    MatchComplete = 49,
    MatchChangeMods = 51,
    MatchLoadComplete = 52,
    MatchNoBeatmap = 54,
    MatchNotReady = 55,
    MatchFailed = 56,
    MatchHasBeatmap = 59,
    MatchSkipRequest = 60,
    ChannelJoin = 63,
    MatchTransferHost = 70,
    FriendAdd = 73,
    FriendRemove = 74,
    MatchChangeTeam = 77,
    ChannelPart = 78,
    ReceiveUpdates = 79,
    SetAwayMessage = 82,
    UserStatsRequest = 85,
    MatchInvite = 87,
    MatchChangePassword = 90,
    TournamentMatchInfoRequest = 91,
    UserPresenceRequest = 93,
    UserPresenceRequestAll = 98,
    ToggleBlockNonFriendDms = 99,
    TournamentJoinMatchChannel = 100,
    TournamentLeaveMatchChannel = 101,
}

impl ClientPacketId {
    /// Every packet id the server handles, in numeric order.
    pub const ALL: [ClientPacketId; 46] = [
        ClientPacketId::ChangeAction,
        ClientPacketId::SendPublicMessage,
        ClientPacketId::Logout,
        ClientPacketId::RequestStatusUpdate,
        ClientPacketId::Ping,
        ClientPacketId::StartSpectating,
        ClientPacketId::StopSpectating,
        ClientPacketId::SpectateFrames,
        ClientPacketId::CantSpectate,
        ClientPacketId::SendPrivateMessage,
        ClientPacketId::PartLobby,
        ClientPacketId::JoinLobby,
        ClientPacketId::CreateMatch,
        ClientPacketId::JoinMatch,
        ClientPacketId::PartMatch,
        ClientPacketId::MatchChangeSlot,
        ClientPacketId::MatchReady,
        ClientPacketId::MatchLock,
        ClientPacketId::MatchChangeSettings,
        ClientPacketId::MatchStart,
        ClientPacketId::MatchScoreUpdate,
        ClientPacketId::MatchComplete,
        ClientPacketId::MatchChangeMods,
        ClientPacketId::MatchLoadComplete,
        ClientPacketId::MatchNoBeatmap,
        ClientPacketId::MatchNotReady,
        ClientPacketId::MatchFailed,
        ClientPacketId::MatchHasBeatmap,
        ClientPacketId::MatchSkipRequest,
        ClientPacketId::ChannelJoin,
        ClientPacketId::MatchTransferHost,
        ClientPacketId::FriendAdd,
        ClientPacketId::FriendRemove,
        ClientPacketId::MatchChangeTeam,
        ClientPacketId::ChannelPart,
        ClientPacketId::ReceiveUpdates,
        ClientPacketId::SetAwayMessage,
        ClientPacketId::UserStatsRequest,
        ClientPacketId::MatchInvite,
        ClientPacketId::MatchChangePassword,
        ClientPacketId::TournamentMatchInfoRequest,
        ClientPacketId::UserPresenceRequest,
        ClientPacketId::UserPresenceRequestAll,
        ClientPacketId::ToggleBlockNonFriendDms,
        ClientPacketId::TournamentJoinMatchChannel,
        ClientPacketId::TournamentLeaveMatchChannel,
    ];

    pub fn from_u16(value: u16) -> Option<ClientPacketId> {
        use ClientPacketId::*;
        Some(match value {
            0 => ChangeAction,
            1 => SendPublicMessage,
            2 => Logout,
            3 => RequestStatusUpdate,
            4 => Ping,
            16 => StartSpectating,
            17 => StopSpectating,
            18 => SpectateFrames,
            21 => CantSpectate,
            25 => SendPrivateMessage,
            29 => PartLobby,
            30 => JoinLobby,
            31 => CreateMatch,
            32 => JoinMatch,
            33 => PartMatch,
            38 => MatchChangeSlot,
            39 => MatchReady,
            40 => MatchLock,
            41 => MatchChangeSettings,
            44 => MatchStart,
            47 => MatchScoreUpdate,
            49 => MatchComplete,
            51 => MatchChangeMods,
            52 => MatchLoadComplete,
            54 => MatchNoBeatmap,
            55 => MatchNotReady,
            56 => MatchFailed,
            59 => MatchHasBeatmap,
            60 => MatchSkipRequest,
            63 => ChannelJoin,
            70 => MatchTransferHost,
            73 => FriendAdd,
            74 => FriendRemove,
            77 => MatchChangeTeam,
            78 => ChannelPart,
            79 => ReceiveUpdates,
            82 => SetAwayMessage,
            85 => UserStatsRequest,
            87 => MatchInvite,
            90 => MatchChangePassword,
            91 => TournamentMatchInfoRequest,
            93 => UserPresenceRequest,
            98 => UserPresenceRequestAll,
            99 => ToggleBlockNonFriendDms,
            100 => TournamentJoinMatchChannel,
            101 => TournamentLeaveMatchChannel,
            _ => return None,
        })
    }
}

/// Packets sent to the osu! client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServerPacketId {
    UserId = 5,
    SendMessage = 7,
    Pong = 8,
    HandleIrcChangeUsername = 9,
    UserStats = 11,
    UserLogout = 12,
    SpectatorJoined = 13,
    SpectatorLeft = 14,
    SpectateFrames = 15,
    VersionUpdate = 19,
    SpectatorCantSpectate = 22,
    GetAttention = 23,
    Notification = 24,
    UpdateMatch = 26,
    NewMatch = 27,
    DisposeMatch = 28,
    ToggleBlockNonFriendDms = 34,
    MatchJoinSuccess = 36,
    MatchJoinFail = 37,
    FellowSpectatorJoined = 42,
    FellowSpectatorLeft = 43,
    AllPlayersLoaded = 45,
    MatchStart = 46,
    MatchScoreUpdate = 48,
    MatchTransferHost = 50,
    MatchAllPlayersLoaded = 53,
    MatchPlayerFailed = 57,
    MatchComplete = 58,
    MatchSkip = 61,
    Unauthorized = 62,
    ChannelJoinSuccess = 64,
    ChannelInfo = 65,
    ChannelKick = 66,
    ChannelAutoJoin = 67,
    BeatmapInfoReply = 69,
    Privileges = 71,
    FriendsList = 72,
    ProtocolVersion = 75,
    MainMenuIcon = 76,
    Monitor = 80,
    MatchPlayerSkipped = 81,
    UserPresence = 83,
    Restart = 86,
    MatchInvite = 88,
    ChannelInfoEnd = 89,
    MatchChangePassword = 91,
    SilenceEnd = 92,
    UserSilenced = 94,
    UserPresenceSingle = 95,
    UserPresenceBundle = 96,
    UserDmBlocked = 100,
    TargetIsSilenced = 101,
    VersionUpdateForced = 102,
    SwitchServer = 103,
    AccountRestricted = 104,
    Rtx = 105,
    MatchAbort = 106,
    SwitchTournamentServer = 107,
}

bitflags! {
    /// Gameplay modifiers, as transmitted in status/match payloads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Mods: u32 {
        const NO_FAIL = 1 << 0;
        const EASY = 1 << 1;
        const TOUCHSCREEN = 1 << 2;
        const HIDDEN = 1 << 3;
        const HARD_ROCK = 1 << 4;
        const SUDDEN_DEATH = 1 << 5;
        const DOUBLE_TIME = 1 << 6;
        const RELAX = 1 << 7;
        const HALF_TIME = 1 << 8;
        const NIGHTCORE = 1 << 9;
        const FLASHLIGHT = 1 << 10;
        const AUTOPLAY = 1 << 11;
        const SPUN_OUT = 1 << 12;
        const AUTOPILOT = 1 << 13;
        const PERFECT = 1 << 14;
        const KEY4 = 1 << 15;
        const KEY5 = 1 << 16;
        const KEY6 = 1 << 17;
        const KEY7 = 1 << 18;
        const KEY8 = 1 << 19;
        const FADE_IN = 1 << 20;
        const RANDOM = 1 << 21;
        const CINEMA = 1 << 22;
        const TARGET = 1 << 23;
        const KEY9 = 1 << 24;
        const KEY_COOP = 1 << 25;
        const KEY1 = 1 << 26;
        const KEY3 = 1 << 27;
        const KEY2 = 1 << 28;
        const SCORE_V2 = 1 << 29;
        const MIRROR = 1 << 30;
    }
}

impl Mods {
    /// Mods that stay room-wide even under freemods.
    pub const SPEED_CHANGING: Mods = Mods::DOUBLE_TIME
        .union(Mods::NIGHTCORE)
        .union(Mods::HALF_TIME);
}

bitflags! {
    /// The state of one multiplayer slot.
    ///
    /// `open` iff the slot is empty and unlocked; `locked` implies empty.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotStatus: u8 {
        const OPEN = 1 << 0;
        const LOCKED = 1 << 1;
        const NOT_READY = 1 << 2;
        const READY = 1 << 3;
        const NO_MAP = 1 << 4;
        const PLAYING = 1 << 5;
        const COMPLETE = 1 << 6;
        const QUIT = 1 << 7;
    }
}

impl SlotStatus {
    /// Any status implying the slot is occupied.
    pub const HAS_PLAYER: SlotStatus = SlotStatus::NOT_READY
        .union(SlotStatus::READY)
        .union(SlotStatus::NO_MAP)
        .union(SlotStatus::PLAYING)
        .union(SlotStatus::COMPLETE);

    pub fn has_player(self) -> bool {
        self.intersects(SlotStatus::HAS_PLAYER)
    }
}

bitflags! {
    /// Privileges as understood by the client (packet 71 and presence).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientPrivileges: u8 {
        const PLAYER = 1 << 0;
        const MODERATOR = 1 << 1;
        const SUPPORTER = 1 << 2;
        const OWNER = 1 << 3;
        const DEVELOPER = 1 << 4;
        const TOURNAMENT = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MatchTeam {
    Neutral = 0,
    Blue = 1,
    Red = 2,
}

impl MatchTeam {
    pub fn from_u8(value: u8) -> Option<MatchTeam> {
        Some(match value {
            0 => MatchTeam::Neutral,
            1 => MatchTeam::Blue,
            2 => MatchTeam::Red,
            _ => return None,
        })
    }

    /// The opposing team; neutral has none.
    pub fn other(self) -> Option<MatchTeam> {
        match self {
            MatchTeam::Neutral => None,
            MatchTeam::Blue => Some(MatchTeam::Red),
            MatchTeam::Red => Some(MatchTeam::Blue),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TeamType {
    HeadToHead = 0,
    TagCoop = 1,
    TeamVs = 2,
    TagTeamVs = 3,
}

impl TeamType {
    pub fn from_u8(value: u8) -> Option<TeamType> {
        Some(match value {
            0 => TeamType::HeadToHead,
            1 => TeamType::TagCoop,
            2 => TeamType::TeamVs,
            3 => TeamType::TagTeamVs,
            _ => return None,
        })
    }

    /// Free-for-all team types have no fixed teams.
    pub fn is_ffa(self) -> bool {
        matches!(self, TeamType::HeadToHead | TeamType::TagCoop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WinCondition {
    Score = 0,
    Accuracy = 1,
    Combo = 2,
    ScoreV2 = 3,
}

impl WinCondition {
    pub fn from_u8(value: u8) -> Option<WinCondition> {
        Some(match value {
            0 => WinCondition::Score,
            1 => WinCondition::Accuracy,
            2 => WinCondition::Combo,
            3 => WinCondition::ScoreV2,
            _ => return None,
        })
    }
}

/// The client's current activity, as shown in its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    Idle = 0,
    Afk = 1,
    Playing = 2,
    Editing = 3,
    Modding = 4,
    Multiplayer = 5,
    Watching = 6,
    Unknown = 7,
    Testing = 8,
    Submitting = 9,
    Paused = 10,
    Lobby = 11,
    Multiplaying = 12,
    OsuDirect = 13,
}

impl Action {
    pub fn from_u8(value: u8) -> Option<Action> {
        use Action::*;
        Some(match value {
            0 => Idle,
            1 => Afk,
            2 => Playing,
            3 => Editing,
            4 => Modding,
            5 => Multiplayer,
            6 => Watching,
            7 => Unknown,
            8 => Testing,
            9 => Submitting,
            10 => Paused,
            11 => Lobby,
            12 => Multiplaying,
            13 => OsuDirect,
            _ => return None,
        })
    }
}

/// The scope of presence updates a client wishes to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PresenceFilter {
    None = 0,
    All = 1,
    Friends = 2,
}

impl PresenceFilter {
    pub fn from_i32(value: i32) -> Option<PresenceFilter> {
        Some(match value {
            0 => PresenceFilter::None,
            1 => PresenceFilter::All,
            2 => PresenceFilter::Friends,
            _ => return None,
        })
    }
}

/// A chat message payload: three strings plus the sender's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub text: String,
    pub recipient: String,
    pub sender_id: i32,
}

/// The fixed wire layout of a multiplayer match.
///
/// Slot user ids are only transmitted for occupied slots, and per-slot
/// mods only when freemods is on; both rules are encoded in the
/// reader/writer rather than here.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchData {
    pub id: u16,
    pub in_progress: bool,
    pub mods: Mods,
    pub name: String,
    pub passwd: String,
    pub map_name: String,
    pub map_id: i32,
    pub map_md5: String,
    pub slot_statuses: [SlotStatus; 16],
    pub slot_teams: [MatchTeam; 16],
    pub slot_ids: [Option<i32>; 16],
    pub host_id: i32,
    pub mode: u8,
    pub win_condition: WinCondition,
    pub team_type: TeamType,
    pub freemods: bool,
    pub slot_mods: [Mods; 16],
    pub seed: i32,
}
