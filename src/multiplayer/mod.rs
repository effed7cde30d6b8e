pub use points::update_matchpoints;

mod points;
pub mod actions;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bancho::{MatchData, MatchTeam, Mods, SlotStatus, TeamType, WinCondition};
use tokio::sync::{Mutex, RwLock};

/// Number of rooms the match table holds.
pub const MAX_MATCHES: usize = 64;

/// Slots per match.
pub const MAX_SLOTS: usize = 16;

/// One of the 16 positions in a match.
#[derive(Debug, Clone)]
pub struct Slot {
    /// Session id of the occupant.
    pub player: Option<i32>,
    pub status: SlotStatus,
    pub team: MatchTeam,
    pub mods: Mods,
    pub loaded: bool,
    pub skipped: bool,
}

impl Default for Slot {
    fn default() -> Slot {
        Slot {
            player: None,
            status: SlotStatus::OPEN,
            team: MatchTeam::Neutral,
            mods: Mods::empty(),
            loaded: false,
            skipped: false,
        }
    }
}

impl Slot {
    pub fn has_player(&self) -> bool {
        self.status.has_player()
    }

    /// Back to open and empty.
    pub fn reset(&mut self) {
        *self = Slot::default();
    }

    pub fn copy_from(&mut self, other: &Slot) {
        *self = other.clone();
    }
}

/// A scrimmage point can go to a player (free-for-all) or a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreKey {
    Player(i32),
    Team(MatchTeam),
}

/// A multiplayer room. Guarded by one mutex in the match table; its
/// slots and scrimmage state are only touched through that lock.
#[derive(Debug)]
pub struct Match {
    pub id: u16,
    pub name: String,
    pub passwd: String,
    /// Session id of the host; always occupies some slot.
    pub host_id: i32,
    pub mode: u8,
    pub mods: Mods,
    pub freemods: bool,
    pub team_type: TeamType,
    pub win_condition: WinCondition,
    pub use_pp_scoring: bool,
    pub map_id: i32,
    pub map_md5: String,
    pub map_name: String,
    /// Remembers the map across a "host is browsing" interlude.
    pub prev_map_id: i32,
    pub in_progress: bool,
    pub is_scrimming: bool,
    pub winning_pts: u32,
    pub match_points: HashMap<ScoreKey, u32>,
    /// Point winners in order; `None` marks a tie.
    pub winners: Vec<Option<ScoreKey>>,
    /// (mods, map id) picks banned during a scrimmage.
    pub bans: HashSet<(u32, i32)>,
    /// Tourney clients observing through the match channel.
    pub tourney_clients: HashSet<i32>,
    pub seed: i32,
    pub slots: [Slot; 16],
}

impl Match {
    /// Build a room from a CREATE_MATCH payload. The table assigns the
    /// real id on append.
    pub fn from_data(data: &MatchData) -> Match {
        Match {
            id: 0,
            name: data.name.clone(),
            passwd: data.passwd.clone(),
            host_id: data.host_id,
            mode: data.mode,
            mods: data.mods,
            freemods: data.freemods,
            team_type: data.team_type,
            win_condition: data.win_condition,
            use_pp_scoring: false,
            map_id: data.map_id,
            map_md5: data.map_md5.clone(),
            map_name: data.map_name.clone(),
            prev_map_id: data.map_id,
            in_progress: false,
            is_scrimming: false,
            winning_pts: 0,
            match_points: HashMap::new(),
            winners: Vec::new(),
            bans: HashSet::new(),
            tourney_clients: HashSet::new(),
            seed: data.seed,
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }

    /// The wire form of the current room state.
    pub fn to_data(&self) -> MatchData {
        let mut slot_statuses = [SlotStatus::OPEN; 16];
        let mut slot_teams = [MatchTeam::Neutral; 16];
        let mut slot_ids = [None; 16];
        let mut slot_mods = [Mods::empty(); 16];

        for (i, slot) in self.slots.iter().enumerate() {
            slot_statuses[i] = slot.status;
            slot_teams[i] = slot.team;
            slot_ids[i] = slot.player;
            slot_mods[i] = slot.mods;
        }

        MatchData {
            id: self.id,
            in_progress: self.in_progress,
            mods: self.mods,
            name: self.name.clone(),
            passwd: self.passwd.clone(),
            map_name: self.map_name.clone(),
            map_id: self.map_id,
            map_md5: self.map_md5.clone(),
            slot_statuses,
            slot_teams,
            slot_ids,
            host_id: self.host_id,
            mode: self.mode,
            win_condition: self.win_condition,
            team_type: self.team_type,
            freemods: self.freemods,
            slot_mods,
            seed: self.seed,
        }
    }

    pub fn chat_name(&self) -> String {
        format!("#multi_{}", self.id)
    }

    pub fn slot_id_of(&self, session_id: i32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.player == Some(session_id))
    }

    pub fn slot_of(&mut self, session_id: i32) -> Option<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|s| s.player == Some(session_id))
    }

    pub fn host_slot(&self) -> Option<&Slot> {
        self.slots.iter().find(|s| s.player == Some(self.host_id))
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.status == SlotStatus::OPEN)
    }

    pub fn occupied_ids(&self) -> Vec<i32> {
        self.slots.iter().filter_map(|s| s.player).collect()
    }

    /// Move every slot in `expected` status back to not-ready.
    pub fn unready_players(&mut self, expected: SlotStatus) {
        for slot in self.slots.iter_mut() {
            if slot.status == expected {
                slot.status = SlotStatus::NOT_READY;
            }
        }
    }

    /// Wipe the running score; the winner history stays.
    pub fn reset_scrimmage_state(&mut self) {
        self.match_points.clear();
        self.bans.clear();
    }
}

/// The 64-wide match table.
#[derive(Clone)]
pub struct Matches {
    table: Arc<RwLock<Vec<Option<Arc<Mutex<Match>>>>>>,
}

impl Default for Matches {
    fn default() -> Matches {
        Matches {
            table: Arc::new(RwLock::new(vec![None; MAX_MATCHES])),
        }
    }
}

impl Matches {
    /// Insert into the first free row, assigning the match its id.
    /// Fails when all 64 rows are taken.
    pub async fn append(&self, mut m: Match) -> Option<Arc<Mutex<Match>>> {
        let mut table = self.table.write().await;
        let free = table.iter().position(|row| row.is_none())?;
        m.id = free as u16;
        let entry = Arc::new(Mutex::new(m));
        table[free] = Some(entry.clone());
        Some(entry)
    }

    pub async fn get(&self, id: u16) -> Option<Arc<Mutex<Match>>> {
        self.table.read().await.get(id as usize)?.clone()
    }

    pub async fn remove(&self, id: u16) {
        if let Some(row) = self.table.write().await.get_mut(id as usize) {
            *row = None;
        }
    }

    pub async fn all(&self) -> Vec<Arc<Mutex<Match>>> {
        self.table.read().await.iter().flatten().cloned().collect()
    }
}
