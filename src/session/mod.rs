use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use bancho::{Action, Mods, PresenceFilter};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};

use crate::backend::{Beatmap, Geolocation, ModeStats, Privileges, User};

/// The client fingerprint submitted at login.
#[derive(Debug, Clone)]
pub struct ClientDetails {
    pub osu_version: String,
    pub osu_path_md5: String,
    pub adapters_md5: String,
    pub uninstall_md5: String,
    pub disk_signature_md5: String,
    pub adapters: Vec<String>,
    pub ip: IpAddr,
}

/// What the client last told us it is doing.
#[derive(Debug, Clone)]
pub struct Status {
    pub action: Action,
    pub info_text: String,
    pub map_md5: String,
    pub mods: Mods,
    /// Game mode 0-7; relax/autopilot are folded in as +4/+8.
    pub mode: u8,
    pub map_id: i32,
}

impl Default for Status {
    fn default() -> Status {
        Status {
            action: Action::Idle,
            info_text: String::new(),
            map_md5: String::new(),
            mods: Mods::empty(),
            mode: 0,
            map_id: 0,
        }
    }
}

impl Status {
    /// The mode as the wire knows it (0-3).
    pub fn mode_vanilla(&self) -> u8 {
        self.mode % 4
    }
}

/// A /np parsed out of chat, kept around for contextual commands.
#[derive(Debug, Clone)]
pub struct LastNp {
    pub map: Beatmap,
    pub mode_vn: u8,
    /// Unix timestamp after which this context is stale.
    pub timeout: i64,
}

/// The mutable, per-login portion of a session.
///
/// Guarded by one mutex per session; the outbound queue has its own so
/// fan-out never contends with handler state.
#[derive(Debug)]
pub struct SessionState {
    pub status: Status,
    pub friends: Vec<i32>,
    pub blocks: Vec<i32>,
    pub stats: Vec<ModeStats>,
    pub geoloc: Geolocation,
    pub utc_offset: i8,
    pub pm_private: bool,
    pub away_msg: Option<String>,
    pub silence_end: i64,
    pub presence_filter: PresenceFilter,
    /// Id of the session this one is watching.
    pub spectating: Option<i32>,
    /// Ids of the sessions watching this one.
    pub spectators: Vec<i32>,
    /// Slot in the match table, if any.
    pub match_id: Option<u16>,
    pub in_lobby: bool,
    pub last_np: Option<LastNp>,
    /// Suppress spectator join/leave notifications.
    pub stealth: bool,
    pub current_menu: i32,
}

/// The in-chat menu every session starts on.
pub const MAIN_MENU: i32 = 1;

/// A logged-in client (or the bot). Owned exclusively by the session
/// registry; everything else refers to it by id or token.
pub struct Session {
    pub id: i32,
    pub name: String,
    pub safe_name: String,
    pub token: String,
    pub login_time: DateTime<Utc>,
    pub tourney_client: bool,
    pub is_bot: bool,
    /// `None` only for the bot.
    pub client: Option<ClientDetails>,

    privileges: AtomicI32,
    last_recv_time: AtomicI64,
    queue: Mutex<Vec<u8>>,
    pub state: Mutex<SessionState>,
}

/// Lowercased, underscored form used for case-insensitive lookups.
pub fn make_safe(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

impl Session {
    pub fn new(user: &User, token: String, client: Option<ClientDetails>) -> Session {
        let mut stats = user.stats.clone();
        stats.resize(8, ModeStats::default());

        Session {
            id: user.id,
            safe_name: make_safe(&user.name),
            name: user.name.clone(),
            token,
            login_time: Utc::now(),
            tourney_client: false,
            is_bot: false,
            client,
            privileges: AtomicI32::new(user.privileges.bits()),
            last_recv_time: AtomicI64::new(Utc::now().timestamp()),
            queue: Mutex::new(Vec::new()),
            state: Mutex::new(SessionState {
                status: Status::default(),
                friends: user.friends.clone(),
                blocks: user.blocks.clone(),
                stats,
                geoloc: Geolocation::default(),
                utc_offset: 0,
                pm_private: false,
                away_msg: None,
                silence_end: user.silence_end,
                presence_filter: PresenceFilter::None,
                spectating: None,
                spectators: Vec::new(),
                match_id: None,
                in_lobby: false,
                last_np: None,
                stealth: false,
                current_menu: MAIN_MENU,
            }),
        }
    }

    pub fn privileges(&self) -> Privileges {
        Privileges::from_bits_truncate(self.privileges.load(Ordering::Relaxed))
    }

    pub fn set_privileges(&self, privileges: Privileges) {
        self.privileges.store(privileges.bits(), Ordering::Relaxed);
    }

    pub fn restricted(&self) -> bool {
        !self.privileges().contains(Privileges::UNRESTRICTED)
    }

    pub fn is_staff(&self) -> bool {
        self.privileges().intersects(Privileges::STAFF)
    }

    pub fn last_recv_time(&self) -> i64 {
        self.last_recv_time.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_recv_time
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Overwrite the last-received timestamp; the ghost-eviction and
    /// idle-reaping checks compare against it.
    pub fn set_last_recv_time(&self, timestamp: i64) {
        self.last_recv_time.store(timestamp, Ordering::Relaxed);
    }

    /// Append bytes to the outbound queue; they leave with the next
    /// response to this session. The bot has no client polling it, so
    /// nothing is kept for it.
    pub async fn enqueue(&self, bytes: &[u8]) {
        if self.is_bot {
            return;
        }
        self.queue.lock().await.extend_from_slice(bytes);
    }

    /// Drain the outbound queue.
    pub async fn dequeue(&self) -> Vec<u8> {
        std::mem::take(&mut *self.queue.lock().await)
    }

    /// Seconds of silence left, zero if not silenced.
    pub fn remaining_silence(silence_end: i64) -> i64 {
        (silence_end - Utc::now().timestamp()).max(0)
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

impl SessionState {
    pub fn silenced(&self) -> bool {
        self.silence_end > Utc::now().timestamp()
    }
}

#[derive(Default)]
struct RegistryState {
    /// Sessions by token, in login order (the bot is first).
    by_token: IndexMap<String, Arc<Session>>,
    id_to_token: HashMap<i32, String>,
    name_to_token: HashMap<String, String>,
}

/// The index of logged-in sessions (component that owns them; all other
/// references go through a lookup here).
#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<RwLock<RegistryState>>,
}

impl Registry {
    /// At most one session per user id; the login pipeline enforces
    /// the ghosting policy before appending a second one.
    pub async fn append(&self, session: Arc<Session>) {
        let mut state = self.state.write().await;
        state.id_to_token.insert(session.id, session.token.clone());
        state
            .name_to_token
            .insert(session.safe_name.clone(), session.token.clone());
        state.by_token.insert(session.token.clone(), session);
    }

    pub async fn remove(&self, session: &Session) {
        let mut state = self.state.write().await;
        // Only drop the id/name indexes if they still point at this
        // session; a newer login may have overwritten them.
        if state.id_to_token.get(&session.id) == Some(&session.token) {
            state.id_to_token.remove(&session.id);
        }
        if state.name_to_token.get(&session.safe_name) == Some(&session.token) {
            state.name_to_token.remove(&session.safe_name);
        }
        state.by_token.shift_remove(&session.token);
    }

    pub async fn get_by_token(&self, token: &str) -> Option<Arc<Session>> {
        self.state.read().await.by_token.get(token).cloned()
    }

    pub async fn get_by_id(&self, id: i32) -> Option<Arc<Session>> {
        let state = self.state.read().await;
        let token = state.id_to_token.get(&id)?;
        state.by_token.get(token).cloned()
    }

    /// Case-insensitive name lookup.
    pub async fn get_by_name(&self, name: &str) -> Option<Arc<Session>> {
        let state = self.state.read().await;
        let token = state.name_to_token.get(&make_safe(name))?;
        state.by_token.get(token).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.state.read().await.by_token.values().cloned().collect()
    }

    pub async fn unrestricted(&self) -> Vec<Arc<Session>> {
        self.state
            .read()
            .await
            .by_token
            .values()
            .filter(|s| !s.restricted())
            .cloned()
            .collect()
    }

    pub async fn staff(&self) -> Vec<Arc<Session>> {
        self.state
            .read()
            .await
            .by_token
            .values()
            .filter(|s| s.is_staff())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.by_token.len()
    }

    /// Fan a packet out to every online session.
    pub async fn enqueue_all(&self, bytes: &[u8]) {
        for session in self.all().await {
            session.enqueue(bytes).await;
        }
    }
}
