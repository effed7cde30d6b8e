pub use memory::MemoryBackend;

mod memory;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;

pub type Result<T> = anyhow::Result<T>;

bitflags! {
    /// Server-side privileges, as stored with the account.
    ///
    /// Not to be confused with [`bancho::ClientPrivileges`], the
    /// reduced set the client understands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Privileges: i32 {
        /// The account is not restricted.
        const UNRESTRICTED = 1 << 0;
        /// The account has logged in at least once.
        const VERIFIED = 1 << 1;
        const WHITELISTED = 1 << 2;
        const SUPPORTER = 1 << 4;
        const PREMIUM = 1 << 5;
        const ALUMNI = 1 << 7;
        const TOURNEY_MANAGER = 1 << 10;
        const NOMINATOR = 1 << 13;
        const MODERATOR = 1 << 14;
        const ADMINISTRATOR = 1 << 16;
        const DEVELOPER = 1 << 18;
    }
}

impl Privileges {
    pub const DONATOR: Privileges = Privileges::SUPPORTER.union(Privileges::PREMIUM);
    pub const STAFF: Privileges = Privileges::MODERATOR
        .union(Privileges::ADMINISTRATOR)
        .union(Privileges::DEVELOPER);

    /// The subset of privileges the client is told about.
    pub fn to_client(self) -> bancho::ClientPrivileges {
        use bancho::ClientPrivileges as Client;

        let mut client = Client::empty();
        if self.contains(Privileges::UNRESTRICTED) {
            client |= Client::PLAYER;
        }
        if self.intersects(Privileges::DONATOR) {
            client |= Client::SUPPORTER;
        }
        if self.contains(Privileges::MODERATOR) {
            client |= Client::MODERATOR;
        }
        if self.contains(Privileges::ADMINISTRATOR) {
            client |= Client::DEVELOPER;
        }
        if self.contains(Privileges::DEVELOPER) {
            client |= Client::OWNER;
        }
        client
    }
}

/// An account row, as the user store hands it out.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub privileges: Privileges,
    pub pw_bcrypt: String,
    pub country: String,
    pub silence_end: i64,
    pub friends: Vec<i32>,
    pub blocks: Vec<i32>,
    /// Per-mode statistics, keyed by game mode (0-7).
    pub stats: Vec<ModeStats>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModeStats {
    pub ranked_score: i64,
    pub total_score: i64,
    pub accuracy: f32,
    pub plays: i32,
    pub global_rank: i32,
    pub pp: i16,
}

/// Client hardware identifiers recorded at login.
#[derive(Debug, Clone)]
pub struct ClientHashes {
    pub osu_path_md5: String,
    pub adapters_md5: String,
    pub uninstall_md5: String,
    pub disk_signature_md5: String,
}

/// Another account seen with overlapping hardware identifiers.
#[derive(Debug, Clone)]
pub struct HardwareMatch {
    pub user_name: String,
    pub privileges: Privileges,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn fetch_by_name(&self, safe_name: &str) -> Result<Option<User>>;

    async fn fetch_by_id(&self, user_id: i32) -> Result<Option<User>>;

    /// Verify an md5-hashed password against the stored bcrypt hash.
    /// This is the expensive call the login pipeline memoizes.
    async fn validate_credentials(&self, password_md5: &str, pw_bcrypt: &str) -> Result<bool>;

    async fn add_privileges(&self, user_id: i32, privileges: Privileges) -> Result<()>;

    async fn record_login(&self, user_id: i32, ip: IpAddr, osu_version: &str) -> Result<()>;

    async fn upsert_client_hashes(&self, user_id: i32, hashes: &ClientHashes) -> Result<()>;

    /// Other accounts sharing any of the given hardware identifiers.
    /// Under wine only the uninstall id is meaningful.
    async fn hardware_matches(
        &self,
        user_id: i32,
        hashes: &ClientHashes,
        running_under_wine: bool,
    ) -> Result<Vec<HardwareMatch>>;

    async fn update_latest_activity(&self, user_id: i32) -> Result<()>;

    async fn add_friend(&self, user_id: i32, friend_id: i32) -> Result<()>;

    async fn remove_friend(&self, user_id: i32, friend_id: i32) -> Result<()>;
}

/// A durable channel row; instanced channels never reach this store.
#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub name: String,
    pub topic: String,
    pub read_priv: Privileges,
    pub write_priv: Privileges,
    pub auto_join: bool,
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Option<ChannelRow>>;

    async fn fetch_all(&self) -> Result<Vec<ChannelRow>>;

    async fn insert(&self, row: &ChannelRow) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Beatmap {
    pub id: i32,
    pub set_id: i32,
    pub md5: String,
    pub full_name: String,
    pub mode: u8,
}

impl Beatmap {
    /// The osu! chat embed for this map.
    pub fn embed(&self) -> String {
        format!("[https://osu.ppy.sh/b/{} {}]", self.id, self.full_name)
    }
}

#[async_trait]
pub trait BeatmapRepository: Send + Sync {
    async fn fetch_by_id(&self, map_id: i32) -> Result<Option<Beatmap>>;

    async fn fetch_by_md5(&self, md5: &str) -> Result<Option<Beatmap>>;
}

#[derive(Debug, Clone)]
pub struct Mail {
    pub from_id: i32,
    pub from_name: String,
    pub to_name: String,
    pub msg: String,
    pub sent_at: i64,
}

#[async_trait]
pub trait MailStore: Send + Sync {
    async fn fetch_unread(&self, user_id: i32) -> Result<Vec<Mail>>;

    async fn send(&self, source_id: i32, target_id: i32, msg: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Geolocation {
    pub country_acronym: String,
    /// Client-facing numeric country code.
    pub country_code: u8,
    pub latitude: f32,
    pub longitude: f32,
}

impl Default for Geolocation {
    fn default() -> Geolocation {
        Geolocation {
            country_acronym: "XX".to_string(),
            country_code: 0,
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

#[async_trait]
pub trait GeolocationService: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<Geolocation>>;
}

/// What the command processor hands back for a `!command` message.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub resp: Option<String>,
    /// Hidden responses are only shown to the sender and staff.
    pub hidden: bool,
}

#[async_trait]
pub trait CommandProcessor: Send + Sync {
    /// Process a message that started with the command prefix.
    /// `None` means the message was not a command after all.
    async fn process_commands(
        &self,
        sender_id: i32,
        target: &str,
        msg: &str,
    ) -> Result<Option<CommandResponse>>;
}

#[async_trait]
pub trait MenuService: Send + Sync {
    /// Execute a menu option id smuggled through a JOIN_MATCH packet.
    /// Returns a message for the bot to send back, if any.
    async fn execute_option(&self, user_id: i32, menu: i32, option_id: i32)
        -> Result<Option<String>>;
}

#[async_trait]
pub trait PerformanceCalculator: Send + Sync {
    /// pp values for the given accuracies on a map.
    async fn calculate(&self, map_id: i32, mode: u8, mods: u32, accs: &[f32]) -> Result<Vec<f32>>;
}

/// A score as the external submission pipeline recorded it.
#[derive(Debug, Clone, Copy)]
pub struct SubmittedScore {
    pub score: i64,
    pub accuracy: f32,
    pub max_combo: i32,
    pub pp: f32,
}

#[async_trait]
pub trait ScoreSubmissions: Send + Sync {
    /// The score a player submitted for the given map since `after`,
    /// or `None` if nothing has arrived yet.
    async fn recent_submission(
        &self,
        user_id: i32,
        map_md5: &str,
        after: i64,
    ) -> Result<Option<SubmittedScore>>;
}

/// Handles on every external collaborator the core consumes.
#[derive(Clone)]
pub struct Backend {
    pub users: Arc<dyn UserRepository>,
    pub channels: Arc<dyn ChannelStore>,
    pub beatmaps: Arc<dyn BeatmapRepository>,
    pub mail: Arc<dyn MailStore>,
    pub geolocation: Arc<dyn GeolocationService>,
    pub commands: Arc<dyn CommandProcessor>,
    pub menus: Arc<dyn MenuService>,
    pub performance: Arc<dyn PerformanceCalculator>,
    pub scores: Arc<dyn ScoreSubmissions>,
}

impl Backend {
    /// A backend that lives entirely in memory; serves offline mode
    /// and the integration tests.
    pub fn in_memory() -> (Backend, Arc<MemoryBackend>) {
        let memory = Arc::new(MemoryBackend::default().with_default_channels());
        let backend = Backend {
            users: memory.clone(),
            channels: memory.clone(),
            beatmaps: memory.clone(),
            mail: memory.clone(),
            geolocation: memory.clone(),
            commands: memory.clone(),
            menus: memory.clone(),
            performance: memory.clone(),
            scores: memory.clone(),
        };
        (backend, memory)
    }
}
