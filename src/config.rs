use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Protocol version announced to clients at login.
pub const PROTOCOL_VERSION: i32 = 19;

/// Clients whose build date is older than this are refused.
pub const MAX_CLIENT_AGE_DAYS: i64 = 90;

/// A second login for the same account evicts the first one if it has
/// been silent for longer than this.
pub const GHOST_EVICTION_SECS: i64 = 10;

/// How long a parsed /np stays usable for contextual commands.
pub const LAST_NP_LIFETIME_SECS: i64 = 300;

/// How long the scrimmage point task waits for score submissions.
pub const SUBMISSION_TIMEOUT_SECS: u64 = 10;

/// Chat messages longer than this are truncated.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Server config.
#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    /// The address the HTTP front door binds to, f.e. "0.0.0.0:8080".
    pub bind_address: String,

    /// The domain this server is reachable under; used in chat links
    /// and to recognize our own beatmap URLs in /np messages.
    pub domain: String,

    /// User id of the server-side bot. The bot holds a permanent
    /// session and fronts command responses and announcements.
    pub bot_id: i32,

    /// Display name of the server-side bot.
    pub bot_name: String,

    /// Messages starting with this prefix are routed to the command
    /// processor, f.e. "!".
    pub command_prefix: String,

    /// Icon shown on the client's main menu, and the URL it opens.
    pub menu_icon_url: String,
    pub menu_onclick_url: String,

    /// Beatmap mirror that /preview requests are redirected to.
    pub mirror_url: String,

    /// Sessions that have not spoken for this long are reaped by the
    /// housekeeping task.
    pub idle_timeout_secs: u64,
}

impl Config {
    /// Read the config file listed in the `CHO_CONFIG` environment variable.
    ///
    /// # Panics
    /// - when `CHO_CONFIG` is not set
    /// - when `CHO_CONFIG` does not point to a valid TOML file
    /// - when the file cannot be parsed
    pub fn load() -> Config {
        let f = Self::path().unwrap_or_else(|| {
            panic!("cannot locate config: use the '{}' env var", CONFIG_ENV_VAR)
        });
        let f_str = std::fs::read_to_string(f).expect("failed to read config file");
        let cfg: Config = toml::from_str(&f_str).expect("failed to parse config file");
        cfg
    }

    fn path() -> Option<PathBuf> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(f) => Some(PathBuf::from(f)).filter(|p| p.is_file()),
            Err(_) => None,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            bind_address: "127.0.0.1:8080".to_string(),
            domain: "example.com".to_string(),
            bot_id: 1,
            bot_name: "Aoba".to_string(),
            command_prefix: "!".to_string(),
            menu_icon_url: String::new(),
            menu_onclick_url: String::new(),
            mirror_url: "https://catboy.best".to_string(),
            idle_timeout_secs: 180,
        }
    }
}

const CONFIG_ENV_VAR: &str = "CHO_CONFIG";
