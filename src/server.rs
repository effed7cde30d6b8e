use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use tokio::sync::Mutex;

use crate::backend::{Backend, ModeStats, Privileges, User};
use crate::channel;
use crate::config::Config;
use crate::multiplayer::Matches;
use crate::session::{self, Session};

/// The one value owning all shared state: session, channel and match
/// registries, the backend handles, and the config. Cloning is cheap;
/// handlers receive a clone per request.
#[derive(Clone)]
pub struct Server {
    pub config: Arc<Config>,
    pub backend: Backend,
    pub sessions: session::Registry,
    pub channels: channel::Registry,
    pub matches: Matches,
    /// Recognizes /np action messages for this server's domain.
    pub np_regex: Arc<Regex>,
    /// Memoizes successful (password md5 → bcrypt hash) verifications
    /// so repeat logins skip the expensive check.
    credential_cache: Arc<Mutex<HashMap<String, String>>>,
}

impl Server {
    /// Wire up the registries, load durable channels, and seat the bot.
    pub async fn init(config: Config, backend: Backend) -> Result<Server> {
        let np_regex = Regex::new(&format!(
            r"^\x01ACTION is (?:playing|editing|watching|listening to) \[https://osu\.(?:{}|ppy\.sh)/beatmapsets/(?P<sid>\d{{1,10}})#/?(?:osu|taiko|fruits|mania)?/(?P<bid>\d{{1,10}})/? .+\](?: <(?P<mode_vn>Taiko|CatchTheBeat|osu!mania)>)?(?P<mods>(?: (?:-|\+|~|\|)\w+(?:~|\|)?)+)?\x01$",
            regex::escape(&config.domain),
        ))?;

        let server = Server {
            backend: backend.clone(),
            sessions: session::Registry::default(),
            channels: channel::Registry::new(backend.channels.clone()),
            matches: Matches::default(),
            np_regex: Arc::new(np_regex),
            credential_cache: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        };

        server.channels.populate().await?;

        // The bot is an ordinary session that never logs out.
        let bot_user = User {
            id: server.config.bot_id,
            name: server.config.bot_name.clone(),
            privileges: Privileges::all(),
            pw_bcrypt: String::new(),
            country: String::new(),
            silence_end: 0,
            friends: Vec::new(),
            blocks: Vec::new(),
            stats: vec![ModeStats::default(); 8],
        };
        let mut bot = Session::new(&bot_user, format!("bot-{}", server.config.bot_id), None);
        bot.is_bot = true;
        server.sessions.append(Arc::new(bot)).await;

        Ok(server)
    }

    pub async fn bot(&self) -> Option<Arc<Session>> {
        self.sessions.get_by_id(self.config.bot_id).await
    }

    /// Verify credentials, memoizing positive results per process.
    pub async fn check_credentials(&self, password_md5: &str, pw_bcrypt: &str) -> Result<bool> {
        {
            let cache = self.credential_cache.lock().await;
            if let Some(known) = cache.get(password_md5) {
                return Ok(known == pw_bcrypt);
            }
        }

        let ok = self
            .backend
            .users
            .validate_credentials(password_md5, pw_bcrypt)
            .await?;
        if ok {
            self.credential_cache
                .lock()
                .await
                .insert(password_md5.to_string(), pw_bcrypt.to_string());
        }
        Ok(ok)
    }
}
