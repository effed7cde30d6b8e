use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::backend::{ChannelRow, ChannelStore, Privileges, Result};
use crate::session::Session;

/// A chat channel. Durable channels come from the channel store;
/// instanced ones (`#spec_<id>`, `#multi_<id>`) exist only in memory
/// and die with their parent.
pub struct Channel {
    pub name: String,
    pub topic: String,
    pub read_priv: Privileges,
    pub write_priv: Privileges,
    pub auto_join: bool,
    pub instance: bool,
    /// Session ids of current members.
    players: RwLock<Vec<i32>>,
}

impl Channel {
    fn from_row(row: ChannelRow) -> Channel {
        Channel {
            name: row.name,
            topic: row.topic,
            read_priv: row.read_priv,
            write_priv: row.write_priv,
            auto_join: row.auto_join,
            instance: false,
            players: RwLock::new(Vec::new()),
        }
    }

    pub fn can_read(&self, privileges: Privileges) -> bool {
        self.read_priv.is_empty() || privileges.intersects(self.read_priv)
    }

    pub fn can_write(&self, privileges: Privileges) -> bool {
        self.write_priv.is_empty() || privileges.intersects(self.write_priv)
    }

    pub async fn contains(&self, session_id: i32) -> bool {
        self.players.read().await.contains(&session_id)
    }

    pub async fn num_players(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn player_ids(&self) -> Vec<i32> {
        self.players.read().await.clone()
    }

    pub async fn add_player(&self, session_id: i32) {
        let mut players = self.players.write().await;
        if !players.contains(&session_id) {
            players.push(session_id);
        }
    }

    pub async fn remove_player(&self, session_id: i32) {
        self.players.write().await.retain(|id| *id != session_id);
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// In-memory channel cache over the durable store.
#[derive(Clone)]
pub struct Registry {
    cache: Arc<RwLock<IndexMap<String, Arc<Channel>>>>,
    store: Arc<dyn ChannelStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn ChannelStore>) -> Registry {
        Registry {
            cache: Arc::new(RwLock::new(IndexMap::new())),
            store,
        }
    }

    /// Pull every durable channel into the cache; called at startup.
    pub async fn populate(&self) -> Result<()> {
        let rows = self.store.fetch_all().await?;
        let mut cache = self.cache.write().await;
        for row in rows {
            let channel = Arc::new(Channel::from_row(row));
            cache.insert(channel.name.clone(), channel);
        }
        Ok(())
    }

    /// Fetch from cache, falling back to the durable store.
    pub async fn fetch(&self, name: &str) -> Option<Arc<Channel>> {
        if let Some(channel) = self.cache.read().await.get(name).cloned() {
            return Some(channel);
        }

        match self.store.fetch(name).await {
            Ok(Some(row)) => {
                let channel = Arc::new(Channel::from_row(row));
                self.cache
                    .write()
                    .await
                    .insert(channel.name.clone(), channel.clone());
                Some(channel)
            }
            Ok(None) => None,
            Err(err) => {
                log::warn!("channel store lookup for {} failed: {}", name, err);
                None
            }
        }
    }

    /// Create a channel; durable ones are also persisted.
    pub async fn create(
        &self,
        name: &str,
        topic: &str,
        read_priv: Privileges,
        write_priv: Privileges,
        auto_join: bool,
        instance: bool,
    ) -> Result<Arc<Channel>> {
        if !instance {
            self.store
                .insert(&ChannelRow {
                    name: name.to_string(),
                    topic: topic.to_string(),
                    read_priv,
                    write_priv,
                    auto_join,
                })
                .await?;
        }

        let channel = Arc::new(Channel {
            name: name.to_string(),
            topic: topic.to_string(),
            read_priv,
            write_priv,
            auto_join,
            instance,
            players: RwLock::new(Vec::new()),
        });
        self.cache
            .write()
            .await
            .insert(channel.name.clone(), channel.clone());
        Ok(channel)
    }

    /// Remove a channel from the cache, and from the store if durable.
    pub async fn delete(&self, name: &str) {
        let removed = self.cache.write().await.shift_remove(name);
        match removed {
            Some(channel) if !channel.instance => {
                if let Err(err) = self.store.delete(name).await {
                    log::warn!("failed to delete channel {} from store: {}", name, err);
                }
            }
            Some(_) => {}
            None => log::warn!("tried to delete unknown channel {}", name),
        }
    }

    pub async fn all(&self) -> Vec<Arc<Channel>> {
        self.cache.read().await.values().cloned().collect()
    }
}

/// Resolve client-facing aliases to the real per-session channel.
///
/// `#spectator` maps to the spectator channel of whoever the session
/// watches (or its own, if it is being watched); `#multiplayer` maps to
/// the session's match chat. `None` when the context is absent.
pub async fn resolve_contextual(
    registry: &Registry,
    session: &Session,
    name: &str,
) -> Option<Arc<Channel>> {
    match name {
        "#spectator" => {
            let state = session.state.lock().await;
            let spec_id = if let Some(host_id) = state.spectating {
                host_id
            } else if !state.spectators.is_empty() {
                session.id
            } else {
                return None;
            };
            drop(state);
            registry.fetch(&format!("#spec_{}", spec_id)).await
        }
        "#multiplayer" => {
            let match_id = session.state.lock().await.match_id?;
            registry.fetch(&format!("#multi_{}", match_id)).await
        }
        _ => registry.fetch(name).await,
    }
}
