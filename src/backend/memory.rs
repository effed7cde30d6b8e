use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;

use super::*;

/// In-memory stand-in for every external collaborator.
///
/// Backs offline mode and the integration tests. Credential checks
/// compare against the stored "hash" directly; there is no real bcrypt
/// behind it.
#[derive(Default)]
pub struct MemoryBackend {
    pub state: Mutex<MemoryState>,
}

#[derive(Default)]
pub struct MemoryState {
    pub users: Vec<User>,
    pub channels: Vec<ChannelRow>,
    pub beatmaps: Vec<Beatmap>,
    pub mail: Vec<(i32, Mail)>,
    pub geolocations: HashMap<IpAddr, Geolocation>,
    pub client_hashes: Vec<(i32, ClientHashes)>,
    pub submissions: Vec<(i32, String, SubmittedScore)>,
    /// How often each credential pair was actually verified; lets
    /// tests observe the login pipeline's memo cache.
    pub credential_checks: u32,
}

impl MemoryBackend {
    pub fn add_user(&self, user: User) {
        self.state.lock().unwrap().users.push(user);
    }

    pub fn add_channel(&self, row: ChannelRow) {
        self.state.lock().unwrap().channels.push(row);
    }

    pub fn add_beatmap(&self, map: Beatmap) {
        self.state.lock().unwrap().beatmaps.push(map);
    }

    pub fn add_submission(&self, user_id: i32, map_md5: &str, score: SubmittedScore) {
        self.state
            .lock()
            .unwrap()
            .submissions
            .push((user_id, map_md5.to_string(), score));
    }

    /// The default durable channels of a fresh server.
    pub fn with_default_channels(self) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.channels = vec![
                ChannelRow {
                    name: "#osu".to_string(),
                    topic: "General discussion.".to_string(),
                    read_priv: Privileges::UNRESTRICTED,
                    write_priv: Privileges::UNRESTRICTED,
                    auto_join: true,
                },
                ChannelRow {
                    name: "#announce".to_string(),
                    topic: "Exemplary performance and public announcements.".to_string(),
                    read_priv: Privileges::UNRESTRICTED,
                    write_priv: Privileges::STAFF,
                    auto_join: true,
                },
                ChannelRow {
                    name: "#lobby".to_string(),
                    topic: "Multiplayer lobby discussion.".to_string(),
                    read_priv: Privileges::UNRESTRICTED,
                    write_priv: Privileges::UNRESTRICTED,
                    auto_join: false,
                },
                ChannelRow {
                    name: "#staff".to_string(),
                    topic: "Behind the scenes.".to_string(),
                    read_priv: Privileges::STAFF,
                    write_priv: Privileges::STAFF,
                    auto_join: false,
                },
            ];
        }
        self
    }
}

#[async_trait]
impl UserRepository for MemoryBackend {
    async fn fetch_by_name(&self, safe_name: &str) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|u| u.name.to_lowercase().replace(' ', "_") == safe_name)
            .cloned())
    }

    async fn fetch_by_id(&self, user_id: i32) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn validate_credentials(&self, password_md5: &str, pw_bcrypt: &str) -> Result<bool> {
        self.state.lock().unwrap().credential_checks += 1;
        Ok(password_md5 == pw_bcrypt)
    }

    async fn add_privileges(&self, user_id: i32, privileges: Privileges) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.privileges |= privileges;
        }
        Ok(())
    }

    async fn record_login(&self, _user_id: i32, _ip: IpAddr, _osu_version: &str) -> Result<()> {
        Ok(())
    }

    async fn upsert_client_hashes(&self, user_id: i32, hashes: &ClientHashes) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.client_hashes.retain(|(id, _)| *id != user_id);
        state.client_hashes.push((user_id, hashes.clone()));
        Ok(())
    }

    async fn hardware_matches(
        &self,
        user_id: i32,
        hashes: &ClientHashes,
        running_under_wine: bool,
    ) -> Result<Vec<HardwareMatch>> {
        let state = self.state.lock().unwrap();
        let mut matches = Vec::new();
        for (other_id, other) in &state.client_hashes {
            if *other_id == user_id {
                continue;
            }
            let hit = if running_under_wine {
                other.uninstall_md5 == hashes.uninstall_md5
            } else {
                other.adapters_md5 == hashes.adapters_md5
                    || other.uninstall_md5 == hashes.uninstall_md5
                    || other.disk_signature_md5 == hashes.disk_signature_md5
            };
            if hit {
                if let Some(user) = state.users.iter().find(|u| u.id == *other_id) {
                    matches.push(HardwareMatch {
                        user_name: user.name.clone(),
                        privileges: user.privileges,
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn update_latest_activity(&self, _user_id: i32) -> Result<()> {
        Ok(())
    }

    async fn add_friend(&self, user_id: i32, friend_id: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            if !user.friends.contains(&friend_id) {
                user.friends.push(friend_id);
            }
        }
        Ok(())
    }

    async fn remove_friend(&self, user_id: i32, friend_id: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.friends.retain(|id| *id != friend_id);
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for MemoryBackend {
    async fn fetch(&self, name: &str) -> Result<Option<ChannelRow>> {
        let state = self.state.lock().unwrap();
        Ok(state.channels.iter().find(|c| c.name == name).cloned())
    }

    async fn fetch_all(&self) -> Result<Vec<ChannelRow>> {
        Ok(self.state.lock().unwrap().channels.clone())
    }

    async fn insert(&self, row: &ChannelRow) -> Result<()> {
        self.state.lock().unwrap().channels.push(row.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().channels.retain(|c| c.name != name);
        Ok(())
    }
}

#[async_trait]
impl BeatmapRepository for MemoryBackend {
    async fn fetch_by_id(&self, map_id: i32) -> Result<Option<Beatmap>> {
        let state = self.state.lock().unwrap();
        Ok(state.beatmaps.iter().find(|b| b.id == map_id).cloned())
    }

    async fn fetch_by_md5(&self, md5: &str) -> Result<Option<Beatmap>> {
        let state = self.state.lock().unwrap();
        Ok(state.beatmaps.iter().find(|b| b.md5 == md5).cloned())
    }
}

#[async_trait]
impl MailStore for MemoryBackend {
    async fn fetch_unread(&self, user_id: i32) -> Result<Vec<Mail>> {
        let mut state = self.state.lock().unwrap();
        let unread = state
            .mail
            .iter()
            .filter(|(to, _)| *to == user_id)
            .map(|(_, m)| m.clone())
            .collect();
        state.mail.retain(|(to, _)| *to != user_id);
        Ok(unread)
    }

    async fn send(&self, source_id: i32, target_id: i32, msg: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let from_name = state
            .users
            .iter()
            .find(|u| u.id == source_id)
            .map(|u| u.name.clone())
            .unwrap_or_default();
        let to_name = state
            .users
            .iter()
            .find(|u| u.id == target_id)
            .map(|u| u.name.clone())
            .unwrap_or_default();
        state.mail.push((
            target_id,
            Mail {
                from_id: source_id,
                from_name,
                to_name,
                msg: msg.to_string(),
                sent_at: chrono::Utc::now().timestamp(),
            },
        ));
        Ok(())
    }
}

#[async_trait]
impl GeolocationService for MemoryBackend {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<Geolocation>> {
        let state = self.state.lock().unwrap();
        Ok(state.geolocations.get(&ip).cloned())
    }
}

#[async_trait]
impl CommandProcessor for MemoryBackend {
    async fn process_commands(
        &self,
        _sender_id: i32,
        _target: &str,
        _msg: &str,
    ) -> Result<Option<CommandResponse>> {
        Ok(None)
    }
}

#[async_trait]
impl MenuService for MemoryBackend {
    async fn execute_option(
        &self,
        _user_id: i32,
        _menu: i32,
        _option_id: i32,
    ) -> Result<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
impl PerformanceCalculator for MemoryBackend {
    async fn calculate(
        &self,
        _map_id: i32,
        _mode: u8,
        _mods: u32,
        accs: &[f32],
    ) -> Result<Vec<f32>> {
        Ok(vec![0.0; accs.len()])
    }
}

#[async_trait]
impl ScoreSubmissions for MemoryBackend {
    async fn recent_submission(
        &self,
        user_id: i32,
        map_md5: &str,
        _after: i64,
    ) -> Result<Option<SubmittedScore>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .submissions
            .iter()
            .find(|(id, md5, _)| *id == user_id && md5 == map_md5)
            .map(|(_, _, score)| *score))
    }
}
