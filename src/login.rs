//! The login pipeline: parse, validate, bootstrap, attach — and its
//! inverse, the full logout path.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use bancho::{packets, Message};
use chrono::{Duration, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::backend::Privileges;
use crate::chat;
use crate::config::{GHOST_EVICTION_SECS, MAX_CLIENT_AGE_DAYS, PROTOCOL_VERSION};
use crate::multiplayer::actions as multiplayer;
use crate::presence;
use crate::server::Server;
use crate::session::{make_safe, ClientDetails, Session};
use crate::spectator;

lazy_static! {
    static ref OSU_VERSION: Regex = Regex::new(
        r"^b(?P<date>\d{8})(?:\.(?P<revision>\d+))?(?P<stream>beta|cuttingedge|dev|tourney)?$"
    )
    .unwrap();
}

/// How a login attempt resolved. The token string travels back in the
/// `cho-token` response header either way; failures use well-known
/// diagnostic strings.
pub enum LoginOutcome {
    Success { token: String, body: Vec<u8> },
    Fail { token: &'static str, body: Vec<u8> },
}

impl LoginOutcome {
    pub fn token(&self) -> &str {
        match self {
            LoginOutcome::Success { token, .. } => token,
            LoginOutcome::Fail { token, .. } => token,
        }
    }

    pub fn into_body(self) -> Vec<u8> {
        match self {
            LoginOutcome::Success { body, .. } => body,
            LoginOutcome::Fail { body, .. } => body,
        }
    }
}

fn fail(token: &'static str, body: Vec<u8>) -> LoginOutcome {
    LoginOutcome::Fail { token, body }
}

struct LoginData {
    username: String,
    password_md5: String,
    osu_version: String,
    utc_offset: i8,
    pm_private: bool,
    osu_path_md5: String,
    adapters_str: String,
    adapters_md5: String,
    uninstall_md5: String,
    disk_signature_md5: String,
}

/// Body format:
/// `username\npassword_md5\nosu_version|utc_offset|display_city|client_hashes|pm_private\n`
/// where `client_hashes` is five colon-terminated md5s.
fn parse_login_data(body: &[u8]) -> Option<LoginData> {
    let text = std::str::from_utf8(body).ok()?;
    let mut lines = text.splitn(3, '\n');
    let username = lines.next()?;
    let password_md5 = lines.next()?;
    let remainder = lines.next()?.trim_end_matches('\n');

    let mut fields = remainder.splitn(5, '|');
    let osu_version = fields.next()?;
    let utc_offset = fields.next()?.parse().ok()?;
    let _display_city = fields.next()?;
    let client_hashes = fields.next()?;
    let pm_private = fields.next()?;

    let mut hashes = client_hashes.strip_suffix(':')?.splitn(5, ':');
    let osu_path_md5 = hashes.next()?;
    let adapters_str = hashes.next()?;
    let adapters_md5 = hashes.next()?;
    let uninstall_md5 = hashes.next()?;
    let disk_signature_md5 = hashes.next()?;

    Some(LoginData {
        username: username.to_string(),
        password_md5: password_md5.to_string(),
        osu_version: osu_version.to_string(),
        utc_offset,
        pm_private: pm_private == "1",
        osu_path_md5: osu_path_md5.to_string(),
        adapters_str: adapters_str.to_string(),
        adapters_md5: adapters_md5.to_string(),
        uninstall_md5: uninstall_md5.to_string(),
        disk_signature_md5: disk_signature_md5.to_string(),
    })
}

/// Handle a token-less POST: the client is logging in.
pub async fn login(server: &Server, body: &[u8], ip: IpAddr) -> Result<LoginOutcome> {
    let Some(data) = parse_login_data(body) else {
        return Ok(fail("invalid-request", Vec::new()));
    };

    let Some(version) = OSU_VERSION.captures(&data.osu_version) else {
        return Ok(fail("invalid-request", Vec::new()));
    };

    let stream = version.name("stream").map(|m| m.as_str()).unwrap_or("stable");
    let Ok(client_date) = NaiveDate::parse_from_str(&version["date"], "%Y%m%d") else {
        return Ok(fail("invalid-request", Vec::new()));
    };

    if client_date < Utc::now().date_naive() - Duration::days(MAX_CLIENT_AGE_DAYS) {
        let mut body = packets::version_update_forced();
        body.extend(packets::user_id(-2));
        return Ok(fail("client-too-old", body));
    }

    let running_under_wine = data.adapters_str == "runningunderwine";
    let adapters: Vec<String> = data
        .adapters_str
        .trim_end_matches('.')
        .split('.')
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();

    if !running_under_wine && adapters.is_empty() {
        let mut body = packets::user_id(-1);
        body.extend(packets::notification("Please restart your osu! and try again."));
        return Ok(fail("empty-adapters", body));
    }

    let is_tourney_client = stream == "tourney";
    let login_time = Utc::now().timestamp();

    // Already online? Tournament clients may coexist; anyone else
    // either evicts a silent ghost or is turned away.
    if let Some(online) = server.sessions.get_by_name(&data.username).await {
        if !(is_tourney_client || online.tourney_client) {
            if login_time - online.last_recv_time() > GHOST_EVICTION_SECS {
                logout(server, &online).await;
            } else {
                let mut body = packets::user_id(-1);
                body.extend(packets::notification("User already logged in."));
                return Ok(fail("user-ghosted", body));
            }
        }
    }

    let Some(user) = server
        .backend
        .users
        .fetch_by_name(&make_safe(&data.username))
        .await?
    else {
        let mut body = packets::notification(&format!(
            "Login attempt failed.\nIncorrect username or password.\n\nServer: {}",
            server.config.domain,
        ));
        body.extend(packets::user_id(-1));
        return Ok(fail("login-failed", body));
    };

    if !server
        .check_credentials(&data.password_md5, &user.pw_bcrypt)
        .await?
    {
        let mut body = packets::notification(&format!(
            "Login attempt failed.\nIncorrect username or password.\n\nServer: {}",
            server.config.domain,
        ));
        body.extend(packets::user_id(-1));
        return Ok(fail("login-failed", body));
    }

    if is_tourney_client
        && !(user.privileges.intersects(Privileges::DONATOR)
            && user.privileges.contains(Privileges::UNRESTRICTED))
    {
        return Ok(fail("no", packets::user_id(-1)));
    }

    // Credentials verified; record the login and the hardware set.
    server
        .backend
        .users
        .record_login(user.id, ip, &data.osu_version)
        .await?;

    let hashes = crate::backend::ClientHashes {
        osu_path_md5: data.osu_path_md5.clone(),
        adapters_md5: data.adapters_md5.clone(),
        uninstall_md5: data.uninstall_md5.clone(),
        disk_signature_md5: data.disk_signature_md5.clone(),
    };
    server
        .backend
        .users
        .upsert_client_hashes(user.id, &hashes)
        .await?;

    let hw_matches = server
        .backend
        .users
        .hardware_matches(user.id, &hashes, running_under_wine)
        .await?;

    if !hw_matches.is_empty() && !user.privileges.contains(Privileges::VERIFIED) {
        // First connection from this hardware set; refuse if it is
        // tied to any restricted account.
        let any_restricted = hw_matches
            .iter()
            .any(|m| !m.privileges.contains(Privileges::UNRESTRICTED));
        if any_restricted {
            let mut body =
                packets::notification("Please contact staff directly to create an account.");
            body.extend(packets::user_id(-1));
            return Ok(fail("contact-staff", body));
        }
    }

    // All checks passed; build the session.
    let token = Uuid::new_v4().simple().to_string();
    let client = ClientDetails {
        osu_version: data.osu_version.clone(),
        osu_path_md5: data.osu_path_md5,
        adapters_md5: data.adapters_md5,
        uninstall_md5: data.uninstall_md5,
        disk_signature_md5: data.disk_signature_md5,
        adapters,
        ip,
    };
    let mut session = Session::new(&user, token.clone(), Some(client));
    session.tourney_client = is_tourney_client;
    let session = Arc::new(session);

    let geoloc = if ip_is_private(ip) {
        None
    } else {
        match server.backend.geolocation.lookup(ip).await {
            Ok(geoloc) => geoloc,
            Err(err) => {
                log::warn!("geolocation lookup for {} failed: {}", ip, err);
                None
            }
        }
    };

    {
        let mut state = session.state.lock().await;
        state.utc_offset = data.utc_offset;
        state.pm_private = data.pm_private;
        if let Some(geoloc) = geoloc {
            state.geoloc = geoloc;
        }
    }

    let body = bootstrap(server, &session, &user).await?;

    server.sessions.append(session.clone()).await;

    let platform = if running_under_wine { "unix (wine)" } else { "win32" };
    log::info!(
        "{} logged in using {} on {}",
        session,
        data.osu_version,
        platform
    );

    let users = server.backend.users.clone();
    let user_id = session.id;
    tokio::spawn(async move {
        let _ = users.update_latest_activity(user_id).await;
    });

    Ok(LoginOutcome::Success { token, body })
}

/// Assemble the presence bootstrap payload and notify peers.
async fn bootstrap(server: &Server, session: &Arc<Session>, user: &crate::backend::User) -> Result<Vec<u8>> {
    let restricted = session.restricted();

    let mut data = packets::protocol_version(PROTOCOL_VERSION);
    data.extend(packets::user_id(session.id));

    // The client itself is always told it has supporter, so in-game
    // perks like osu!direct work; peers only see real privileges.
    data.extend(packets::bancho_privileges(
        session.privileges().to_client() | bancho::ClientPrivileges::SUPPORTER,
    ));

    data.extend(packets::notification(&format!(
        "Welcome back to {}!\nRunning cho v{}.",
        server.config.domain,
        env!("CARGO_PKG_VERSION"),
    )));

    // Channel listing; the client joins the auto-join ones itself.
    for channel in server.channels.all().await {
        if !channel.auto_join
            || !channel.can_read(session.privileges())
            || channel.name == "#lobby"
        {
            continue;
        }

        let info = presence::channel_info_packet(&channel).await;
        data.extend_from_slice(&info);

        // Peers get fresh member counts too.
        for other in server.sessions.all().await {
            if channel.can_read(other.privileges()) {
                other.enqueue(&info).await;
            }
        }
    }
    data.extend(packets::channel_info_end());

    data.extend(packets::main_menu_icon(
        &server.config.menu_icon_url,
        &server.config.menu_onclick_url,
    ));

    {
        let state = session.state.lock().await;
        data.extend(packets::friends_list(&state.friends));
        data.extend(packets::silence_end(
            Session::remaining_silence(state.silence_end) as i32,
        ));
    }

    let own_presence = {
        let mut p = presence::presence_packet(session).await;
        p.extend(presence::stats_packet(session).await);
        p
    };
    data.extend_from_slice(&own_presence);

    if !restricted {
        for other in server.sessions.all().await {
            // Us to them...
            other.enqueue(&own_presence).await;

            // ...and them to us.
            if !other.restricted() {
                data.extend(presence::presence_packet(&other).await);
                data.extend(presence::stats_packet(&other).await);
            }
        }

        // Mail that arrived while offline, one banner per sender.
        let mail = server.backend.mail.fetch_unread(session.id).await?;
        let mut seen_senders = Vec::new();
        for msg in &mail {
            if !seen_senders.contains(&msg.from_id) {
                seen_senders.push(msg.from_id);
                data.extend(packets::send_message(&Message {
                    sender: msg.from_name.clone(),
                    text: "Unread messages".to_string(),
                    recipient: msg.to_name.clone(),
                    sender_id: msg.from_id,
                }));
            }

            let when = chrono::DateTime::from_timestamp(msg.sent_at, 0)
                .map(|t| t.format("%a %b %d @ %H:%M%p").to_string())
                .unwrap_or_default();
            data.extend(packets::send_message(&Message {
                sender: msg.from_name.clone(),
                text: format!("[{}] {}", when, msg.msg),
                recipient: msg.to_name.clone(),
                sender_id: msg.from_id,
            }));
        }

        if !user.privileges.contains(Privileges::VERIFIED) {
            // First login; verify the account and say hello.
            server
                .backend
                .users
                .add_privileges(session.id, Privileges::VERIFIED)
                .await?;
            session.set_privileges(session.privileges() | Privileges::VERIFIED);

            data.extend(packets::send_message(&Message {
                sender: server.config.bot_name.clone(),
                text: format!(
                    "Welcome to {}.\nTo see a list of commands, use {}help.\nEnjoy the server!",
                    server.config.domain, server.config.command_prefix,
                ),
                recipient: session.name.clone(),
                sender_id: server.config.bot_id,
            }));
        }
    } else {
        // Restricted sessions see the world, the world does not see
        // them.
        for other in server.sessions.unrestricted().await {
            data.extend(presence::presence_packet(&other).await);
            data.extend(presence::stats_packet(&other).await);
        }

        data.extend(packets::account_restricted());
        data.extend(packets::send_message(&Message {
            sender: server.config.bot_name.clone(),
            text: "Your account is currently in restricted mode. If you believe \
                   this is a mistake, or have waited a period greater than 3 \
                   months, you may appeal via the form on the site."
                .to_string(),
            recipient: session.name.clone(),
            sender_id: server.config.bot_id,
        }));
    }

    Ok(data)
}

/// Tear a session down: detach from spectating, matches and channels,
/// drop it from the registry, and tell the world.
pub async fn logout(server: &Server, session: &Arc<Session>) {
    let spectating = session.state.lock().await.spectating;
    if let Some(host_id) = spectating {
        if let Some(host) = server.sessions.get_by_id(host_id).await {
            spectator::remove_spectator(server, &host, session).await;
        }
    }

    multiplayer::leave_match(server, session).await;

    for channel in server.channels.all().await {
        chat::leave_channel(server, session, &channel, false).await;
    }

    server.sessions.remove(session).await;

    if !session.restricted() {
        server
            .sessions
            .enqueue_all(&packets::logout(session.id))
            .await;
    }

    log::info!("{} logged out", session);
}

fn ip_is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}
