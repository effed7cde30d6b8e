//! Background maintenance: reap idle sessions, expire stale /np
//! contexts.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::login;
use crate::server::Server;

const TICK_SECS: u64 = 30;

/// Run the maintenance loop for the lifetime of the server.
pub fn spawn(server: Server) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TICK_SECS));
        // The first tick fires immediately; skip it so a fresh server
        // doesn't reap before anyone had a chance to speak.
        interval.tick().await;

        loop {
            interval.tick().await;
            reap_idle_sessions(&server).await;
            expire_stale_np(&server).await;
        }
    })
}

/// Disconnect sessions that have gone quiet, through the full logout
/// path so channels, spectators and matches are left properly.
async fn reap_idle_sessions(server: &Server) {
    let now = Utc::now().timestamp();
    let threshold = server.config.idle_timeout_secs as i64;

    for session in server.sessions.all().await {
        if session.is_bot {
            continue;
        }
        let idle = now - session.last_recv_time();
        if idle > threshold {
            log::info!("reaping {} after {}s of silence", session, idle);
            login::logout(server, &session).await;
        }
    }
}

/// Clear /np contexts whose deadline passed.
async fn expire_stale_np(server: &Server) {
    let now = Utc::now().timestamp();
    for session in server.sessions.all().await {
        let mut state = session.state.lock().await;
        if let Some(np) = &state.last_np {
            if np.timeout <= now {
                state.last_np = None;
            }
        }
    }
}
