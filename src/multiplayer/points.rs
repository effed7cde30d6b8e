//! Scrimmage bookkeeping: gather submitted scores after a play, pick
//! the point winner, and announce the running totals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bancho::MatchTeam;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::backend::SubmittedScore;
use crate::chat;
use crate::multiplayer::{Match, ScoreKey};
use crate::server::Server;

lazy_static! {
    /// Tournament-style match names carry the team names, e.g.
    /// "OWC2015: (United States) vs. (China)".
    static ref TOURNEY_MATCHNAME: Regex =
        Regex::new(r"^(?P<name>.+?): \((?P<t1>.+)\) vs\.? \((?P<t2>.+)\)$").unwrap();
}

/// How often the gather task re-polls the submission pipeline.
const POLL_INTERVAL_MS: u64 = 500;

/// Submissions younger than this are taken as belonging to the play
/// that just ended.
const SUBMISSION_WINDOW_SECS: i64 = 300;

/// Wait for every playing slot's score, then score the point.
pub async fn update_matchpoints(
    server: &Server,
    entry: Arc<Mutex<Match>>,
    was_playing: Vec<i32>,
    timeout_secs: u64,
) {
    // Snapshot what the gather needs; the room can mutate while we wait.
    let (chat_name, map_md5, teams) = {
        let m = entry.lock().await;
        let teams: HashMap<i32, MatchTeam> = m
            .slots
            .iter()
            .filter_map(|s| s.player.map(|id| (id, s.team)))
            .collect();
        (m.chat_name(), m.map_md5.clone(), teams)
    };

    let after = Utc::now().timestamp() - SUBMISSION_WINDOW_SECS;
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let mut submitted: HashMap<i32, SubmittedScore> = HashMap::new();

    loop {
        for id in &was_playing {
            if submitted.contains_key(id) {
                continue;
            }
            match server
                .backend
                .scores
                .recent_submission(*id, &map_md5, after)
                .await
            {
                Ok(Some(score)) => {
                    submitted.insert(*id, score);
                }
                Ok(None) => {}
                Err(err) => log::warn!("submission lookup for {} failed: {}", id, err),
            }
        }

        if submitted.len() == was_playing.len() || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }

    for id in &was_playing {
        if !submitted.contains_key(id) {
            let name = session_name(server, *id).await;
            chat::send_bot_to_channel_named(
                server,
                &chat_name,
                &format!("{} didn't submit a score (timeout: {}s).", name, timeout_secs),
            )
            .await;
        }
    }

    if submitted.is_empty() {
        chat::send_bot_to_channel_named(server, &chat_name, "Scores could not be calculated.")
            .await;
        return;
    }

    let anyone_missing = submitted.len() != was_playing.len();

    let mut m = entry.lock().await;
    let lines = score_point(server, &mut m, &submitted, &teams).await;
    drop(m);

    if anyone_missing {
        chat::send_bot_to_channel_named(
            server,
            &chat_name,
            "If you'd like to perform a rematch, please use the `!mp rematch` command.",
        )
        .await;
    }
    for line in lines {
        chat::send_bot_to_channel_named(server, &chat_name, &line).await;
    }
}

/// Decide the point winner and produce the announcement lines.
async fn score_point(
    server: &Server,
    m: &mut Match,
    submitted: &HashMap<i32, SubmittedScore>,
    teams: &HashMap<i32, MatchTeam>,
) -> Vec<String> {
    // Aggregate per player (free-for-all) or per team.
    let ffa = m.team_type.is_ffa();
    let mut scores: HashMap<ScoreKey, f64> = HashMap::new();
    for (id, score) in submitted {
        let key = if ffa {
            ScoreKey::Player(*id)
        } else {
            ScoreKey::Team(teams.get(id).copied().unwrap_or(MatchTeam::Neutral))
        };
        *scores.entry(key).or_insert(0.0) += score_value(m, score);
    }

    // All equal means nobody takes the point.
    if scores.len() != 1 {
        let mut values: Vec<f64> = scores.values().copied().collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        if values.first() == values.last() {
            m.winners.push(None);
            return vec!["The point has ended in a tie!".to_string()];
        }
    }

    let (winner, winning_score) = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(k, v)| (*k, *v))
        .unwrap();

    m.winners.push(Some(winner));
    *m.match_points.entry(winner).or_insert(0) += 1;
    let winner_points = m.match_points[&winner];

    let mut lines = Vec::new();

    if ffa {
        let winner_name = match winner {
            ScoreKey::Player(id) => session_name(server, id).await,
            ScoreKey::Team(_) => unreachable!(),
        };
        let avg = (scores.values().sum::<f64>() / scores.len() as f64).trunc();
        lines.push(format!(
            "{} takes the point! ({} [Match avg. {}])",
            winner_name,
            format_value(m, winning_score),
            format_value(m, avg),
        ));

        if m.winning_pts != 0 && winner_points == m.winning_pts {
            m.is_scrimming = false;
            m.reset_scrimmage_state();
            lines.push(format!("{} takes the match! Congratulations!", winner_name));
        } else {
            let mut totals: Vec<(ScoreKey, u32)> =
                m.match_points.iter().map(|(k, v)| (*k, *v)).collect();
            totals.sort_by(|a, b| b.1.cmp(&a.1));
            let mut parts = Vec::new();
            for (key, points) in totals.into_iter().take(3) {
                if let ScoreKey::Player(id) = key {
                    parts.push(format!("{} - {}", session_name(server, id).await, points));
                }
            }
            lines.push(format!("Total Score: {}", parts.join(" | ")));
        }
    } else {
        let (match_name, blue_name, red_name) = match TOURNEY_MATCHNAME.captures(&m.name) {
            Some(caps) => (
                caps["name"].to_string(),
                caps["t1"].to_string(),
                caps["t2"].to_string(),
            ),
            None => (m.name.clone(), "Blue".to_string(), "Red".to_string()),
        };

        let winning_team = match winner {
            ScoreKey::Team(team) => team,
            ScoreKey::Player(_) => unreachable!(),
        };
        let losing_team = winning_team.other().unwrap_or(MatchTeam::Red);
        let loser = ScoreKey::Team(losing_team);

        let name_of = |team: MatchTeam| match team {
            MatchTeam::Blue => blue_name.clone(),
            _ => red_name.clone(),
        };
        let winner_name = name_of(winning_team);
        let loser_name = name_of(losing_team);

        let losing_score = scores.get(&loser).copied().unwrap_or(0.0);
        let loser_points = m.match_points.get(&loser).copied().unwrap_or(0);

        lines.push(format!(
            "{} takes the point! ({} vs. {})",
            winner_name,
            format_value(m, winning_score),
            format_value(m, losing_score),
        ));

        if m.winning_pts != 0 && winner_points == m.winning_pts {
            m.is_scrimming = false;
            m.reset_scrimmage_state();
            lines.push(format!(
                "{} takes the match, finishing {} with a score of {} - {}! Congratulations!",
                winner_name, match_name, winner_points, loser_points,
            ));
        } else {
            lines.push(format!(
                "Total Score: {} | {} - {} | {}",
                winner_name, winner_points, loser_points, loser_name,
            ));
        }
    }

    lines
}

/// The comparable value of a submission under the room's win condition.
fn score_value(m: &Match, score: &SubmittedScore) -> f64 {
    use bancho::WinCondition::*;

    if m.use_pp_scoring {
        return score.pp as f64;
    }
    match m.win_condition {
        Accuracy => score.accuracy as f64,
        Combo => score.max_combo as f64,
        Score | ScoreV2 => score.score as f64,
    }
}

/// Format a value the way the win condition reads naturally.
fn format_value(m: &Match, value: f64) -> String {
    use bancho::WinCondition::*;

    if m.use_pp_scoring {
        return format!("{:.2}pp", value);
    }
    match m.win_condition {
        Accuracy => format!("{:.2}%", value),
        Combo => format!("{}x", value as i64),
        Score | ScoreV2 => format!("{}", value as i64),
    }
}

async fn session_name(server: &Server, id: i32) -> String {
    match server.sessions.get_by_id(id).await {
        Some(session) => session.name.clone(),
        None => format!("player {}", id),
    }
}
