//! ESPN public scoreboard as the schedule source. Keyless.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::providers::http::get_json;
use crate::providers::retry::{call_with_retry, RetryPolicy};
use crate::providers::teams::TeamDirectory;
use crate::providers::ScheduleProvider;
use crate::types::{FetchWindow, Game, GameStatus, Sport};

pub struct EspnSchedule {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    teams: Arc<TeamDirectory>,
}

impl EspnSchedule {
    pub fn new(client: reqwest::Client, base_url: String, retry: RetryPolicy, teams: Arc<TeamDirectory>) -> Self {
        Self { client, base_url, retry, teams }
    }
}

fn league_path(sport: Sport) -> &'static str {
    match sport {
        Sport::Nfl => "football/nfl",
        Sport::Nba => "basketball/nba",
        Sport::Mlb => "baseball/mlb",
        Sport::Nhl => "hockey/nhl",
        Sport::Cfb => "football/college-football",
    }
}

#[async_trait]
impl ScheduleProvider for EspnSchedule {
    fn name(&self) -> &'static str {
        "espn"
    }

    async fn fetch_schedule(&self, sport: Sport, window: &FetchWindow) -> Result<Vec<Game>, ProviderError> {
        let url = format!("{}/{}/scoreboard", self.base_url, league_path(sport));
        let dates = format!("{}-{}", window.from.format("%Y%m%d"), window.to.format("%Y%m%d"));

        let body = call_with_retry(&self.retry, "espn_scoreboard", || {
            get_json(self.client.get(&url).query(&[("dates", dates.as_str()), ("limit", "500")]))
        })
        .await?;

        let games = parse_scoreboard(sport, &body, &self.teams)?;
        info!(sport = %sport, games = games.len(), "ESPN schedule fetched");
        Ok(games)
    }
}

/// Map a scoreboard payload to games. Events whose teams or start time cannot
/// be resolved are skipped; a payload without an `events` array is a schema error.
pub fn parse_scoreboard(sport: Sport, body: &Value, teams: &TeamDirectory) -> Result<Vec<Game>, ProviderError> {
    let events = body
        .get("events")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::schema("scoreboard response has no events array"))?;

    let mut games = Vec::with_capacity(events.len());
    let mut skipped = 0usize;
    for ev in events {
        match parse_event(sport, ev, teams) {
            Some(g) => games.push(g),
            None => {
                skipped += 1;
                debug!(
                    sport = %sport,
                    event = ev.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
                    "Skipping unresolvable ESPN event"
                );
            }
        }
    }
    if skipped > 0 {
        debug!(sport = %sport, skipped, "ESPN events skipped");
    }
    Ok(games)
}

fn parse_event(sport: Sport, ev: &Value, teams: &TeamDirectory) -> Option<Game> {
    let external_id = ev.get("id").and_then(|v| v.as_str())?;
    let comp = ev.get("competitions")?.as_array()?.first()?;
    let competitors = comp.get("competitors")?.as_array()?;

    let by_side = |side: &str| competitors.iter().find(|c| c.get("homeAway").and_then(|v| v.as_str()) == Some(side));
    let home = by_side("home")?;
    let away = by_side("away")?;

    let home_team = teams.canonicalize(sport, team_name(home)?)?;
    let away_team = teams.canonicalize(sport, team_name(away)?)?;

    let start_time = ev
        .get("date")
        .or_else(|| comp.get("date"))
        .and_then(|v| v.as_str())
        .and_then(parse_espn_time)?;

    let status_type = ev
        .get("status")
        .or_else(|| comp.get("status"))
        .and_then(|s| s.get("type"));
    let status = status_type.map(map_status).unwrap_or(GameStatus::Scheduled);

    let (home_score, away_score) = match status {
        GameStatus::Live | GameStatus::Completed => (score(home), score(away)),
        _ => (None, None),
    };

    Some(Game {
        id: Game::make_id(sport, external_id),
        sport,
        external_id: external_id.to_string(),
        home_team,
        away_team,
        start_time,
        status,
        home_score,
        away_score,
    })
}

fn team_name(competitor: &Value) -> Option<&str> {
    let team = competitor.get("team")?;
    team.get("displayName")
        .or_else(|| team.get("name"))
        .and_then(|v| v.as_str())
}

fn score(competitor: &Value) -> Option<u32> {
    match competitor.get("score")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
}

/// ESPN omits seconds: `2024-09-08T17:00Z`.
fn parse_espn_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ").ok().map(|n| n.and_utc()))
}

fn map_status(status_type: &Value) -> GameStatus {
    let name = status_type.get("name").and_then(|v| v.as_str()).unwrap_or("");
    match name {
        "STATUS_SCHEDULED" => GameStatus::Scheduled,
        "STATUS_IN_PROGRESS" | "STATUS_HALFTIME" | "STATUS_END_PERIOD" => GameStatus::Live,
        "STATUS_FINAL" => GameStatus::Completed,
        "STATUS_POSTPONED" => GameStatus::Postponed,
        "STATUS_CANCELED" => GameStatus::Cancelled,
        _ => match status_type.get("state").and_then(|v| v.as_str()) {
            Some("in") => GameStatus::Live,
            Some("post") => GameStatus::Completed,
            _ => GameStatus::Scheduled,
        },
    }
}
