//! SportsGameOdds: player props only, bearer-token auth.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ProviderError;
use crate::pricing::normalize_price;
use crate::providers::http::{as_f64, get_json};
use crate::providers::odds_api::default_prop_markets;
use crate::providers::retry::{call_with_retry, RetryPolicy};
use crate::providers::teams::TeamDirectory;
use crate::providers::{match_game, PropsProvider};
use crate::types::{Game, PlayerProp, Sport};

const PAGE_LIMIT: &str = "200";

pub struct SgoClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    teams: Arc<TeamDirectory>,
}

impl SgoClient {
    pub fn new(cfg: &Config, client: reqwest::Client, retry: RetryPolicy, teams: Arc<TeamDirectory>) -> Self {
        Self {
            client,
            base_url: cfg.sgo_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.sgo_api_key.clone(),
            retry,
            teams,
        }
    }
}

#[async_trait]
impl PropsProvider for SgoClient {
    fn name(&self) -> &'static str {
        "sgo"
    }

    async fn fetch_props(&self, sport: Sport, games: &[Game]) -> Result<Vec<PlayerProp>, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::AuthFailed("SGO_API_KEY not configured".to_string()))?;
        let url = format!("{}/props", self.base_url);
        let markets = default_prop_markets(sport).join(",");

        let body = call_with_retry(&self.retry, "sgo_props", || {
            get_json(
                self.client
                    .get(&url)
                    .bearer_auth(key)
                    .query(&[("sport", sport.as_str()), ("markets", markets.as_str()), ("limit", PAGE_LIMIT)]),
            )
        })
        .await?;

        let props = parse_props(sport, &body, games, &self.teams)?;
        info!(sport = %sport, props = props.len(), "SGO props fetched");
        Ok(props)
    }
}

/// Accepts either `{"events": [..]}` or a bare array of flat prop records.
pub fn parse_props(
    sport: Sport,
    body: &Value,
    games: &[Game],
    teams: &TeamDirectory,
) -> Result<Vec<PlayerProp>, ProviderError> {
    let records = body
        .get("events")
        .and_then(|e| e.as_array())
        .or_else(|| body.as_array())
        .ok_or_else(|| ProviderError::schema("props response has no events array"))?;

    let mut props = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    for rec in records {
        match parse_record(sport, rec, games, teams) {
            Some(p) => props.push(p),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(sport = %sport, skipped, "SGO prop records skipped");
    }
    Ok(props)
}

fn parse_record(sport: Sport, rec: &Value, games: &[Game], teams: &TeamDirectory) -> Option<PlayerProp> {
    let str_field = |k: &str| rec.get(k).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty());

    let player = str_field("player_name").or_else(|| str_field("name"))?;
    let market = str_field("market")?;
    let price = |k: &str| rec.get(k).and_then(as_f64).and_then(|p| normalize_price(p).ok());
    let over_price = price("over_price");
    let under_price = price("under_price");
    if over_price.is_none() && under_price.is_none() {
        return None;
    }

    let game_id = match (str_field("team"), str_field("opponent")) {
        (Some(team), Some(opp)) => {
            let a = teams.canonicalize(sport, team);
            let b = teams.canonicalize(sport, opp);
            a.zip(b).and_then(|(a, b)| match_game(games, &a, &b, None)).map(|g| g.id.clone())
        }
        _ => None,
    };

    Some(PlayerProp {
        sport,
        game_id,
        player: player.to_string(),
        market: market.to_string(),
        line: rec.get("line").and_then(as_f64),
        over_price,
        under_price,
        book: str_field("bookmaker").or_else(|| str_field("book")).unwrap_or("sgo").to_string(),
        observed_at: str_field("last_update")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameStatus;
    use chrono::TimeZone;
    use serde_json::json;

    fn game() -> Game {
        Game {
            id: "nba:77".into(),
            sport: Sport::Nba,
            external_id: "77".into(),
            home_team: "boston celtics".into(),
            away_team: "los angeles lakers".into(),
            start_time: Utc.with_ymd_and_hms(2026, 10, 20, 23, 30, 0).unwrap(),
            status: GameStatus::Scheduled,
            home_score: None,
            away_score: None,
        }
    }

    #[test]
    fn parses_wrapped_records_and_links_games() {
        let body = json!({"events": [
            {"player_name": "Jayson Tatum", "market": "player_points", "line": "27.5",
             "over_price": -110, "under_price": "-110", "team": "Boston Celtics",
             "opponent": "LA Lakers", "bookmaker": "pinnacle", "last_update": "2026-10-16T09:00:00Z"},
            {"player_name": "No Prices", "market": "player_points", "line": 10.5},
            {"market": "player_points", "over_price": 100}
        ]});
        let props = parse_props(Sport::Nba, &body, &[game()], &TeamDirectory::with_defaults()).unwrap();
        assert_eq!(props.len(), 1);
        let p = &props[0];
        assert_eq!(p.game_id.as_deref(), Some("nba:77"));
        assert_eq!(p.line, Some(27.5));
        assert_eq!(p.under_price, Some(-110.0));
        assert_eq!(p.book, "pinnacle");
        assert!(p.observed_at.is_some());
    }

    #[test]
    fn accepts_bare_array() {
        let body = json!([{"name": "Luka Doncic", "market": "player_assists", "over_price": 120, "book": "dk"}]);
        let props = parse_props(Sport::Nba, &body, &[], &TeamDirectory::with_defaults()).unwrap();
        assert_eq!(props[0].player, "Luka Doncic");
        assert_eq!(props[0].game_id, None);
        assert_eq!(props[0].book, "dk");
    }

    #[test]
    fn object_without_events_is_schema_mismatch() {
        let err = parse_props(Sport::Nba, &json!({"data": {}}), &[], &TeamDirectory::with_defaults()).unwrap_err();
        assert!(matches!(err, ProviderError::SchemaMismatch { .. }));
    }
}
