//! The Odds API (v4): game odds for every book, plus per-event player props.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ProviderError;
use crate::pricing::normalize_price;
use crate::providers::http::{as_f64, get_json};
use crate::providers::retry::{call_with_retry, RetryPolicy};
use crate::providers::teams::TeamDirectory;
use crate::providers::{match_game, OddsProvider, PropsProvider};
use crate::types::{Game, MarketQuote, MarketType, PlayerProp, Side, Sport};

const GAME_MARKETS: &str = "h2h,spreads,totals";

/// Event-props requests in flight at once.
const PROPS_CONCURRENCY: usize = 4;

pub fn sport_key(sport: Sport) -> &'static str {
    match sport {
        Sport::Nfl => "americanfootball_nfl",
        Sport::Nba => "basketball_nba",
        Sport::Mlb => "baseball_mlb",
        Sport::Nhl => "icehockey_nhl",
        Sport::Cfb => "americanfootball_ncaaf",
    }
}

pub fn default_prop_markets(sport: Sport) -> &'static [&'static str] {
    match sport {
        Sport::Nba => &["player_points", "player_rebounds", "player_assists"],
        Sport::Nfl | Sport::Cfb => &["player_pass_yards", "player_rush_yards", "player_receiving_yards"],
        Sport::Mlb => &["player_hits", "player_home_runs", "player_total_bases", "player_strikeouts"],
        Sport::Nhl => &["player_points"],
    }
}

pub struct OddsApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    regions: String,
    /// Empty means every book
    bookmakers: Vec<String>,
    props_max_events: usize,
    retry: RetryPolicy,
    teams: Arc<TeamDirectory>,
}

impl OddsApiClient {
    pub fn new(cfg: &Config, client: reqwest::Client, retry: RetryPolicy, teams: Arc<TeamDirectory>) -> Self {
        Self {
            client,
            base_url: cfg.odds_api_base_url.clone(),
            api_key: cfg.odds_api_key.clone(),
            regions: cfg.odds_regions.clone(),
            bookmakers: cfg.odds_bookmakers.clone(),
            props_max_events: cfg.props_max_events,
            retry,
            teams,
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::AuthFailed("ODDS_API_KEY not configured".to_string()))
    }

    async fn get(&self, op: &str, url: &str, params: &[(&str, &str)]) -> Result<Value, ProviderError> {
        call_with_retry(&self.retry, op, || get_json(self.client.get(url).query(params))).await
    }

    async fn event_props(
        &self,
        sport: Sport,
        event_id: &str,
        markets: &str,
        games: &[Game],
    ) -> Result<Vec<PlayerProp>, ProviderError> {
        let key = self.key()?;
        let url = format!("{}/sports/{}/events/{}/odds", self.base_url, sport_key(sport), event_id);
        let body = self
            .get(
                "odds_api_event_props",
                &url,
                &[("apiKey", key), ("regions", self.regions.as_str()), ("markets", markets), ("oddsFormat", "american")],
            )
            .await?;
        parse_event_props(sport, &body, games, &self.teams, &self.bookmakers)
    }
}

#[async_trait]
impl OddsProvider for OddsApiClient {
    fn name(&self) -> &'static str {
        "odds_api"
    }

    async fn fetch_odds(&self, sport: Sport, games: &[Game]) -> Result<Vec<MarketQuote>, ProviderError> {
        let key = self.key()?;
        let url = format!("{}/sports/{}/odds", self.base_url, sport_key(sport));
        let body = self
            .get(
                "odds_api_odds",
                &url,
                &[("apiKey", key), ("regions", self.regions.as_str()), ("markets", GAME_MARKETS), ("oddsFormat", "american")],
            )
            .await?;
        let quotes = parse_odds(sport, &body, games, &self.teams, &self.bookmakers)?;
        info!(sport = %sport, quotes = quotes.len(), "Odds API odds fetched");
        Ok(quotes)
    }
}

#[async_trait]
impl PropsProvider for OddsApiClient {
    fn name(&self) -> &'static str {
        "odds_api"
    }

    /// Props are only served per event: list the events, then query up to
    /// `props_max_events` of the soonest ones.
    async fn fetch_props(&self, sport: Sport, games: &[Game]) -> Result<Vec<PlayerProp>, ProviderError> {
        let key = self.key()?;
        let url = format!("{}/sports/{}/events", self.base_url, sport_key(sport));
        let body = self.get("odds_api_events", &url, &[("apiKey", key)]).await?;
        let events = body
            .as_array()
            .ok_or_else(|| ProviderError::schema("events response is not an array"))?;

        let mut ids: Vec<(DateTime<Utc>, &str)> = events
            .iter()
            .filter_map(|ev| {
                let id = ev.get("id")?.as_str()?;
                let at = ev.get("commence_time").and_then(|v| v.as_str()).and_then(parse_time)?;
                Some((at, id))
            })
            .collect();
        ids.sort();
        ids.truncate(self.props_max_events);

        let markets = default_prop_markets(sport).join(",");
        let event_ids: Vec<String> = ids.iter().map(|(_, id)| id.to_string()).collect();
        let results: Vec<(String, Result<Vec<PlayerProp>, ProviderError>)> = stream::iter(event_ids)
            .map(|id| {
                let markets = markets.as_str();
                async move {
                    let result = self.event_props(sport, &id, markets, games).await;
                    (id, result)
                }
            })
            .buffer_unordered(PROPS_CONCURRENCY)
            .collect()
            .await;

        let mut props = Vec::new();
        let mut last_err = None;
        let mut failures = 0usize;
        for (id, result) in results {
            match result {
                Ok(mut p) => props.append(&mut p),
                Err(e) => {
                    failures += 1;
                    debug!(sport = %sport, event = %id, error = %e, "Event props fetch failed");
                    last_err = Some(e);
                }
            }
        }

        if failures > 0 {
            if failures == ids.len() {
                if let Some(e) = last_err {
                    return Err(e);
                }
            }
            warn!(sport = %sport, failures, events = ids.len(), "Some event props fetches failed");
        }
        info!(sport = %sport, props = props.len(), events = ids.len(), "Odds API props fetched");
        Ok(props)
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc))
}

fn allowed_books<'a>(event: &'a Value, filter: &'a [String]) -> impl Iterator<Item = (&'a str, &'a Value)> {
    event
        .get("bookmakers")
        .and_then(|b| b.as_array())
        .map(|b| b.as_slice())
        .unwrap_or(&[])
        .iter()
        .filter_map(|b| Some((b.get("key")?.as_str()?, b)))
        .filter(move |(key, _)| filter.is_empty() || filter.iter().any(|f| f == key))
}

/// Resolve an event's teams to a stored game.
fn event_game<'a>(sport: Sport, ev: &Value, games: &'a [Game], teams: &TeamDirectory) -> Option<&'a Game> {
    let home = teams.canonicalize(sport, ev.get("home_team")?.as_str()?)?;
    let away = teams.canonicalize(sport, ev.get("away_team")?.as_str()?)?;
    let commence = ev.get("commence_time").and_then(|v| v.as_str()).and_then(parse_time);
    match_game(games, &home, &away, commence)
}

/// Flatten `/odds` into one quote per book per side. Events that match no
/// stored game are skipped; malformed outcomes are dropped individually.
pub fn parse_odds(
    sport: Sport,
    body: &Value,
    games: &[Game],
    teams: &TeamDirectory,
    book_filter: &[String],
) -> Result<Vec<MarketQuote>, ProviderError> {
    let events = body
        .as_array()
        .ok_or_else(|| ProviderError::schema("odds response is not an array"))?;

    let mut quotes = Vec::new();
    let mut unmatched = 0usize;
    for ev in events {
        let Some(game) = event_game(sport, ev, games, teams) else {
            unmatched += 1;
            continue;
        };

        for (book, bm) in allowed_books(ev, book_filter) {
            let observed_at = bm
                .get("last_update")
                .and_then(|v| v.as_str())
                .and_then(parse_time)
                .unwrap_or_else(Utc::now);
            let markets = bm.get("markets").and_then(|m| m.as_array()).map(|m| m.as_slice()).unwrap_or(&[]);

            for m in markets {
                let Some(market) = m.get("key").and_then(|k| k.as_str()).and_then(|k| k.parse::<MarketType>().ok())
                else {
                    continue;
                };
                let outcomes = m.get("outcomes").and_then(|o| o.as_array()).map(|o| o.as_slice()).unwrap_or(&[]);
                for outcome in outcomes {
                    if let Some(q) = parse_outcome(sport, game, market, book, observed_at, outcome, teams) {
                        quotes.push(q);
                    }
                }
            }
        }
    }

    if unmatched > 0 {
        debug!(sport = %sport, unmatched, "Odds events without a matching game skipped");
    }
    Ok(quotes)
}

fn parse_outcome(
    sport: Sport,
    game: &Game,
    market: MarketType,
    book: &str,
    observed_at: DateTime<Utc>,
    outcome: &Value,
    teams: &TeamDirectory,
) -> Option<MarketQuote> {
    let name = outcome.get("name")?.as_str()?;
    let side = match market {
        MarketType::Total => name.parse::<Side>().ok().filter(|s| matches!(s, Side::Over | Side::Under))?,
        MarketType::Moneyline | MarketType::Spread => {
            let team = teams.canonicalize(sport, name)?;
            if team == game.home_team {
                Side::Home
            } else if team == game.away_team {
                Side::Away
            } else {
                return None;
            }
        }
    };
    let price = normalize_price(outcome.get("price").and_then(as_f64)?).ok()?;
    let line = if market.has_line() { Some(outcome.get("point").and_then(as_f64)?) } else { None };

    Some(MarketQuote {
        game_id: game.id.clone(),
        market,
        side,
        book: book.to_string(),
        price,
        line,
        observed_at,
    })
}

/// One prop per (book, market, player, line), pairing the Over and Under outcomes.
pub fn parse_event_props(
    sport: Sport,
    body: &Value,
    games: &[Game],
    teams: &TeamDirectory,
    book_filter: &[String],
) -> Result<Vec<PlayerProp>, ProviderError> {
    if !body.is_object() {
        return Err(ProviderError::schema("event odds response is not an object"));
    }
    let game_id = event_game(sport, body, games, teams).map(|g| g.id.clone());

    let mut props = Vec::new();
    for (book, bm) in allowed_books(body, book_filter) {
        let observed_at = bm.get("last_update").and_then(|v| v.as_str()).and_then(parse_time);
        let markets = bm.get("markets").and_then(|m| m.as_array()).map(|m| m.as_slice()).unwrap_or(&[]);

        for m in markets {
            let Some(market) = m.get("key").and_then(|k| k.as_str()) else { continue };
            let outcomes = m.get("outcomes").and_then(|o| o.as_array()).map(|o| o.as_slice()).unwrap_or(&[]);

            // (player, line in hundredths) keeps grouping deterministic
            let mut grouped: BTreeMap<(String, Option<i64>), PlayerProp> = BTreeMap::new();
            for outcome in outcomes {
                let Some(player) = outcome
                    .get("description")
                    .or_else(|| outcome.get("player_name"))
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                else {
                    continue;
                };
                let line = outcome.get("point").and_then(as_f64);
                let price = outcome.get("price").and_then(as_f64).and_then(|p| normalize_price(p).ok());
                let side = outcome.get("name").and_then(|v| v.as_str()).and_then(|s| s.parse::<Side>().ok());

                let entry = grouped
                    .entry((player.to_string(), line.map(|l| (l * 100.0).round() as i64)))
                    .or_insert_with(|| PlayerProp {
                        sport,
                        game_id: game_id.clone(),
                        player: player.to_string(),
                        market: market.to_string(),
                        line,
                        over_price: None,
                        under_price: None,
                        book: book.to_string(),
                        observed_at,
                    });
                match side {
                    Some(Side::Over) => entry.over_price = price,
                    Some(Side::Under) => entry.under_price = price,
                    _ => {}
                }
            }
            props.extend(
                grouped
                    .into_values()
                    .filter(|p| p.over_price.is_some() || p.under_price.is_some()),
            );
        }
    }
    Ok(props)
}
