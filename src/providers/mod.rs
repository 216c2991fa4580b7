pub mod espn;
pub mod http;
pub mod odds_api;
pub mod retry;
pub mod sgo;
pub mod teams;

#[cfg(test)]
pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{Config, PropsSource, MATCH_TOLERANCE_HOURS};
use crate::error::{ProviderError, Result};
use crate::types::{FetchWindow, Game, MarketQuote, PlayerProp, Sport};

use self::espn::EspnSchedule;
use self::odds_api::OddsApiClient;
use self::retry::RetryPolicy;
use self::sgo::SgoClient;
use self::teams::TeamDirectory;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------
//
// Implementations own their timeout and retry discipline and never panic or
// leak transport errors: every failure surfaces as a `ProviderError`.

#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_schedule(&self, sport: Sport, window: &FetchWindow) -> std::result::Result<Vec<Game>, ProviderError>;
}

#[async_trait]
pub trait OddsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quotes for the given games. Quotes are only emitted for events that
    /// resolve to one of `games`.
    async fn fetch_odds(&self, sport: Sport, games: &[Game]) -> std::result::Result<Vec<MarketQuote>, ProviderError>;
}

#[async_trait]
pub trait PropsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_props(&self, sport: Sport, games: &[Game]) -> std::result::Result<Vec<PlayerProp>, ProviderError>;
}

#[derive(Clone)]
pub struct ProviderSet {
    pub schedule: Arc<dyn ScheduleProvider>,
    pub odds: Arc<dyn OddsProvider>,
    pub props: Arc<dyn PropsProvider>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Shared HTTP client; the per-request timeout also bounds connect and body reads.
pub fn http_client(cfg: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.provider_timeout_secs))
        .user_agent(concat!("sharpline/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub fn build(cfg: &Config, client: reqwest::Client, teams: Arc<TeamDirectory>) -> ProviderSet {
    let retry = RetryPolicy::from_config(cfg);
    let odds = Arc::new(OddsApiClient::new(cfg, client.clone(), retry.clone(), Arc::clone(&teams)));

    let props: Arc<dyn PropsProvider> = match cfg.props_source {
        PropsSource::OddsApi => odds.clone(),
        PropsSource::SportsGameOdds => Arc::new(SgoClient::new(cfg, client.clone(), retry.clone(), Arc::clone(&teams))),
    };
    let schedule = Arc::new(EspnSchedule::new(client, cfg.espn_base_url.clone(), retry, teams));

    let set = ProviderSet { schedule, odds, props };
    info!(
        schedule = set.schedule.name(),
        odds = set.odds.name(),
        props = set.props.name(),
        odds_key = cfg.odds_api_key.is_some(),
        "Providers configured"
    );
    set
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Find the stored game played between two canonical team names, in either
/// home/away order. With a commence time, only games starting within
/// `MATCH_TOLERANCE_HOURS` qualify and the closest one wins.
pub fn match_game<'a>(
    games: &'a [Game],
    team_a: &str,
    team_b: &str,
    commence: Option<DateTime<Utc>>,
) -> Option<&'a Game> {
    let candidates = games.iter().filter(|g| g.involves(team_a, team_b));
    match commence {
        Some(at) => candidates
            .map(|g| (g, (g.start_time - at).num_seconds().abs()))
            .filter(|(_, gap)| *gap <= MATCH_TOLERANCE_HOURS * 3600)
            .min_by_key(|(_, gap)| *gap)
            .map(|(g, _)| g),
        None => candidates.min_by_key(|g| g.start_time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameStatus;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn game(id: &str, home: &str, away: &str, start: DateTime<Utc>) -> Game {
        Game {
            id: id.into(),
            sport: Sport::Mlb,
            external_id: id.into(),
            home_team: home.into(),
            away_team: away.into(),
            start_time: start,
            status: GameStatus::Scheduled,
            home_score: None,
            away_score: None,
        }
    }

    #[test]
    fn matches_doubleheader_by_closest_start() {
        let t = Utc.with_ymd_and_hms(2026, 7, 4, 17, 0, 0).unwrap();
        let games = vec![
            game("g1", "new york yankees", "boston red sox", t),
            game("g2", "new york yankees", "boston red sox", t + ChronoDuration::hours(6)),
        ];
        let hit = match_game(&games, "boston red sox", "new york yankees", Some(t + ChronoDuration::hours(5)));
        assert_eq!(hit.map(|g| g.id.as_str()), Some("g2"));
    }

    #[test]
    fn rejects_events_outside_tolerance() {
        let t = Utc.with_ymd_and_hms(2026, 7, 4, 17, 0, 0).unwrap();
        let games = vec![game("g1", "a", "b", t)];
        assert!(match_game(&games, "a", "b", Some(t + ChronoDuration::hours(13))).is_none());
        assert!(match_game(&games, "a", "c", Some(t)).is_none());
        assert!(match_game(&games, "a", "b", None).is_some());
    }
}
