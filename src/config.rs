use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::types::{Sport, MAX_LOOKAHEAD_DAYS};

pub const ESPN_BASE_URL: &str = "https://site.api.espn.com/apis/site/v2/sports";
pub const ODDS_API_BASE_URL: &str = "https://api.the-odds-api.com/v4";
pub const SGO_BASE_URL: &str = "https://api.sportsgameodds.com/v2";

/// Channel capacity for the persistence handoff.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Seconds between scheduled collections of every enabled sport.
pub const COLLECT_INTERVAL_SECS: u64 = 1800;

/// Seconds between odds-only refreshes of games already in the store.
pub const ODDS_REFRESH_SECS: u64 = 300;

/// Props keep their own cadence: a cycle skips the props fetch while the cached
/// entry is younger than this.
pub const PROPS_CACHE_TTL_SECS: u64 = 300;

/// Maximum recommended bankroll fraction.
pub const KELLY_CAP: f64 = 0.05;

/// Odds API events matched to a schedule game must start within this many hours of it.
pub const MATCH_TOLERANCE_HOURS: i64 = 12;

/// Where a cycle gets player props from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropsSource {
    OddsApi,
    SportsGameOdds,
}

impl FromStr for PropsSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "oddsapi" | "odds_api" => Ok(PropsSource::OddsApi),
            "sgo" | "sportsgameodds" => Ok(PropsSource::SportsGameOdds),
            other => Err(format!("unknown props provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Sports collected every tick (SPORTS_ENABLED, comma-separated)
    pub sports: Vec<Sport>,
    pub collect_interval_secs: u64,
    /// Cadence of the odds-only refresh (ODDS_REFRESH_SECS)
    pub odds_refresh_secs: u64,
    /// Schedule lookahead in days (LOOKAHEAD_DAYS), 1..=MAX_LOOKAHEAD_DAYS
    pub lookahead_days: i64,
    /// Per-request timeout for every provider call (PROVIDER_TIMEOUT_SECS)
    pub provider_timeout_secs: u64,
    /// Outer bound on one provider step, retries included (STEP_TIMEOUT_SECS)
    pub step_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub props_cache_ttl_secs: u64,
    /// A sport's schedule counts as stale after this long without a successful fetch
    pub schedule_stale_secs: u64,
    /// Number of CollectionRun records kept in memory (RUN_HISTORY_LIMIT)
    pub run_history_limit: usize,
    pub kelly_cap: f64,
    /// Fraction of full Kelly recommended before the cap (KELLY_MULTIPLIER)
    pub kelly_multiplier: f64,
    pub espn_base_url: String,
    pub odds_api_base_url: String,
    pub odds_api_key: Option<String>,
    /// Odds API regions (ODDS_REGIONS), e.g. "us,us2"
    pub odds_regions: String,
    /// Optional bookmaker allow-list (ODDS_BOOKMAKERS, comma-separated)
    pub odds_bookmakers: Vec<String>,
    pub props_source: PropsSource,
    /// Max events per sport queried for props; each costs one Odds API request
    pub props_max_events: usize,
    pub sgo_base_url: String,
    pub sgo_api_key: Option<String>,
    /// JSON file with per-sport aliases, rosters and strengths (TEAM_ALIASES_PATH)
    pub team_aliases_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let sports: Vec<Sport> = match std::env::var("SPORTS_ENABLED") {
            Ok(raw) => raw.split(',').filter_map(|s| s.parse().ok()).collect(),
            Err(_) => Sport::ALL.to_vec(),
        };
        if sports.is_empty() {
            return Err(AppError::Config(
                "SPORTS_ENABLED must name at least one of nfl,nba,mlb,nhl,cfb".to_string(),
            ));
        }

        let collect_interval_secs = env_or("COLLECT_INTERVAL_SECS", COLLECT_INTERVAL_SECS).max(1);
        let props_source = match std::env::var("PROPS_PROVIDER") {
            Ok(raw) => raw.parse::<PropsSource>().map_err(AppError::Config)?,
            Err(_) => PropsSource::OddsApi,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "sharpline.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            sports,
            collect_interval_secs,
            odds_refresh_secs: env_or("ODDS_REFRESH_SECS", ODDS_REFRESH_SECS).max(1),
            lookahead_days: env_or("LOOKAHEAD_DAYS", 7i64).clamp(1, MAX_LOOKAHEAD_DAYS),
            provider_timeout_secs: env_or("PROVIDER_TIMEOUT_SECS", 15u64).max(1),
            step_timeout_secs: env_or("STEP_TIMEOUT_SECS", 120u64).max(1),
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", 3u32).clamp(1, 10),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", 250),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", 4000),
            props_cache_ttl_secs: env_or("PROPS_CACHE_TTL_SECS", PROPS_CACHE_TTL_SECS),
            schedule_stale_secs: env_or("SCHEDULE_STALE_SECS", collect_interval_secs.saturating_mul(2)),
            run_history_limit: env_or("RUN_HISTORY_LIMIT", 50usize).max(1),
            kelly_cap: env_fraction("KELLY_CAP", KELLY_CAP),
            kelly_multiplier: env_fraction("KELLY_MULTIPLIER", 1.0),
            espn_base_url: std::env::var("ESPN_BASE_URL")
                .unwrap_or_else(|_| ESPN_BASE_URL.to_string()),
            odds_api_base_url: std::env::var("ODDS_API_BASE_URL")
                .unwrap_or_else(|_| ODDS_API_BASE_URL.to_string()),
            odds_api_key: non_empty_var("ODDS_API_KEY"),
            odds_regions: std::env::var("ODDS_REGIONS").unwrap_or_else(|_| "us,us2".to_string()),
            odds_bookmakers: std::env::var("ODDS_BOOKMAKERS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            props_source,
            props_max_events: env_or("PROPS_MAX_EVENTS", 10usize),
            sgo_base_url: std::env::var("SGO_BASE_URL").unwrap_or_else(|_| SGO_BASE_URL.to_string()),
            sgo_api_key: non_empty_var("SGO_API_KEY"),
            team_aliases_path: non_empty_var("TEAM_ALIASES_PATH"),
        })
    }
}

/// Parse an env var, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// A value in [0, 1]. NaN and infinities fall back to `default`.
fn env_fraction(key: &str, default: f64) -> f64 {
    let v: f64 = env_or(key, default);
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        default
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn props_source_parses_aliases() {
        assert_eq!("sgo".parse::<PropsSource>(), Ok(PropsSource::SportsGameOdds));
        assert_eq!(" OddsApi ".parse::<PropsSource>(), Ok(PropsSource::OddsApi));
        assert!("fanduel".parse::<PropsSource>().is_err());
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        // Unique key so parallel tests never race on it.
        std::env::set_var("SHARPLINE_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("SHARPLINE_TEST_ENV_OR", 42u64), 42);
        std::env::set_var("SHARPLINE_TEST_ENV_OR", " 7 ");
        assert_eq!(env_or("SHARPLINE_TEST_ENV_OR", 42u64), 7);
        std::env::remove_var("SHARPLINE_TEST_ENV_OR");
    }

    #[test]
    fn non_finite_fractions_fall_back_to_default() {
        for raw in ["NaN", "inf", "-inf"] {
            std::env::set_var("SHARPLINE_TEST_FRACTION", raw);
            assert_eq!(env_fraction("SHARPLINE_TEST_FRACTION", 0.05), 0.05, "{raw}");
        }
        std::env::set_var("SHARPLINE_TEST_FRACTION", "3");
        assert_eq!(env_fraction("SHARPLINE_TEST_FRACTION", 0.05), 1.0);
        std::env::remove_var("SHARPLINE_TEST_FRACTION");
    }
}
