use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// Sport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Nfl,
    Nba,
    Mlb,
    Nhl,
    Cfb,
}

impl Sport {
    pub const ALL: [Sport; 5] = [Sport::Nfl, Sport::Nba, Sport::Mlb, Sport::Nhl, Sport::Cfb];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Nfl => "nfl",
            Sport::Nba => "nba",
            Sport::Mlb => "mlb",
            Sport::Nhl => "nhl",
            Sport::Cfb => "cfb",
        }
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nfl" => Ok(Sport::Nfl),
            "nba" => Ok(Sport::Nba),
            "mlb" => Ok(Sport::Mlb),
            "nhl" => Ok(Sport::Nhl),
            "cfb" | "ncaaf" => Ok(Sport::Cfb),
            other => Err(format!("unknown sport '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Scheduled,
    Live,
    Completed,
    Postponed,
    Cancelled,
}

impl GameStatus {
    /// Games that can still take a bet.
    pub fn is_open(&self) -> bool {
        matches!(self, GameStatus::Scheduled | GameStatus::Live)
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::Live => "live",
            GameStatus::Completed => "completed",
            GameStatus::Postponed => "postponed",
            GameStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for GameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(GameStatus::Scheduled),
            "live" => Ok(GameStatus::Live),
            "completed" => Ok(GameStatus::Completed),
            "postponed" => Ok(GameStatus::Postponed),
            "cancelled" => Ok(GameStatus::Cancelled),
            other => Err(format!("unknown game status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    /// `"{sport}:{external_id}"`, stable across refreshes.
    pub id: String,
    pub sport: Sport,
    pub external_id: String,
    /// Canonical (alias-resolved) team names.
    pub home_team: String,
    pub away_team: String,
    pub start_time: DateTime<Utc>,
    pub status: GameStatus,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

impl Game {
    pub fn make_id(sport: Sport, external_id: &str) -> String {
        format!("{sport}:{external_id}")
    }

    /// True when the two canonical names are this game's participants, in either order.
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.home_team == a && self.away_team == b) || (self.home_team == b && self.away_team == a)
    }
}

/// Upper bound on any lookahead, in days.
pub const MAX_LOOKAHEAD_DAYS: i64 = 60;

/// Inclusive `[from, to]` time range a schedule fetch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl FetchWindow {
    /// From the start of today (UTC) through `days` days ahead, `days`
    /// clamped to `0..=MAX_LOOKAHEAD_DAYS`.
    pub fn lookahead(now: DateTime<Utc>, days: i64) -> Self {
        let from = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        Self { from, to: now + Duration::days(days.clamp(0, MAX_LOOKAHEAD_DAYS)) }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.from && t <= self.to
    }
}

// ---------------------------------------------------------------------------
// Markets and quotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Moneyline,
    Spread,
    Total,
}

impl MarketType {
    pub fn sides(&self) -> [Side; 2] {
        match self {
            MarketType::Moneyline | MarketType::Spread => [Side::Home, Side::Away],
            MarketType::Total => [Side::Over, Side::Under],
        }
    }

    /// Spread and total quotes are only comparable at the same line.
    pub fn has_line(&self) -> bool {
        !matches!(self, MarketType::Moneyline)
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketType::Moneyline => "moneyline",
            MarketType::Spread => "spread",
            MarketType::Total => "total",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "moneyline" | "h2h" | "ml" => Ok(MarketType::Moneyline),
            "spread" | "spreads" => Ok(MarketType::Spread),
            "total" | "totals" => Ok(MarketType::Total),
            other => Err(format!("unknown market '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
    Over,
    Under,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Side::Home => "home",
            Side::Away => "away",
            Side::Over => "over",
            Side::Under => "under",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "home" => Ok(Side::Home),
            "away" => Ok(Side::Away),
            "over" => Ok(Side::Over),
            "under" => Ok(Side::Under),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// One book's price for one side of one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub game_id: String,
    pub market: MarketType,
    pub side: Side,
    pub book: String,
    /// American odds, normalized so that -100 is stored as +100.
    pub price: f64,
    /// Spread or total line; None for moneyline.
    pub line: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestQuote {
    pub side: Side,
    pub book: String,
    pub price: f64,
    pub line: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

/// Derived on read from the current quote set; never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestLine {
    pub game_id: String,
    pub market: MarketType,
    pub sides: Vec<BestQuote>,
    /// Quotes left out because they were posted at an off-market line.
    pub excluded_off_market: usize,
}

impl BestLine {
    pub fn side(&self, side: Side) -> Option<&BestQuote> {
        self.sides.iter().find(|q| q.side == side)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProp {
    pub sport: Sport,
    pub game_id: Option<String>,
    pub player: String,
    /// Upstream market key, e.g. `player_pass_yards`.
    pub market: String,
    pub line: Option<f64>,
    pub over_price: Option<f64>,
    pub under_price: Option<f64>,
    pub book: String,
    pub observed_at: Option<DateTime<Utc>>,
}

impl PlayerProp {
    pub fn price_for(&self, side: Side) -> Option<f64> {
        match side {
            Side::Over => self.over_price,
            Side::Under => self.under_price,
            Side::Home | Side::Away => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pick metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickMetric {
    pub implied_probability: f64,
    pub model_probability: f64,
    pub edge: f64,
    pub ev_per_unit: f64,
    pub kelly_fraction: f64,
    pub price: f64,
    pub decimal_odds: f64,
    pub line: Option<f64>,
    pub book: Option<String>,
}

// ---------------------------------------------------------------------------
// Collection runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Schedule,
    Odds,
    Props,
    Persist,
}

impl Step {
    /// Order of steps inside one cycle. Odds depend on the schedule upsert.
    pub const SEQUENCE: [Step; 4] = [Step::Schedule, Step::Odds, Step::Props, Step::Persist];
    /// Odds-only refresh against games already in the store.
    pub const ODDS_REFRESH: [Step; 2] = [Step::Odds, Step::Persist];
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Step::Schedule => "schedule",
            Step::Odds => "odds",
            Step::Props => "props",
            Step::Persist => "persist",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    AuthFailed,
    SchemaMismatch,
    Unavailable,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::AuthFailed => "auth_failed",
            ProviderErrorKind::SchemaMismatch => "schema_mismatch",
            ProviderErrorKind::Unavailable => "unavailable",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded { count: usize },
    Failed { error: ProviderErrorKind, detail: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Step,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

impl StepReport {
    pub fn succeeded(step: Step, count: usize) -> Self {
        Self { step, outcome: StepOutcome::Succeeded { count } }
    }

    pub fn failed(step: Step, err: &ProviderError) -> Self {
        Self {
            step,
            outcome: StepOutcome::Failed { error: err.kind(), detail: err.to_string() },
        }
    }

    pub fn skipped(step: Step, reason: &str) -> Self {
        Self { step, outcome: StepOutcome::Skipped { reason: reason.to_string() } }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Failed { .. })
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.outcome, StepOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Success,
    Partial,
    Failed,
}

impl CycleOutcome {
    /// Success when nothing failed, Failed when nothing succeeded, Partial otherwise.
    pub fn classify(steps: &[StepReport]) -> Self {
        let failed = steps.iter().filter(|s| s.is_failed()).count();
        let succeeded = steps.iter().filter(|s| s.is_succeeded()).count();
        match (succeeded, failed) {
            (_, 0) => CycleOutcome::Success,
            (0, _) => CycleOutcome::Failed,
            _ => CycleOutcome::Partial,
        }
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleOutcome::Success => "success",
            CycleOutcome::Partial => "partial",
            CycleOutcome::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Schedule, odds, props, persist
    Full,
    /// Odds and persist only
    OddsRefresh,
}

impl RunKind {
    pub fn steps(&self) -> &'static [Step] {
        match self {
            RunKind::Full => &Step::SEQUENCE,
            RunKind::OddsRefresh => &Step::ODDS_REFRESH,
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunKind::Full => "full",
            RunKind::OddsRefresh => "odds_refresh",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub id: u64,
    pub sport: Sport,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepReport>,
    pub games_touched: usize,
    pub outcome: CycleOutcome,
    /// True when shutdown was observed before every step ran.
    pub interrupted: bool,
}

impl CollectionRun {
    pub fn step(&self, step: Step) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }
}

// ---------------------------------------------------------------------------
// Channel message types
// ---------------------------------------------------------------------------

/// Routed from the orchestrator to the storage writer.
#[derive(Debug, Clone)]
pub enum PersistMsg {
    Games(Vec<Game>),
    Quotes { game_id: String, quotes: Vec<MarketQuote> },
    Run(CollectionRun),
}
