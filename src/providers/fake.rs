//! In-memory providers for orchestrator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Notify;

use crate::error::ProviderError;
use crate::providers::{OddsProvider, PropsProvider, ProviderSet, ScheduleProvider};
use crate::types::{FetchWindow, Game, GameStatus, MarketQuote, MarketType, PlayerProp, Side, Sport};

pub fn game(sport: Sport, ext: &str, home: &str, away: &str, start: DateTime<Utc>) -> Game {
    Game {
        id: Game::make_id(sport, ext),
        sport,
        external_id: ext.to_string(),
        home_team: home.to_string(),
        away_team: away.to_string(),
        start_time: start,
        status: GameStatus::Scheduled,
        home_score: None,
        away_score: None,
    }
}

pub fn quote(game_id: &str, market: MarketType, side: Side, book: &str, price: f64, line: Option<f64>) -> MarketQuote {
    MarketQuote {
        game_id: game_id.to_string(),
        market,
        side,
        book: book.to_string(),
        price,
        line,
        observed_at: Utc::now(),
    }
}

/// Tomorrow's games for a sport, one per external id.
pub fn slate(sport: Sport, ids: &[&str]) -> Vec<Game> {
    let start = Utc::now() + ChronoDuration::days(1);
    ids.iter()
        .enumerate()
        .map(|(i, id)| game(sport, id, &format!("home {i}"), &format!("away {i}"), start))
        .collect()
}

#[derive(Default)]
pub struct FakeSchedule {
    pub games: Mutex<Vec<Game>>,
    pub error: Mutex<Option<ProviderError>>,
    /// When set, sports in `gated` wait on this before returning.
    pub gate: Option<Arc<Notify>>,
    pub gated: Vec<Sport>,
    /// Signalled once a gated call has started.
    pub entered: Arc<Notify>,
    pub calls: AtomicUsize,
}

impl FakeSchedule {
    pub fn with_games(games: Vec<Game>) -> Self {
        Self { games: Mutex::new(games), ..Default::default() }
    }
}

#[async_trait]
impl ScheduleProvider for FakeSchedule {
    fn name(&self) -> &'static str {
        "fake_schedule"
    }

    async fn fetch_schedule(&self, sport: Sport, _window: &FetchWindow) -> Result<Vec<Game>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if self.gated.contains(&sport) {
                self.entered.notify_one();
                gate.notified().await;
            }
        }
        if let Some(err) = self.error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.games.lock().unwrap().iter().filter(|g| g.sport == sport).cloned().collect())
    }
}

#[derive(Default)]
pub struct FakeOdds {
    pub quotes: Mutex<Vec<MarketQuote>>,
    pub error: Mutex<Option<ProviderError>>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl OddsProvider for FakeOdds {
    fn name(&self) -> &'static str {
        "fake_odds"
    }

    async fn fetch_odds(&self, _sport: Sport, _games: &[Game]) -> Result<Vec<MarketQuote>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if let Some(err) = self.error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.quotes.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeProps {
    pub props: Mutex<Vec<PlayerProp>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl PropsProvider for FakeProps {
    fn name(&self) -> &'static str {
        "fake_props"
    }

    async fn fetch_props(&self, _sport: Sport, _games: &[Game]) -> Result<Vec<PlayerProp>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.props.lock().unwrap().clone())
    }
}

pub struct Fakes {
    pub schedule: Arc<FakeSchedule>,
    pub odds: Arc<FakeOdds>,
    pub props: Arc<FakeProps>,
}

impl Fakes {
    pub fn new(schedule: FakeSchedule, odds: FakeOdds, props: FakeProps) -> Self {
        Self { schedule: Arc::new(schedule), odds: Arc::new(odds), props: Arc::new(props) }
    }

    pub fn set(&self) -> ProviderSet {
        ProviderSet {
            schedule: self.schedule.clone(),
            odds: self.odds.clone(),
            props: self.props.clone(),
        }
    }
}
