use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::health::{combined_stale_ratio, HealthReport, HealthState, SportStatus};
use crate::api::latency::ProviderLatency;
use crate::config::Config;
use crate::error::{CycleCoalesced, ProviderError};
use crate::providers::teams::normalize;
use crate::providers::ProviderSet;
use crate::state::{FreshnessCache, GameStore};
use crate::types::{
    CollectionRun, CycleOutcome, FetchWindow, Game, MarketQuote, PersistMsg, PlayerProp, RunKind, Sport, Step,
    StepReport, MAX_LOOKAHEAD_DAYS,
};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub lookahead_days: i64,
    pub props_ttl: Duration,
    pub schedule_stale_after: Duration,
    /// Whole-step bound on a provider call, retries included
    pub step_timeout: Duration,
    pub run_history_limit: usize,
}

impl CollectorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            lookahead_days: cfg.lookahead_days,
            props_ttl: Duration::from_secs(cfg.props_cache_ttl_secs),
            schedule_stale_after: Duration::from_secs(cfg.schedule_stale_secs),
            step_timeout: Duration::from_secs(cfg.step_timeout_secs),
            run_history_limit: cfg.run_history_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingGames {
    pub sport: Sport,
    pub games: Vec<Game>,
    /// None until the first successful schedule fetch for this sport
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropMatch {
    #[serde(flatten)]
    pub prop: PlayerProp,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

/// Releases the per-sport slot when a cycle ends, including on panic or cancellation.
struct RunningGuard<'a> {
    running: &'a DashSet<Sport>,
    sport: Sport,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.sport);
    }
}

/// Runs collection cycles: schedule, odds, props, then the persistence handoff.
///
/// At most one run per sport is in flight, full or odds-only; a second request
/// for a busy sport returns [`CycleCoalesced`] immediately. Provider failures are recorded on
/// the step that saw them and never abort the remaining steps.
pub struct CollectionOrchestrator {
    providers: ProviderSet,
    store: Arc<GameStore>,
    props: FreshnessCache<Sport, Arc<Vec<PlayerProp>>>,
    latency: Arc<ProviderLatency>,
    health: Arc<HealthState>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    settings: CollectorSettings,
    running: DashSet<Sport>,
    runs: Mutex<VecDeque<CollectionRun>>,
    next_run_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl CollectionOrchestrator {
    pub fn new(
        providers: ProviderSet,
        store: Arc<GameStore>,
        latency: Arc<ProviderLatency>,
        health: Arc<HealthState>,
        persist_tx: Option<mpsc::Sender<PersistMsg>>,
        settings: CollectorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            providers,
            store,
            props: FreshnessCache::new(),
            latency,
            health,
            persist_tx,
            settings,
            running: DashSet::new(),
            runs: Mutex::new(VecDeque::new()),
            next_run_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<GameStore> {
        &self.store
    }

    pub fn is_running(&self, sport: Sport) -> bool {
        self.running.contains(&sport)
    }

    /// In-flight cycles stop at their next step boundary; persistence still runs.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    /// Full cycle: schedule, odds, props, persist.
    pub async fn run_cycle(&self, sport: Sport) -> Result<CollectionRun, CycleCoalesced> {
        self.run(sport, RunKind::Full).await
    }

    /// Odds and persist only, against games already in the store. Shares the
    /// per-sport gate with full cycles.
    pub async fn run_odds_refresh(&self, sport: Sport) -> Result<CollectionRun, CycleCoalesced> {
        self.run(sport, RunKind::OddsRefresh).await
    }

    async fn run(&self, sport: Sport, kind: RunKind) -> Result<CollectionRun, CycleCoalesced> {
        if !self.running.insert(sport) {
            debug!(sport = %sport, kind = %kind, "Collection already running; coalesced");
            return Err(CycleCoalesced { sport });
        }
        let _guard = RunningGuard { running: &self.running, sport };

        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();
        let clock = Instant::now();
        let window = FetchWindow::lookahead(started_at, self.settings.lookahead_days);

        let mut steps = Vec::with_capacity(kind.steps().len());
        let mut interrupted = false;
        let mut games: Vec<Game> = Vec::new();
        let mut quote_sets: Vec<(String, Vec<MarketQuote>)> = Vec::new();

        for &step in kind.steps() {
            if matches!(step, Step::Odds | Step::Props) && self.is_shutting_down() {
                interrupted = true;
                steps.push(StepReport::skipped(step, "shutdown"));
                continue;
            }
            let report = match step {
                Step::Schedule => self.schedule_step(sport, &window, &mut games, &mut quote_sets).await,
                Step::Odds => self.odds_step(sport, &window, &mut quote_sets).await,
                Step::Props => self.props_step(sport, &window).await,
                Step::Persist => self.persist_step(&games, &quote_sets),
            };
            steps.push(report);
        }

        let touched: HashSet<&str> = games
            .iter()
            .map(|g| g.id.as_str())
            .chain(quote_sets.iter().map(|(id, _)| id.as_str()))
            .collect();
        let outcome = CycleOutcome::classify(&steps);
        let run = CollectionRun {
            id,
            sport,
            kind,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            steps,
            games_touched: touched.len(),
            outcome,
            interrupted,
        };

        self.send_persist(PersistMsg::Run(run.clone()));
        self.record_run(run.clone());
        self.health.record_cycle(Utc::now(), outcome);

        info!(
            sport = %sport,
            kind = %kind,
            run_id = id,
            outcome = %outcome,
            games_touched = run.games_touched,
            duration_ms = run.duration_ms,
            interrupted,
            "Collection run finished"
        );
        Ok(run)
    }

    fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::days(self.settings.lookahead_days.clamp(0, MAX_LOOKAHEAD_DAYS))
    }

    /// Bound a provider call by the step timeout and record its latency.
    async fn call_provider<T>(
        &self,
        provider: &str,
        step: Step,
        fut: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.settings.step_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Timeout { after_ms: self.settings.step_timeout.as_millis() as u64 }),
        };
        self.latency.record(&format!("{provider}.{step}"), start.elapsed());
        result
    }

    /// Upsert the fetched schedule. Games that closed since the last fetch have
    /// their quote sets cleared, and the empty sets go out for persistence.
    async fn schedule_step(
        &self,
        sport: Sport,
        window: &FetchWindow,
        out: &mut Vec<Game>,
        quote_sets: &mut Vec<(String, Vec<MarketQuote>)>,
    ) -> StepReport {
        let provider = &self.providers.schedule;
        match self.call_provider(provider.name(), Step::Schedule, provider.fetch_schedule(sport, window)).await {
            Ok(fetched) => {
                let fetched: Vec<Game> = fetched.into_iter().filter(|g| g.sport == sport).collect();
                let n = fetched.len();
                let cleared = self.store.upsert_games(&fetched);
                if !cleared.is_empty() {
                    debug!(sport = %sport, cleared = cleared.len(), "Cleared quotes for closed games");
                }
                quote_sets.extend(cleared.into_iter().map(|id| (id, Vec::new())));

                let pruned = self.store.prune_closed(sport, window.from - self.lookahead());
                if pruned > 0 {
                    debug!(sport = %sport, pruned, "Pruned finished games");
                }
                self.store.mark_schedule_refreshed(sport, n, self.settings.schedule_stale_after);
                *out = fetched;
                StepReport::succeeded(Step::Schedule, n)
            }
            Err(e) => {
                warn!(sport = %sport, step = %Step::Schedule, error = %e, "Schedule fetch failed");
                StepReport::failed(Step::Schedule, &e)
            }
        }
    }

    /// Replace every targeted game's quote set. A game the feed no longer
    /// prices ends up with an empty set; quotes for unknown games are dropped.
    async fn odds_step(
        &self,
        sport: Sport,
        window: &FetchWindow,
        out: &mut Vec<(String, Vec<MarketQuote>)>,
    ) -> StepReport {
        let targets = self.store.odds_targets(sport, window.to);
        if targets.is_empty() {
            return StepReport::skipped(Step::Odds, "no open games");
        }

        let provider = &self.providers.odds;
        let quotes = match self.call_provider(provider.name(), Step::Odds, provider.fetch_odds(sport, &targets)).await {
            Ok(q) => q,
            Err(e) => {
                warn!(sport = %sport, step = %Step::Odds, error = %e, "Odds fetch failed; keeping previous quotes");
                return StepReport::failed(Step::Odds, &e);
            }
        };

        let mut by_game: BTreeMap<String, Vec<MarketQuote>> =
            targets.iter().map(|g| (g.id.clone(), Vec::new())).collect();
        let mut orphans = 0usize;
        for q in quotes {
            match by_game.get_mut(&q.game_id) {
                Some(set) => set.push(q),
                None => orphans += 1,
            }
        }
        if orphans > 0 {
            debug!(sport = %sport, orphans, "Dropped quotes for games outside the refresh set");
        }

        let mut written = 0usize;
        for (game_id, set) in by_game {
            if self.store.replace_quotes(&game_id, set.clone()) {
                written += set.len();
                out.push((game_id, set));
            }
        }
        StepReport::succeeded(Step::Odds, written)
    }

    async fn props_step(&self, sport: Sport, window: &FetchWindow) -> StepReport {
        if self.props.is_fresh(&sport) {
            return StepReport::skipped(Step::Props, "cache fresh");
        }

        let games = self.store.odds_targets(sport, window.to);
        let provider = &self.providers.props;
        match self.call_provider(provider.name(), Step::Props, provider.fetch_props(sport, &games)).await {
            Ok(props) => {
                let n = props.len();
                self.props.put(sport, Arc::new(props), self.settings.props_ttl);
                StepReport::succeeded(Step::Props, n)
            }
            Err(e) => {
                warn!(sport = %sport, step = %Step::Props, error = %e, "Props fetch failed; serving cached props");
                StepReport::failed(Step::Props, &e)
            }
        }
    }

    fn persist_step(&self, games: &[Game], quote_sets: &[(String, Vec<MarketQuote>)]) -> StepReport {
        if self.persist_tx.is_none() {
            return StepReport::skipped(Step::Persist, "no storage sink");
        }
        if games.is_empty() && quote_sets.is_empty() {
            return StepReport::skipped(Step::Persist, "nothing to persist");
        }

        let mut msgs = Vec::with_capacity(1 + quote_sets.len());
        if !games.is_empty() {
            msgs.push(PersistMsg::Games(games.to_vec()));
        }
        for (game_id, quotes) in quote_sets {
            msgs.push(PersistMsg::Quotes { game_id: game_id.clone(), quotes: quotes.clone() });
        }

        let total = msgs.len();
        let sent = msgs.into_iter().filter(|m| self.send_persist(m.clone())).count();
        if sent < total {
            let err = ProviderError::Unavailable {
                detail: format!("storage queue rejected {} of {total} messages", total - sent),
                transient: true,
            };
            return StepReport::failed(Step::Persist, &err);
        }
        StepReport::succeeded(Step::Persist, sent)
    }

    fn send_persist(&self, msg: PersistMsg) -> bool {
        let Some(tx) = &self.persist_tx else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                self.health.inc_persist_dropped();
                warn!("Storage channel rejected message: {e}");
                false
            }
        }
    }

    fn record_run(&self, run: CollectionRun) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.push_back(run);
            while runs.len() > self.settings.run_history_limit {
                runs.pop_front();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Most recent first.
    pub fn recent_runs(&self, sport: Option<Sport>) -> Vec<CollectionRun> {
        let Ok(runs) = self.runs.lock() else {
            return Vec::new();
        };
        runs.iter().rev().filter(|r| sport.map_or(true, |s| r.sport == s)).cloned().collect()
    }

    pub fn upcoming_games(&self, sport: Sport) -> UpcomingGames {
        let now = Utc::now();
        let until = now + self.lookahead();
        let freshness = self.store.schedule_freshness().get(&sport);
        UpcomingGames {
            sport,
            games: self.store.upcoming_games(sport, now, until),
            fetched_at: freshness.as_ref().map(|c| c.written_at),
            stale: freshness.map_or(true, |c| c.stale),
        }
    }

    /// Case- and punctuation-insensitive substring match on player name over
    /// the cached props, stale entries included.
    pub fn search_props(&self, player: &str, sport: Option<Sport>, market: Option<&str>) -> Vec<PropMatch> {
        let needle = normalize(player);
        let mut out = Vec::new();
        for (cached_sport, cached) in self.props.snapshot() {
            if sport.is_some_and(|s| s != cached_sport) {
                continue;
            }
            for prop in cached.value.iter() {
                if market.is_some_and(|m| m != prop.market) {
                    continue;
                }
                if !normalize(&prop.player).contains(&needle) {
                    continue;
                }
                out.push(PropMatch { prop: prop.clone(), fetched_at: cached.written_at, stale: cached.stale });
            }
        }
        out.sort_by(|a, b| {
            a.prop
                .player
                .cmp(&b.prop.player)
                .then_with(|| a.prop.market.cmp(&b.prop.market))
                .then_with(|| a.prop.book.cmp(&b.prop.book))
        });
        out
    }

    pub fn health_report(&self, sports: &[Sport]) -> HealthReport {
        let now = Utc::now();
        let runs = self.recent_runs(None);

        let per_sport_status = sports
            .iter()
            .map(|&sport| {
                let last = runs.iter().find(|r| r.sport == sport);
                let status = SportStatus {
                    running: self.is_running(sport),
                    last_outcome: last.map(|r| r.outcome),
                    last_run_at: last.map(|r| r.started_at),
                    schedule_stale: self.store.schedule_freshness().get_at(&sport, now).map(|c| c.stale),
                    props_stale: self.props.get_at(&sport, now).map(|c| c.stale),
                };
                (sport, status)
            })
            .collect();

        HealthReport {
            last_collect_timestamp: self.health.last_collect_at(),
            stale_ratio: combined_stale_ratio(&[
                self.store.schedule_freshness().stale_counts_at(now),
                self.props.stale_counts_at(now),
            ]),
            schedule_stale_ratio: self.store.schedule_freshness().stale_ratio(),
            props_stale_ratio: self.props.stale_ratio(),
            per_sport_status,
            games_held: self.store.game_count(),
            cycles_total: self.health.cycles_total(),
            cycles_failed: self.health.cycles_failed(),
            persist_dropped: self.health.persist_dropped(),
            persist_errors: self.health.persist_errors(),
            provider_latency: self.latency.summary(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
