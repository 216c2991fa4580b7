use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::collector::orchestrator::CollectionOrchestrator;
use crate::types::{RunKind, Sport};

const TRIGGER_QUEUE: usize = 64;

/// Cloneable handle used by the API to request an immediate cycle.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<Sport>,
}

impl SchedulerHandle {
    /// Queue a cycle for `sport`. False when the scheduler is gone or its queue is full.
    pub fn trigger(&self, sport: Sport) -> bool {
        self.trigger_tx.try_send(sport).is_ok()
    }
}

/// Periodic driver. Every `every`, one full cycle per configured sport; every
/// `odds_every` in between, an odds-only refresh per sport. Runs for different
/// sports proceed concurrently.
pub struct Scheduler {
    trigger_tx: mpsc::Sender<Sport>,
    shutdown_tx: watch::Sender<bool>,
    driver: JoinHandle<()>,
}

impl Scheduler {
    /// The first full tick fires immediately, so every sport is collected at
    /// boot. The first odds refresh waits one `odds_every`.
    pub fn start(
        orchestrator: Arc<CollectionOrchestrator>,
        sports: Vec<Sport>,
        every: Duration,
        odds_every: Duration,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let intervals = Intervals { every, odds_every };
        let driver = tokio::spawn(drive(orchestrator, sports, intervals, trigger_rx, shutdown_rx));
        Self { trigger_tx, shutdown_tx, driver }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { trigger_tx: self.trigger_tx.clone() }
    }

    /// Stop ticking, let in-flight cycles reach their persist step, then return.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.driver.await {
            warn!("Scheduler task ended abnormally: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Intervals {
    every: Duration,
    odds_every: Duration,
}

async fn drive(
    orchestrator: Arc<CollectionOrchestrator>,
    sports: Vec<Sport>,
    intervals: Intervals,
    mut trigger_rx: mpsc::Receiver<Sport>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(intervals.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut odds_ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + intervals.odds_every, intervals.odds_every);
    odds_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles: JoinSet<()> = JoinSet::new();

    info!(
        sports = ?sports,
        interval_secs = intervals.every.as_secs(),
        odds_interval_secs = intervals.odds_every.as_secs(),
        "Scheduler started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            _ = ticker.tick() => {
                for &sport in &sports {
                    spawn_run(&mut cycles, &orchestrator, sport, RunKind::Full);
                }
            }

            _ = odds_ticker.tick() => {
                for &sport in &sports {
                    spawn_run(&mut cycles, &orchestrator, sport, RunKind::OddsRefresh);
                }
            }

            Some(sport) = trigger_rx.recv() => {
                debug!(sport = %sport, "Manual collection trigger");
                spawn_run(&mut cycles, &orchestrator, sport, RunKind::Full);
            }

            Some(joined) = cycles.join_next() => {
                if let Err(e) = joined {
                    warn!("Collection task panicked: {e}");
                }
            }
        }
    }

    orchestrator.begin_shutdown();
    let in_flight = cycles.len();
    if in_flight > 0 {
        info!(in_flight, "Waiting for in-flight collection cycles");
    }
    while let Some(joined) = cycles.join_next().await {
        if let Err(e) = joined {
            warn!("Collection task panicked during shutdown: {e}");
        }
    }
    info!("Scheduler stopped");
}

fn spawn_run(cycles: &mut JoinSet<()>, orchestrator: &Arc<CollectionOrchestrator>, sport: Sport, kind: RunKind) {
    // Skip the spawn when the sport is busy; the run would coalesce anyway.
    if orchestrator.is_running(sport) {
        debug!(sport = %sport, kind = %kind, "Run already in flight; tick coalesced");
        return;
    }
    let orchestrator = Arc::clone(orchestrator);
    cycles.spawn(async move {
        let result = match kind {
            RunKind::Full => orchestrator.run_cycle(sport).await,
            RunKind::OddsRefresh => orchestrator.run_odds_refresh(sport).await,
        };
        if let Err(coalesced) = result {
            debug!("{coalesced}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::health::HealthState;
    use crate::api::latency::ProviderLatency;
    use crate::collector::orchestrator::CollectorSettings;
    use crate::providers::fake::{self, FakeOdds, FakeProps, FakeSchedule, Fakes};
    use crate::state::GameStore;
    use std::sync::atomic::Ordering;

    const HOUR: Duration = Duration::from_secs(3600);

    fn orchestrator(fakes: &Fakes) -> Arc<CollectionOrchestrator> {
        CollectionOrchestrator::new(
            fakes.set(),
            GameStore::new(),
            Arc::new(ProviderLatency::new()),
            Arc::new(HealthState::new()),
            None,
            CollectorSettings {
                lookahead_days: 7,
                props_ttl: Duration::from_secs(300),
                schedule_stale_after: Duration::from_secs(3600),
                step_timeout: Duration::from_secs(5),
                run_history_limit: 50,
            },
        )
    }

    async fn wait_for_runs(orch: &CollectionOrchestrator, n: usize) {
        for _ in 0..200 {
            if orch.recent_runs(None).len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} runs, saw {}", orch.recent_runs(None).len());
    }

    #[tokio::test]
    async fn boot_tick_collects_every_sport() {
        let mut games = fake::slate(Sport::Nfl, &["1"]);
        games.extend(fake::slate(Sport::Nba, &["2"]));
        let fakes = Fakes::new(FakeSchedule::with_games(games), FakeOdds::default(), FakeProps::default());
        let orch = orchestrator(&fakes);

        let scheduler = Scheduler::start(Arc::clone(&orch), vec![Sport::Nfl, Sport::Nba], HOUR, HOUR);
        wait_for_runs(&orch, 2).await;
        scheduler.shutdown().await;

        assert_eq!(orch.recent_runs(Some(Sport::Nfl)).len(), 1);
        assert_eq!(orch.recent_runs(Some(Sport::Nba)).len(), 1);
        assert_eq!(orch.store().game_count(), 2);
    }

    #[tokio::test]
    async fn manual_trigger_runs_a_cycle() {
        let fakes = Fakes::new(FakeSchedule::default(), FakeOdds::default(), FakeProps::default());
        let orch = orchestrator(&fakes);

        let scheduler = Scheduler::start(Arc::clone(&orch), vec![], HOUR, HOUR);
        assert!(scheduler.handle().trigger(Sport::Mlb));
        wait_for_runs(&orch, 1).await;
        scheduler.shutdown().await;

        assert_eq!(orch.recent_runs(Some(Sport::Mlb)).len(), 1);
        assert_eq!(fakes.schedule.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_cycles() {
        let odds = FakeOdds { delay: Some(Duration::from_millis(100)), ..Default::default() };
        let fakes = Fakes::new(
            FakeSchedule::with_games(fake::slate(Sport::Nhl, &["1"])),
            odds,
            FakeProps::default(),
        );
        let orch = orchestrator(&fakes);

        let scheduler = Scheduler::start(Arc::clone(&orch), vec![Sport::Nhl], HOUR, HOUR);
        for _ in 0..200 {
            if fakes.odds.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        scheduler.shutdown().await;

        // The cycle finished and was recorded before shutdown returned.
        let runs = orch.recent_runs(Some(Sport::Nhl));
        assert_eq!(runs.len(), 1);
        assert!(runs[0].interrupted);
        assert!(!orch.is_running(Sport::Nhl));
    }

    #[tokio::test]
    async fn odds_ticker_refreshes_between_full_cycles() {
        let fakes = Fakes::new(
            FakeSchedule::with_games(fake::slate(Sport::Nba, &["1"])),
            FakeOdds::default(),
            FakeProps::default(),
        );
        let orch = orchestrator(&fakes);

        let scheduler = Scheduler::start(Arc::clone(&orch), vec![Sport::Nba], HOUR, Duration::from_millis(40));
        for _ in 0..200 {
            if orch.recent_runs(None).iter().any(|r| r.kind == RunKind::OddsRefresh) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.shutdown().await;

        let runs = orch.recent_runs(Some(Sport::Nba));
        assert!(runs.iter().any(|r| r.kind == RunKind::OddsRefresh));
        assert_eq!(runs.iter().filter(|r| r.kind == RunKind::Full).count(), 1);
        assert_eq!(fakes.schedule.calls.load(Ordering::SeqCst), 1);
        assert!(fakes.odds.calls.load(Ordering::SeqCst) >= 2);
    }
}
