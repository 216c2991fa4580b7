use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::types::{CollectionRun, Game, MarketQuote, PersistMsg};

/// Receives PersistMsgs from the orchestrator and writes them to SQLite.
/// Runs as a dedicated background task; collection never waits on it.
pub struct DbWriter {
    pool: sqlx::SqlitePool,
    rx: mpsc::Receiver<PersistMsg>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(pool: sqlx::SqlitePool, rx: mpsc::Receiver<PersistMsg>, health: Arc<HealthState>) -> Self {
        Self { pool, rx, health }
    }

    /// Drains until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            if let Err(e) = self.write(&msg).await {
                self.health.inc_persist_errors();
                error!("DB write error: {e}");
            }
        }
        debug!("DB writer stopped");
    }

    async fn write(&self, msg: &PersistMsg) -> Result<()> {
        match msg {
            PersistMsg::Games(games) => self.write_games(games).await,
            PersistMsg::Quotes { game_id, quotes } => self.replace_quotes(game_id, quotes).await,
            PersistMsg::Run(run) => self.write_run(run).await,
        }
    }

    async fn write_games(&self, games: &[Game]) -> Result<()> {
        let updated_at = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for g in games {
            sqlx::query(
                r#"
                INSERT INTO games (
                    id, sport, external_id, home_team, away_team,
                    start_time, status, home_score, away_score, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    home_team = excluded.home_team,
                    away_team = excluded.away_team,
                    start_time = excluded.start_time,
                    status = excluded.status,
                    home_score = excluded.home_score,
                    away_score = excluded.away_score,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&g.id)
            .bind(g.sport.as_str())
            .bind(&g.external_id)
            .bind(&g.home_team)
            .bind(&g.away_team)
            .bind(g.start_time.timestamp_millis())
            .bind(g.status.to_string())
            .bind(g.home_score.map(i64::from))
            .bind(g.away_score.map(i64::from))
            .bind(updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete and reinsert inside one transaction so a reader never sees a half-written set.
    async fn replace_quotes(&self, game_id: &str, quotes: &[MarketQuote]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM market_quotes WHERE game_id = ?")
            .bind(game_id)
            .execute(&mut *tx)
            .await?;
        for q in quotes {
            sqlx::query(
                r#"
                INSERT INTO market_quotes (game_id, market, side, book, price, line, observed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&q.game_id)
            .bind(q.market.to_string())
            .bind(q.side.to_string())
            .bind(&q.book)
            .bind(q.price)
            .bind(q.line)
            .bind(q.observed_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_run(&self, run: &CollectionRun) -> Result<()> {
        let steps = serde_json::to_string(&run.steps)?;
        sqlx::query(
            r#"
            INSERT INTO collection_runs (
                run_id, sport, kind, started_at, duration_ms, outcome,
                games_touched, interrupted, steps
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id as i64)
        .bind(run.sport.as_str())
        .bind(run.kind.to_string())
        .bind(run.started_at.timestamp_millis())
        .bind(run.duration_ms as i64)
        .bind(run.outcome.to_string())
        .bind(run.games_touched as i64)
        .bind(i64::from(run.interrupted))
        .bind(steps)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models;
    use crate::providers::fake;
    use crate::state::GameStore;
    use crate::types::{CycleOutcome, MarketType, RunKind, Side, Sport, StepReport};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> sqlx::SqlitePool {
        // One connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn drain(pool: &sqlx::SqlitePool, msgs: Vec<PersistMsg>) -> Arc<HealthState> {
        let (tx, rx) = mpsc::channel(16);
        let health = Arc::new(HealthState::new());
        let writer = DbWriter::new(pool.clone(), rx, Arc::clone(&health));
        for m in msgs {
            tx.send(m).await.unwrap();
        }
        drop(tx);
        writer.run().await;
        health
    }

    #[tokio::test]
    async fn quote_sets_replace_and_reload() {
        let pool = memory_pool().await;
        let games = fake::slate(Sport::Nfl, &["1", "2"]);
        let first = vec![
            fake::quote("nfl:1", MarketType::Spread, Side::Home, "dk", -110.0, Some(-3.5)),
            fake::quote("nfl:1", MarketType::Spread, Side::Away, "dk", -110.0, Some(3.5)),
        ];
        let second = vec![fake::quote("nfl:1", MarketType::Moneyline, Side::Home, "fd", -150.0, None)];

        let health = drain(
            &pool,
            vec![
                PersistMsg::Games(games.clone()),
                PersistMsg::Games(games),
                PersistMsg::Quotes { game_id: "nfl:1".into(), quotes: first },
                PersistMsg::Quotes { game_id: "nfl:1".into(), quotes: second },
            ],
        )
        .await;
        assert_eq!(health.persist_errors(), 0);

        let store = GameStore::new();
        let (games, quotes) = models::load_into(&pool, &store).await.unwrap();
        assert_eq!((games, quotes), (2, 1));
        let loaded = store.quotes_for("nfl:1");
        assert_eq!(loaded[0].book, "fd");
        assert_eq!(loaded[0].price, -150.0);
        assert_eq!(store.get_game("nfl:2").unwrap().away_team, "away 1");
    }

    #[tokio::test]
    async fn runs_are_recorded_with_steps() {
        let pool = memory_pool().await;
        let run = CollectionRun {
            id: 7,
            sport: Sport::Mlb,
            kind: RunKind::OddsRefresh,
            started_at: Utc::now(),
            duration_ms: 42,
            steps: vec![StepReport::succeeded(crate::types::Step::Schedule, 3)],
            games_touched: 3,
            outcome: CycleOutcome::Success,
            interrupted: false,
        };
        drain(&pool, vec![PersistMsg::Run(run)]).await;

        let (outcome, kind, steps): (String, String, String) =
            sqlx::query_as("SELECT outcome, kind, steps FROM collection_runs WHERE run_id = 7")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(outcome, "success");
        assert_eq!(kind, "odds_refresh");
        assert!(steps.contains("\"step\":\"schedule\""));
    }

    #[tokio::test]
    async fn write_failures_are_counted() {
        let pool = memory_pool().await;
        sqlx::query("DROP TABLE market_quotes").execute(&pool).await.unwrap();
        let health = drain(&pool, vec![PersistMsg::Quotes { game_id: "nba:1".into(), quotes: vec![] }]).await;
        assert_eq!(health.persist_errors(), 1);
    }
}
