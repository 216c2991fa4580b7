//! Row types for the SQLite schema in `migrations/`, and the boot-time loader
//! that rebuilds the in-memory store from them.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::state::GameStore;
use crate::types::{Game, MarketQuote};

#[derive(Debug, sqlx::FromRow)]
pub struct GameRow {
    pub id: String,
    pub sport: String,
    pub external_id: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: i64,
    pub status: String,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct QuoteRow {
    pub game_id: String,
    pub market: String,
    pub side: String,
    pub book: String,
    pub price: f64,
    pub line: Option<f64>,
    pub observed_at: i64,
}

impl GameRow {
    /// None when a stored enum or timestamp no longer parses.
    pub fn into_game(self) -> Option<Game> {
        Some(Game {
            sport: self.sport.parse().ok()?,
            status: self.status.parse().ok()?,
            start_time: from_millis(self.start_time)?,
            home_score: self.home_score.and_then(|s| u32::try_from(s).ok()),
            away_score: self.away_score.and_then(|s| u32::try_from(s).ok()),
            id: self.id,
            external_id: self.external_id,
            home_team: self.home_team,
            away_team: self.away_team,
        })
    }
}

impl QuoteRow {
    pub fn into_quote(self) -> Option<MarketQuote> {
        Some(MarketQuote {
            market: self.market.parse().ok()?,
            side: self.side.parse().ok()?,
            observed_at: from_millis(self.observed_at)?,
            game_id: self.game_id,
            book: self.book,
            price: self.price,
            line: self.line,
        })
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Hydrate `store` with every committed game and quote set.
/// Returns `(games, quotes)` loaded.
pub async fn load_into(pool: &sqlx::SqlitePool, store: &GameStore) -> Result<(usize, usize)> {
    let game_rows: Vec<GameRow> = sqlx::query_as(
        r#"
        SELECT id, sport, external_id, home_team, away_team,
               start_time, status, home_score, away_score
        FROM games
        "#,
    )
    .fetch_all(pool)
    .await?;

    let total_games = game_rows.len();
    let games: Vec<Game> = game_rows.into_iter().filter_map(GameRow::into_game).collect();
    if games.len() < total_games {
        warn!(skipped = total_games - games.len(), "Skipped unreadable game rows");
    }
    store.upsert_games(&games);

    let quote_rows: Vec<QuoteRow> = sqlx::query_as(
        r#"
        SELECT game_id, market, side, book, price, line, observed_at
        FROM market_quotes
        ORDER BY game_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_game: std::collections::BTreeMap<String, Vec<MarketQuote>> = Default::default();
    for q in quote_rows.into_iter().filter_map(QuoteRow::into_quote) {
        by_game.entry(q.game_id.clone()).or_default().push(q);
    }
    let mut quotes = 0;
    for (game_id, set) in by_game {
        let n = set.len();
        if store.replace_quotes(&game_id, set) {
            quotes += n;
        }
    }

    info!(games = games.len(), quotes, "Loaded committed state from database");
    Ok((games.len(), quotes))
}
