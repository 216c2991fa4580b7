use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::state::freshness::FreshnessCache;
use crate::types::{Game, MarketQuote, Sport};

/// Committed view of games and their quote sets.
///
/// Games are keyed by `"{sport}:{external_id}"` so re-fetching a schedule
/// upserts in place. Each game's quotes live behind one `Arc<Vec<_>>` that is
/// swapped whole on refresh; a reader holds either the old set or the new
/// one, never a mix.
pub struct GameStore {
    games: DashMap<String, Game>,
    quotes: DashMap<String, Arc<Vec<MarketQuote>>>,
    /// Last successful schedule fetch per sport.
    schedule_fetched: FreshnessCache<Sport, usize>,
}

impl GameStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            games: DashMap::new(),
            quotes: DashMap::new(),
            schedule_fetched: FreshnessCache::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Games
    // -----------------------------------------------------------------------

    /// Idempotent upsert. A game that is no longer open loses its quote set;
    /// returns the ids whose quotes were cleared.
    pub fn upsert_games(&self, games: &[Game]) -> Vec<String> {
        let mut cleared = Vec::new();
        for g in games {
            self.games.insert(g.id.clone(), g.clone());
            if !g.status.is_open() && self.quotes.remove(&g.id).is_some() {
                cleared.push(g.id.clone());
            }
        }
        cleared
    }

    /// Forget finished games of `sport` that started before `before`.
    pub fn prune_closed(&self, sport: Sport, before: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .games
            .iter()
            .filter(|g| g.sport == sport && !g.status.is_open() && g.start_time < before)
            .map(|g| g.id.clone())
            .collect();
        for id in &expired {
            self.games.remove(id);
            self.quotes.remove(id);
        }
        expired.len()
    }

    pub fn get_game(&self, game_id: &str) -> Option<Game> {
        self.games.get(game_id).map(|g| g.clone())
    }

    pub fn games_for_sport(&self, sport: Sport) -> Vec<Game> {
        let mut out: Vec<Game> = self
            .games
            .iter()
            .filter(|g| g.sport == sport)
            .map(|g| g.value().clone())
            .collect();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Open games (scheduled or live) starting on or before `until`, soonest first.
    /// Live games are kept even though their start is in the past.
    pub fn upcoming_games(&self, sport: Sport, now: DateTime<Utc>, until: DateTime<Utc>) -> Vec<Game> {
        self.games_for_sport(sport)
            .into_iter()
            .filter(|g| g.status.is_open() && g.start_time <= until)
            .filter(|g| g.start_time >= now || matches!(g.status, crate::types::GameStatus::Live))
            .collect()
    }

    /// Games an odds refresh should target: open games not already finished.
    pub fn odds_targets(&self, sport: Sport, until: DateTime<Utc>) -> Vec<Game> {
        self.games_for_sport(sport)
            .into_iter()
            .filter(|g| g.status.is_open() && g.start_time <= until)
            .collect()
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    // -----------------------------------------------------------------------
    // Quotes
    // -----------------------------------------------------------------------

    /// Replace a game's quote set wholesale. Quotes for another game are
    /// dropped; returns false (and writes nothing) when the game is unknown
    /// or no longer open.
    pub fn replace_quotes(&self, game_id: &str, quotes: Vec<MarketQuote>) -> bool {
        let open = self.games.get(game_id).is_some_and(|g| g.status.is_open());
        if !open {
            return false;
        }
        let quotes: Vec<MarketQuote> = quotes.into_iter().filter(|q| q.game_id == game_id).collect();
        self.quotes.insert(game_id.to_string(), Arc::new(quotes));
        true
    }

    /// Current quote set; empty when the game has never been priced.
    pub fn quotes_for(&self, game_id: &str) -> Arc<Vec<MarketQuote>> {
        self.quotes
            .get(game_id)
            .map(|q| Arc::clone(q.value()))
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Schedule freshness
    // -----------------------------------------------------------------------

    pub fn mark_schedule_refreshed(&self, sport: Sport, games: usize, stale_after: Duration) {
        self.schedule_fetched.put(sport, games, stale_after);
    }

    pub fn schedule_freshness(&self) -> &FreshnessCache<Sport, usize> {
        &self.schedule_fetched
    }
}
