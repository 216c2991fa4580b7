pub mod freshness;
pub mod game_store;

pub use freshness::FreshnessCache;
pub use game_store::GameStore;
