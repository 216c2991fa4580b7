use std::sync::Arc;

use tracing::debug;

use crate::error::EvalError;
use crate::estimator::ProbabilityEstimator;
use crate::pricing::{american_to_decimal, check_probability, edge, ev_per_unit, implied_probability, kelly_fraction};
use crate::selector::select_best_line;
use crate::state::GameStore;
use crate::types::{BestLine, MarketType, PickMetric, PlayerProp, Side};

/// Turns a price plus a model probability into edge, EV and a capped stake.
pub struct PickEvaluator {
    store: Arc<GameStore>,
    estimator: ProbabilityEstimator,
    kelly_cap: f64,
    /// Applied to full Kelly before the cap
    kelly_multiplier: f64,
}

impl PickEvaluator {
    pub fn new(store: Arc<GameStore>, estimator: ProbabilityEstimator, kelly_cap: f64, kelly_multiplier: f64) -> Self {
        Self {
            store,
            estimator,
            kelly_cap: unit_or_zero(kelly_cap),
            kelly_multiplier: unit_or_zero(kelly_multiplier),
        }
    }

    pub fn evaluate_price(
        &self,
        price: f64,
        model_probability: f64,
        line: Option<f64>,
        book: Option<String>,
    ) -> Result<PickMetric, EvalError> {
        let p = check_probability(model_probability)?;
        let implied = implied_probability(price)?;
        let full = kelly_fraction(p, price, 1.0)?;

        Ok(PickMetric {
            implied_probability: implied,
            model_probability: p,
            edge: edge(p, implied)?,
            ev_per_unit: ev_per_unit(p, price)?,
            kelly_fraction: (full * self.kelly_multiplier).min(self.kelly_cap),
            price,
            decimal_odds: american_to_decimal(price)?,
            line,
            book,
        })
    }

    pub fn best_line(&self, game_id: &str, market: MarketType) -> Option<BestLine> {
        let quotes = self.store.quotes_for(game_id);
        select_best_line(game_id, market, &quotes)
    }

    /// Metrics at the best available price for one side. Without a model
    /// probability the estimator supplies one.
    pub fn evaluate_best_line(
        &self,
        game_id: &str,
        market: MarketType,
        side: Side,
        model_probability: Option<f64>,
    ) -> Result<PickMetric, EvalError> {
        if let Some(p) = model_probability {
            check_probability(p)?;
        }
        let unavailable = || EvalError::MetricsUnavailable(format!("no {market} price for {side} in {game_id}"));

        let line = self.best_line(game_id, market).ok_or_else(unavailable)?;
        let quote = line.side(side).ok_or_else(unavailable)?;

        let p = match model_probability {
            Some(p) => p,
            None => {
                let game = self
                    .store
                    .get_game(game_id)
                    .ok_or_else(|| EvalError::MetricsUnavailable(format!("unknown game {game_id}")))?;
                let p = self.estimator.estimate(&game, &line, side)?;
                debug!(game_id, market = %market, side = %side, p, "Estimated model probability");
                p
            }
        };
        self.evaluate_price(quote.price, p, quote.line, Some(quote.book.clone()))
    }

    pub fn evaluate_prop(&self, prop: &PlayerProp, side: Side, model_probability: f64) -> Result<PickMetric, EvalError> {
        check_probability(model_probability)?;
        let price = prop.price_for(side).ok_or_else(|| {
            EvalError::MetricsUnavailable(format!("{} {} has no {side} price", prop.player, prop.market))
        })?;
        self.evaluate_price(price, model_probability, prop.line, Some(prop.book.clone()))
    }
}

/// Clamp to [0, 1]; NaN and infinities become 0 so no stake is recommended.
fn unit_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
