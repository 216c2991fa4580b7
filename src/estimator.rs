//! Deterministic model probability used when a caller brings none.
//!
//! Moneyline blends the de-vigged market with a logistic team-strength prior,
//! spreads assume a zero-mean normal margin, totals are a coin flip.

use std::sync::Arc;

use crate::error::EvalError;
use crate::pricing::{implied_probability, remove_vig_two_way};
use crate::providers::teams::TeamDirectory;
use crate::types::{BestLine, Game, MarketType, Side, Sport};

/// Per-sport calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Std-dev of the final margin, in points/runs/goals
    pub spread_sigma: f64,
    /// Weight of the market-implied probability in the moneyline blend
    pub market_weight: f64,
    /// Logistic slope applied to the strength difference
    pub strength_slope: f64,
}

impl Calibration {
    pub fn for_sport(sport: Sport) -> Self {
        let (spread_sigma, market_weight, strength_slope) = match sport {
            Sport::Nfl => (13.0, 0.85, 3.0),
            Sport::Nba => (12.0, 0.88, 2.5),
            Sport::Mlb => (3.0, 0.90, 1.5),
            Sport::Nhl => (1.8, 0.90, 1.5),
            Sport::Cfb => (16.0, 0.80, 3.0),
        };
        Self { spread_sigma, market_weight, strength_slope }
    }
}

pub struct ProbabilityEstimator {
    teams: Arc<TeamDirectory>,
}

impl ProbabilityEstimator {
    pub fn new(teams: Arc<TeamDirectory>) -> Self {
        Self { teams }
    }

    pub fn estimate(&self, game: &Game, line: &BestLine, side: Side) -> Result<f64, EvalError> {
        if !line.market.sides().contains(&side) {
            return Err(EvalError::MetricsUnavailable(format!("side {side} does not apply to {} markets", line.market)));
        }
        let cal = Calibration::for_sport(game.sport);

        let p_first = match line.market {
            MarketType::Moneyline => self.moneyline_home(game, line, cal)?,
            MarketType::Spread => spread_home(line, cal)?,
            MarketType::Total => 0.5,
        };
        Ok(match side {
            Side::Home | Side::Over => p_first,
            Side::Away | Side::Under => 1.0 - p_first,
        })
    }

    fn moneyline_home(&self, game: &Game, line: &BestLine, cal: Calibration) -> Result<f64, EvalError> {
        let (home, away) = match (line.side(Side::Home), line.side(Side::Away)) {
            (Some(h), Some(a)) => (h, a),
            _ => {
                return Err(EvalError::MetricsUnavailable(format!(
                    "moneyline for {} is missing a side",
                    line.game_id
                )))
            }
        };
        let (fair_home, _) =
            remove_vig_two_way(implied_probability(home.price)?, implied_probability(away.price)?)?;

        let delta = self.teams.strength(game.sport, &game.home_team) - self.teams.strength(game.sport, &game.away_team);
        let prior = logistic(cal.strength_slope * delta);

        Ok(cal.market_weight * fair_home + (1.0 - cal.market_weight) * prior)
    }
}

/// `P(home covers) = 1 - Φ(-line / σ)`, from the home line or the mirrored away line.
fn spread_home(line: &BestLine, cal: Calibration) -> Result<f64, EvalError> {
    let home_line = line
        .side(Side::Home)
        .and_then(|q| q.line)
        .or_else(|| line.side(Side::Away).and_then(|q| q.line).map(|l| -l))
        .ok_or_else(|| EvalError::MetricsUnavailable(format!("no spread line for {}", line.game_id)))?;
    Ok(1.0 - normal_cdf(-home_line / cal.spread_sigma))
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26; absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}
