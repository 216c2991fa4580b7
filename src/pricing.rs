//! Odds conversion and bet-sizing math. Prices are American odds throughout.

use crate::error::PricingError;

/// Validate an American price and map -100 onto +100 (same payout).
pub fn normalize_price(price: f64) -> Result<f64, PricingError> {
    if !price.is_finite() || price.abs() < 100.0 {
        return Err(PricingError::InvalidPrice(price));
    }
    if price == -100.0 {
        return Ok(100.0);
    }
    Ok(price)
}

/// Decimal odds (stake included): -150 → 1.667, +130 → 2.30.
pub fn american_to_decimal(price: f64) -> Result<f64, PricingError> {
    let price = normalize_price(price)?;
    Ok(1.0 + net_multiple(price))
}

/// Profit per unit staked on a win.
fn net_multiple(price: f64) -> f64 {
    if price > 0.0 {
        price / 100.0
    } else {
        100.0 / price.abs()
    }
}

pub fn implied_probability(price: f64) -> Result<f64, PricingError> {
    let price = normalize_price(price)?;
    if price > 0.0 {
        Ok(100.0 / (price + 100.0))
    } else {
        Ok(price.abs() / (price.abs() + 100.0))
    }
}

pub fn check_probability(p: f64) -> Result<f64, PricingError> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(PricingError::InvalidProbability(p))
    }
}

pub fn edge(model_p: f64, implied_p: f64) -> Result<f64, PricingError> {
    Ok(check_probability(model_p)? - check_probability(implied_p)?)
}

/// Expected profit of a one-unit stake: win pays the net multiple, loss costs the unit.
pub fn ev_per_unit(model_p: f64, price: f64) -> Result<f64, PricingError> {
    let p = check_probability(model_p)?;
    let b = net_multiple(normalize_price(price)?);
    Ok(p * b - (1.0 - p))
}

/// Full Kelly `(b*p - q) / b`, clamped to `[0, cap]`. Never negative: a bet
/// with no edge is simply not recommended.
pub fn kelly_fraction(model_p: f64, price: f64, cap: f64) -> Result<f64, PricingError> {
    let p = check_probability(model_p)?;
    let cap = check_probability(cap)?;
    let b = net_multiple(normalize_price(price)?);
    let f_star = (b * p - (1.0 - p)) / b;
    Ok(f_star.clamp(0.0, cap))
}

/// Scale a two-way implied pair so it sums to one.
pub fn remove_vig_two_way(p1: f64, p2: f64) -> Result<(f64, f64), PricingError> {
    let p1 = check_probability(p1)?;
    let p2 = check_probability(p2)?;
    let total = p1 + p2;
    if total <= 0.0 {
        return Ok((0.5, 0.5));
    }
    Ok((p1 / total, p2 / total))
}
