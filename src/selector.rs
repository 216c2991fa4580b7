//! Best available price per side across books, for game markets and props.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{BestLine, BestQuote, MarketQuote, MarketType, PlayerProp, Side};

/// Lines compared in hundredths so 3.5 and 3.50 group together.
#[inline]
fn line_key(line: f64) -> i64 {
    (line * 100.0).round() as i64
}

/// Best quote per side for one game+market, or None when no quote applies.
///
/// Spread/total sides only compare quotes posted at that side's most common
/// line; the rest are counted in `excluded_off_market`. Ties on price go to
/// the most recent observation, then to the lexically smallest book.
pub fn select_best_line(game_id: &str, market: MarketType, quotes: &[MarketQuote]) -> Option<BestLine> {
    let mut sides = Vec::with_capacity(2);
    let mut excluded = 0usize;

    for side in market.sides() {
        let side_quotes: Vec<&MarketQuote> = quotes
            .iter()
            .filter(|q| q.game_id == game_id && q.market == market && q.side == side)
            .collect();
        if side_quotes.is_empty() {
            continue;
        }

        let eligible: Vec<&MarketQuote> = if market.has_line() {
            let Some(modal) = modal_line(side_quotes.iter().map(|q| (q.line, q.observed_at))) else {
                excluded += side_quotes.len();
                continue;
            };
            let (at_line, off): (Vec<&MarketQuote>, Vec<&MarketQuote>) = side_quotes
                .into_iter()
                .partition(|q| q.line.map(line_key) == Some(modal));
            excluded += off.len();
            at_line
        } else {
            side_quotes
        };

        if let Some(best) = eligible.into_iter().reduce(|a, b| if better(b, a) { b } else { a }) {
            sides.push(BestQuote {
                side,
                book: best.book.clone(),
                price: best.price,
                line: best.line,
                observed_at: best.observed_at,
            });
        }
    }

    if sides.is_empty() {
        return None;
    }
    Some(BestLine { game_id: game_id.to_string(), market, sides, excluded_off_market: excluded })
}

/// True when `a` should be preferred over `b`.
fn better(a: &MarketQuote, b: &MarketQuote) -> bool {
    match a.price.total_cmp(&b.price) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match a.observed_at.cmp(&b.observed_at) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a.book < b.book,
        },
    }
}

/// Best-priced prop for one side among `props`, which should all be the same
/// player and market. Only props at the most common line compete, with the
/// same tie-breaks as [`select_best_line`]. Props without a line compete only
/// when no book posts one.
pub fn select_best_prop<'a>(props: &[&'a PlayerProp], side: Side) -> Option<&'a PlayerProp> {
    let priced: Vec<(&PlayerProp, f64)> =
        props.iter().filter_map(|p| p.price_for(side).map(|price| (*p, price))).collect();
    let modal = modal_line(priced.iter().map(|(p, _)| (p.line, prop_observed(p))));

    priced
        .into_iter()
        .filter(|(p, _)| modal.is_none() || p.line.map(line_key) == modal)
        .reduce(|a, b| if prop_better(b, a) { b } else { a })
        .map(|(p, _)| p)
}

fn prop_observed(p: &PlayerProp) -> DateTime<Utc> {
    p.observed_at.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn prop_better(a: (&PlayerProp, f64), b: (&PlayerProp, f64)) -> bool {
    match a.1.total_cmp(&b.1) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match prop_observed(a.0).cmp(&prop_observed(b.0)) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a.0.book < b.0.book,
        },
    }
}

/// Most-quoted line; ties go to the freshest observation, then the line
/// closest to zero, then the smaller line.
fn modal_line(lines: impl IntoIterator<Item = (Option<f64>, DateTime<Utc>)>) -> Option<i64> {
    let mut groups: HashMap<i64, (usize, DateTime<Utc>)> = HashMap::new();
    for (line, observed_at) in lines {
        let Some(line) = line else { continue };
        let entry = groups.entry(line_key(line)).or_insert((0, observed_at));
        entry.0 += 1;
        entry.1 = entry.1.max(observed_at);
    }

    groups
        .into_iter()
        .max_by(|(la, (ca, ta)), (lb, (cb, tb))| {
            ca.cmp(cb)
                .then_with(|| ta.cmp(tb))
                .then_with(|| lb.abs().cmp(&la.abs()))
                .then_with(|| lb.cmp(la))
        })
        .map(|(line, _)| line)
}
