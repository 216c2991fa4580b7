//! Per-provider call latency, recorded by the orchestrator and read by /health.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Milliseconds, 1ms to 10min, 3 significant figures.
const MAX_TRACKABLE_MS: u64 = 600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Keyed by `"{provider}.{step}"`, e.g. `espn.schedule`.
#[derive(Default)]
pub struct ProviderLatency {
    inner: Mutex<BTreeMap<String, Histogram<u64>>>,
}

impl ProviderLatency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, d: Duration) {
        let ms = (d.as_millis().min(u128::from(MAX_TRACKABLE_MS)) as u64).max(1);
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        if !map.contains_key(key) {
            let Ok(h) = Histogram::new_with_bounds(1, MAX_TRACKABLE_MS, 3) else {
                return;
            };
            map.insert(key.to_string(), h);
        }
        if let Some(h) = map.get_mut(key) {
            let _ = h.record(ms);
        }
    }

    pub fn summary(&self) -> BTreeMap<String, LatencySummary> {
        let Ok(map) = self.inner.lock() else {
            return BTreeMap::new();
        };
        map.iter()
            .filter(|(_, h)| h.len() > 0)
            .map(|(k, h)| {
                (
                    k.clone(),
                    LatencySummary {
                        samples: h.len(),
                        p50_ms: h.value_at_quantile(0.5),
                        p95_ms: h.value_at_quantile(0.95),
                        p99_ms: h.value_at_quantile(0.99),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_per_key() {
        let lat = ProviderLatency::new();
        for ms in 1..=100 {
            lat.record("espn.schedule", Duration::from_millis(ms));
        }
        lat.record("odds_api.odds", Duration::from_micros(10));

        let s = lat.summary();
        let espn = s["espn.schedule"];
        assert_eq!(espn.samples, 100);
        assert!((49..=51).contains(&espn.p50_ms));
        assert!(espn.p99_ms >= espn.p95_ms && espn.p95_ms >= espn.p50_ms);
        // Sub-millisecond calls clamp to the 1ms floor.
        assert_eq!(s["odds_api.odds"].p50_ms, 1);
    }

    #[test]
    fn empty_has_no_entries() {
        assert!(ProviderLatency::new().summary().is_empty());
    }
}
