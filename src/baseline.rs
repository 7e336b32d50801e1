use std::collections::{BTreeMap, HashMap};

use crate::config::BaselineConfig;
use crate::types::{BaselineSnapshot, MetricId};

/// Dual-horizon exponential state for one metric
#[derive(Debug, Clone, Default)]
pub struct BaselineAccumulator {
    pub short: f64,
    pub long: f64,
    pub variance: f64,
    pub initialized: bool,
    pub elapsed_secs: f64,
    pub samples: u64,
    /// Latched once readiness is first reached
    ready: bool,
}

/// Short/long EMA baselines per metric.
///
/// `short` reacts within `tau_short`, `long` and its variance within
/// `tau_long`. Decay constants derive from the elapsed time between samples,
/// so irregular arrival does not skew the estimate.
pub struct BaselineTracker {
    tau_short: f64,
    tau_long: f64,
    ready_secs: f64,
    min_dt: f64,
    elapsed_cap: f64,
    min_long: f64,
    accumulators: HashMap<MetricId, BaselineAccumulator>,
}

impl BaselineTracker {
    pub fn new(config: &BaselineConfig) -> Self {
        Self {
            tau_short: config.tau_short_secs,
            tau_long: config.tau_long_secs,
            ready_secs: config.ready_secs,
            min_dt: config.min_dt_secs,
            elapsed_cap: config.elapsed_cap_factor * config.tau_long_secs,
            min_long: config.min_long,
            accumulators: HashMap::new(),
        }
    }

    pub fn update(&mut self, metric: MetricId, value: f64, dt_secs: f64) {
        if !value.is_finite() {
            tracing::debug!(metric = %metric, value, "Ignoring non-finite baseline sample");
            return;
        }
        let dt = if dt_secs.is_finite() { dt_secs.max(self.min_dt) } else { self.min_dt };

        let acc = self.accumulators.entry(metric).or_default();
        acc.samples += 1;

        if !acc.initialized {
            acc.short = value;
            acc.long = value;
            acc.variance = 0.0;
            acc.initialized = true;
            return;
        }

        let alpha_short = 1.0 - (-dt / self.tau_short).exp();
        let alpha_long = 1.0 - (-dt / self.tau_long).exp();

        acc.short += alpha_short * (value - acc.short);
        let delta = value - acc.long;
        acc.long += alpha_long * delta;
        acc.variance = ((1.0 - alpha_long) * acc.variance + alpha_long * delta * delta).max(0.0);
        acc.elapsed_secs = (acc.elapsed_secs + dt).min(self.elapsed_cap);

        if !acc.ready && acc.elapsed_secs >= self.ready_secs && acc.long.abs() > self.min_long {
            acc.ready = true;
            tracing::debug!(metric = %metric, long = acc.long, "Baseline ready");
        }
    }

    pub fn snapshot(&self, metric: MetricId) -> BaselineSnapshot {
        match self.accumulators.get(&metric) {
            Some(acc) => BaselineSnapshot {
                short: acc.short,
                long: acc.long,
                std: acc.variance.sqrt(),
                samples: acc.samples,
                ready: acc.ready,
            },
            None => BaselineSnapshot::default(),
        }
    }

    pub fn snapshots(&self) -> BTreeMap<MetricId, BaselineSnapshot> {
        self.accumulators
            .keys()
            .map(|metric| (*metric, self.snapshot(*metric)))
            .collect()
    }

    pub fn accumulator(&self, metric: MetricId) -> Option<&BaselineAccumulator> {
        self.accumulators.get(&metric)
    }

    pub fn reset(&mut self) {
        self.accumulators.clear();
    }
}
