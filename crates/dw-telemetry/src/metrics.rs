use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Names of the metrics driftwarden records.
pub mod names {
    pub const DRIFT_CHECKS_TOTAL: &str = "drift_checks_total";
    pub const DRIFT_ITEMS_FAILING: &str = "drift_items_failing";
    pub const DRIFT_CORRECTIONS_TOTAL: &str = "drift_corrections_total";
    pub const DRIFT_ALERTS_TOTAL: &str = "drift_alerts_total";
    pub const DRIFT_CYCLE_ERRORS_TOTAL: &str = "drift_cycle_errors_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "drift_publish_failures_total";
    pub const CHECK_DURATION_SECONDS: &str = "drift_check_duration_seconds";
    pub const CYCLE_DURATION_SECONDS: &str = "drift_cycle_duration_seconds";
}

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// A histogram that tracks the distribution of observed values across buckets.
#[derive(Debug)]
pub struct Histogram {
    pub buckets: Vec<f64>,
    pub counts: Vec<AtomicU64>,
    pub sum: AtomicU64,
    pub count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given bucket boundaries.
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value into the histogram.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        // f64 sum kept as bits so it can be updated with CAS
        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .sum
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        for (i, boundary) in self.buckets.iter().enumerate() {
            if value <= *boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Buckets (seconds) sized for remote probe calls and whole check cycles.
fn default_duration_buckets() -> Vec<f64> {
    vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0]
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A label set is a sorted list of key=value pairs, used to distinguish
/// series within one metric family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Format labels as `{key="value",key2="value2"}` for Prometheus output.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

type SeriesKey = (String, Labels);

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Central metrics collector supporting labelled counters and gauges plus
/// unlabelled histograms.
///
/// Series are registered lazily under a write lock; values are atomics so
/// the hot path only takes a read lock.
#[derive(Debug)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<SeriesKey, AtomicU64>>,
    gauges: RwLock<AHashMap<SeriesKey, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(AHashMap::new()),
            gauges: RwLock::new(AHashMap::new()),
            histograms: RwLock::new(AHashMap::new()),
        }
    }

    /// Create a collector with the drift duration histograms pre-registered.
    pub fn with_defaults() -> Self {
        let collector = Self::new();
        {
            let mut h = write(&collector.histograms);
            for name in [names::CHECK_DURATION_SECONDS, names::CYCLE_DURATION_SECONDS] {
                h.insert(name.to_string(), Histogram::new(default_duration_buckets()));
            }
        }
        collector
    }

    // -- Counters -----------------------------------------------------------

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_counter_by(name, labels, 1);
    }

    pub fn increment_counter_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let map = read(&self.counters);
            if let Some(c) = map.get(&key) {
                c.fetch_add(amount, Ordering::Relaxed);
                return;
            }
        }
        let mut map = write(&self.counters);
        map.entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.counters)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Gauges -------------------------------------------------------------

    /// Set a gauge series to an absolute value.
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let map = read(&self.gauges);
            if let Some(g) = map.get(&key) {
                g.store(value, Ordering::Relaxed);
                return;
            }
        }
        let mut map = write(&self.gauges);
        map.entry(key)
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn get_gauge(&self, name: &str, labels: &[(&str, &str)]) -> i64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.gauges)
            .get(&key)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Histograms ---------------------------------------------------------

    /// Record a value into a histogram, creating it with duration buckets
    /// on first use.
    pub fn record_histogram(&self, name: &str, value: f64) {
        {
            let map = read(&self.histograms);
            if let Some(h) = map.get(name) {
                h.observe(value);
                return;
            }
        }
        let mut map = write(&self.histograms);
        map.entry(name.to_string())
            .or_insert_with(|| Histogram::new(default_duration_buckets()))
            .observe(value);
    }

    /// `(count, sum)` of a histogram, zero when it was never recorded.
    pub fn histogram_stats(&self, name: &str) -> (u64, f64) {
        read(&self.histograms)
            .get(name)
            .map(|h| (h.get_count(), h.get_sum()))
            .unwrap_or((0, 0.0))
    }

    // -- Export --------------------------------------------------------------

    /// Export all metrics in Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();
        write_series(&mut out, "counter", &read(&self.counters), |v| {
            v.load(Ordering::Relaxed).to_string()
        });
        write_series(&mut out, "gauge", &read(&self.gauges), |v| {
            v.load(Ordering::Relaxed).to_string()
        });

        let map = read(&self.histograms);
        let mut names: Vec<&String> = map.keys().collect();
        names.sort();
        for name in names {
            let h = &map[name];
            out.push_str(&format!("# TYPE {} histogram\n", name));
            // observe() bumps every bucket whose bound is >= value, so the
            // stored counts are already cumulative
            for (i, boundary) in h.buckets.iter().enumerate() {
                let cumulative = h.counts[i].load(Ordering::Relaxed);
                out.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, boundary, cumulative));
            }
            out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, h.get_count()));
            out.push_str(&format!("{}_sum {}\n", name, h.get_sum()));
            out.push_str(&format!("{}_count {}\n", name, h.get_count()));
        }

        out
    }

    /// Export all metrics as a JSON value.
    pub fn export_json(&self) -> serde_json::Value {
        let series_key = |name: &String, labels: &Labels| {
            if labels.0.is_empty() {
                name.clone()
            } else {
                format!("{}{}", name, labels.prometheus_str())
            }
        };

        let counters: serde_json::Map<String, serde_json::Value> = read(&self.counters)
            .iter()
            .map(|((name, labels), v)| {
                (series_key(name, labels), serde_json::json!(v.load(Ordering::Relaxed)))
            })
            .collect();

        let gauges: serde_json::Map<String, serde_json::Value> = read(&self.gauges)
            .iter()
            .map(|((name, labels), v)| {
                (series_key(name, labels), serde_json::json!(v.load(Ordering::Relaxed)))
            })
            .collect();

        let histograms: serde_json::Map<String, serde_json::Value> = read(&self.histograms)
            .iter()
            .map(|(name, h)| {
                (
                    name.clone(),
                    serde_json::json!({ "sum": h.get_sum(), "count": h.get_count() }),
                )
            })
            .collect();

        serde_json::json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }
}

fn write_series<V>(
    out: &mut String,
    kind: &str,
    map: &AHashMap<SeriesKey, V>,
    render: impl Fn(&V) -> String,
) {
    let mut grouped: AHashMap<&str, Vec<(&Labels, String)>> = AHashMap::new();
    for ((name, labels), val) in map.iter() {
        grouped
            .entry(name.as_str())
            .or_default()
            .push((labels, render(val)));
    }
    let mut names: Vec<&str> = grouped.keys().copied().collect();
    names.sort();
    for name in names {
        out.push_str(&format!("# TYPE {} {}\n", name, kind));
        let mut entries = grouped.remove(name).unwrap_or_default();
        entries.sort_by_key(|(labels, _)| labels.prometheus_str());
        for (labels, value) in entries {
            out.push_str(&format!("{}{} {}\n", name, labels.prometheus_str(), value));
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::with_defaults()
    }
}
