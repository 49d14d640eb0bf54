use std::sync::Arc;

use dw_telemetry::metrics::{names, MetricsCollector};

#[test]
fn concurrent_counter_increments_are_not_lost() {
    let m = Arc::new(MetricsCollector::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                let env = if i % 2 == 0 { "dev" } else { "staging" };
                for _ in 0..250 {
                    m.increment_counter(names::DRIFT_CHECKS_TOTAL, &[("environment", env)]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread");
    }

    assert_eq!(m.get_counter(names::DRIFT_CHECKS_TOTAL, &[("environment", "dev")]), 1000);
    assert_eq!(m.get_counter(names::DRIFT_CHECKS_TOTAL, &[("environment", "staging")]), 1000);
}

#[test]
fn histogram_buckets_are_cumulative_in_export() {
    let m = MetricsCollector::with_defaults();
    m.record_histogram(names::CHECK_DURATION_SECONDS, 0.07);
    m.record_histogram(names::CHECK_DURATION_SECONDS, 3.0);

    let out = m.export_prometheus();
    assert!(out.contains("drift_check_duration_seconds_bucket{le=\"0.05\"} 0"));
    assert!(out.contains("drift_check_duration_seconds_bucket{le=\"0.1\"} 1"));
    assert!(out.contains("drift_check_duration_seconds_bucket{le=\"5\"} 2"));
    assert!(out.contains("drift_check_duration_seconds_bucket{le=\"+Inf\"} 2"));
}

#[test]
fn defaults_register_duration_histograms() {
    let out = MetricsCollector::default().export_prometheus();
    assert!(out.contains("# TYPE drift_cycle_duration_seconds histogram"));
    assert!(out.contains("drift_cycle_duration_seconds_count 0"));
}

