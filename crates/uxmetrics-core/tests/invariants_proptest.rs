//! Property tests for the timing invariants of metrics and experiences.

use proptest::prelude::*;
use uxmetrics_core::{ExperienceMetric, Metric, MetricStatus, PluginTable};

fn time() -> impl Strategy<Value = f64> {
    (0u32..1_000_000).prop_map(|t| f64::from(t) / 8.0)
}

proptest! {
    #[test]
    fn first_start_wins(times in prop::collection::vec(time(), 1..8)) {
        let metric = Metric::new("m", PluginTable::new());
        for t in &times {
            metric.start_at(*t);
        }
        prop_assert_eq!(metric.start_time(), times[0]);
        prop_assert_eq!(metric.status(), MetricStatus::InProgress);
    }

    #[test]
    fn duration_is_stop_minus_start(start in time(), delta in time(), late in time()) {
        let metric = Metric::new("m", PluginTable::new());
        metric.start_at(start);
        metric.stop_at(start + delta);
        metric.stop_at(start + delta + late);

        prop_assert_eq!(metric.stop_time(), start + delta);
        prop_assert_eq!(metric.duration(), metric.stop_time() - metric.start_time());
    }

    #[test]
    fn experience_spans_min_start_to_max_stop(
        spans in prop::collection::vec((time(), time()), 1..6),
        order in any::<prop::sample::Index>(),
    ) {
        let children: Vec<Metric> = (0..spans.len())
            .map(|i| Metric::new(format!("child-{i}"), PluginTable::new()))
            .collect();
        let experience = ExperienceMetric::new("e", children.clone(), PluginTable::new());

        // start in a rotated order, stop in index order
        let shift = order.index(spans.len());
        for i in 0..spans.len() {
            let i = (i + shift) % spans.len();
            children[i].start_at(spans[i].0);
        }
        for (child, (start, length)) in children.iter().zip(&spans) {
            prop_assert_ne!(experience.status(), MetricStatus::Complete);
            child.stop_at(start + length);
        }

        let min_start = spans.iter().map(|s| s.0).fold(f64::INFINITY, f64::min);
        let max_stop = spans.iter().map(|s| s.0 + s.1).fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(experience.status(), MetricStatus::Complete);
        prop_assert_eq!(experience.start_time(), min_start);
        prop_assert_eq!(experience.stop_time(), max_stop);
        prop_assert_eq!(experience.duration(), max_stop - min_start);
    }

    #[test]
    fn reset_always_returns_to_idle(ops in prop::collection::vec(0u8..3, 0..20)) {
        let metric = Metric::new("m", PluginTable::new());
        let mut t = 0.0;
        for op in ops {
            t += 1.0;
            match op {
                0 => { metric.start_at(t); }
                1 => { metric.stop_at(t); }
                _ => metric.reset(),
            }
        }
        metric.reset();
        prop_assert_eq!(metric.status(), MetricStatus::Idle);
        prop_assert_eq!(metric.start_time(), 0.0);
        prop_assert_eq!(metric.stop_time(), 0.0);
        prop_assert_eq!(metric.duration(), 0.0);
    }
}
