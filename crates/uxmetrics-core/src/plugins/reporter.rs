//! Hands finished metrics to a reporting transport.

use std::fmt;
use std::rc::Rc;
use tracing::debug;

use crate::events::MetricEvent;
use crate::metric::Metric;
use crate::plugin::{Plugin, PluginResult};
use crate::transport::Transport;

pub const REPORTER_KEY: &str = "reporter";

/// Enqueues the metric's snapshot on the transport every time it stops.
///
/// Install it after the plugins whose results should be reported: plugins
/// run in table order, so anything after the reporter has not yet handled
/// `stop` when the snapshot is taken.
pub struct ReporterPlugin {
    transport: Rc<dyn Transport>,
    reported: usize,
}

impl ReporterPlugin {
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self {
            transport,
            reported: 0,
        }
    }

    /// Number of snapshots handed to the transport.
    pub fn reported(&self) -> usize {
        self.reported
    }
}

impl fmt::Debug for ReporterPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterPlugin")
            .field("reported", &self.reported)
            .finish()
    }
}

impl Plugin for ReporterPlugin {
    fn name(&self) -> &str {
        REPORTER_KEY
    }

    fn events(&self) -> &'static [MetricEvent] {
        &[MetricEvent::Stop]
    }

    fn on_stop(&mut self, metric: &Metric) -> PluginResult {
        let snapshot = metric.snapshot();
        // delivery outcome is the transport's concern
        let _ = self.transport.enqueue(snapshot);
        self.reported += 1;
        debug!(metric = %metric.name(), "metric handed to transport");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{InteractionMetric, MetricSnapshot};
    use crate::plugin::{plugin_table, PluginHandle};
    use std::cell::RefCell;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct Recording {
        sent: RefCell<Vec<MetricSnapshot>>,
    }

    impl Transport for Recording {
        fn enqueue(&self, snapshot: MetricSnapshot) -> oneshot::Receiver<bool> {
            self.sent.borrow_mut().push(snapshot);
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(true);
            rx
        }
    }

    #[test]
    fn enqueues_snapshot_on_each_stop() {
        let transport = Rc::new(Recording::default());
        let handle = PluginHandle::new(ReporterPlugin::new(transport.clone()));
        let metric = Metric::new("search", plugin_table([(REPORTER_KEY, handle.clone())]));

        metric.start_at(0.0);
        metric.stop_at(5.0);
        metric.stop_at(9.0);
        metric.reset();
        metric.start_at(10.0);
        metric.stop_at(12.0);

        let sent = transport.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].duration, 5.0);
        assert_eq!(sent[1].duration, 2.0);
        assert!(!sent[0].plugins.contains_key(REPORTER_KEY));
        assert_eq!(handle.with_plugin(|p: &ReporterPlugin| p.reported()), Some(2));
    }

    #[test]
    fn interaction_snapshot_includes_outcome() {
        let transport = Rc::new(Recording::default());
        let interaction = InteractionMetric::new(
            "submit",
            plugin_table([(REPORTER_KEY, PluginHandle::new(ReporterPlugin::new(transport.clone())))]),
        );

        interaction.start_at(0.0);
        interaction.fail_at(None, 3.0);

        let sent = transport.sent.borrow();
        let outcome = sent[0].outcome.clone().unwrap();
        assert!(outcome.failed);
        assert!(!outcome.succeeded);
    }
}
