//! Interaction metrics: a metric that finishes with a success or failure.

use serde_json::Value;
use std::ops::Deref;
use std::rc::Rc;
use tracing::trace;

use super::base::{Metric, MetricStatus, Outcome, Variant};
use crate::clock::{default_clock, Clock};
use crate::events::MetricEvent;
use crate::plugin::PluginTable;

/// A metric whose terminal transition records a reliability outcome.
///
/// `succeed` and `fail` replace a plain `stop`. Both are subject to the same
/// in-progress guard as `stop`, and on an ignored call nothing changes: the
/// outcome fields are only written when the timing transition is accepted.
/// On an accepted call listeners observe `stop` first, then `success` or
/// `failure`.
#[derive(Debug, Clone)]
pub struct InteractionMetric {
    metric: Metric,
}

impl InteractionMetric {
    pub fn new(name: impl Into<String>, plugins: PluginTable) -> Self {
        Self::with_clock(name, plugins, default_clock())
    }

    pub fn with_clock(name: impl Into<String>, plugins: PluginTable, clock: Rc<dyn Clock>) -> Self {
        Self {
            metric: Metric::build(name.into(), plugins, clock, Variant::Interaction),
        }
    }

    pub fn succeed(&self, payload: Option<Value>) -> bool {
        self.succeed_at(payload, self.metric.now())
    }

    pub fn succeed_at(&self, payload: Option<Value>, time: f64) -> bool {
        self.finish(true, payload, time)
    }

    pub fn fail(&self, payload: Option<Value>) -> bool {
        self.fail_at(payload, self.metric.now())
    }

    pub fn fail_at(&self, payload: Option<Value>, time: f64) -> bool {
        self.finish(false, payload, time)
    }

    pub fn succeeded(&self) -> bool {
        self.outcome().map(|o| o.succeeded).unwrap_or(false)
    }

    pub fn failed(&self) -> bool {
        self.outcome().map(|o| o.failed).unwrap_or(false)
    }

    pub fn data(&self) -> Option<Value> {
        self.outcome().and_then(|o| o.data)
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    fn finish(&self, success: bool, payload: Option<Value>, time: f64) -> bool {
        if self.metric.status() != MetricStatus::InProgress {
            trace!(metric = %self.metric.name(), success, "ignoring outcome, interaction not in progress");
            return false;
        }

        self.metric.set_outcome(Outcome {
            succeeded: success,
            failed: !success,
            data: payload,
        });

        let (status, event) = if success {
            (MetricStatus::Complete, MetricEvent::Success)
        } else {
            (MetricStatus::Failed, MetricEvent::Failure)
        };
        if !self.metric.stop_with(time, status) {
            return false;
        }
        // a stop listener may have reset the metric
        if self.metric.status() != status {
            trace!(metric = %self.metric.name(), ?event, "outcome dropped, interaction changed during stop");
            return true;
        }
        self.metric.emit(event);
        true
    }
}

impl Deref for InteractionMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

impl From<InteractionMetric> for Metric {
    fn from(interaction: InteractionMetric) -> Self {
        interaction.metric
    }
}

impl From<&InteractionMetric> for Metric {
    fn from(interaction: &InteractionMetric) -> Self {
        interaction.metric.clone()
    }
}
