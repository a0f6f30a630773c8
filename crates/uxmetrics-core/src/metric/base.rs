//! Metric state machine.
//!
//! A metric is a named timer that emits an event for every accepted
//! transition. Transitions that do not apply to the current status are
//! ignored rather than reported as errors.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> InProgress -> (Complete | Failed)
//!   ^__________ reset() from any state ______|
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let metric = Metric::new("search", PluginTable::new());
//! metric.start();
//! // ... later
//! metric.stop();
//! assert_eq!(metric.status(), MetricStatus::Complete);
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

use super::experience::Aggregation;
use super::snapshot::MetricSnapshot;
use crate::clock::{default_clock, Clock};
use crate::events::{Emitter, ListenerId, MetricEvent};
use crate::plugin::{PluginHandle, PluginTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricStatus {
    #[default]
    Idle,
    InProgress,
    Complete,
    /// Terminal status of an interaction that reported a failure.
    Failed,
}

impl MetricStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, MetricStatus::Complete | MetricStatus::Failed)
    }
}

/// Reliability outcome recorded by an interaction metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub succeeded: bool,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Which flavour of metric a handle refers to.
pub(crate) enum Variant {
    Basic,
    Interaction,
    Experience(Rc<Aggregation>),
}

#[derive(Debug, Clone, Default)]
struct MetricState {
    start_time: f64,
    stop_time: f64,
    duration: f64,
    status: MetricStatus,
    outcome: Outcome,
}

struct MetricInner {
    name: String,
    clock: Rc<dyn Clock>,
    state: RefCell<MetricState>,
    events: Emitter<MetricEvent, Metric>,
    plugins: PluginTable,
    variant: Variant,
}

/// Handle to a metric.
///
/// Cloning is cheap and every clone observes and drives the same metric.
/// No internal borrow is held while events are emitted, so listeners and
/// plugins may read the metric or call back into it; the status guards make
/// such re-entrant calls harmless.
#[derive(Clone)]
pub struct Metric {
    inner: Rc<MetricInner>,
}

impl Metric {
    /// Create a metric on the shared default clock.
    pub fn new(name: impl Into<String>, plugins: PluginTable) -> Self {
        Self::with_clock(name, plugins, default_clock())
    }

    pub fn with_clock(name: impl Into<String>, plugins: PluginTable, clock: Rc<dyn Clock>) -> Self {
        Self::build(name.into(), plugins, clock, Variant::Basic)
    }

    pub(crate) fn build(
        name: String,
        plugins: PluginTable,
        clock: Rc<dyn Clock>,
        variant: Variant,
    ) -> Self {
        let metric = Self {
            inner: Rc::new(MetricInner {
                name,
                clock,
                state: RefCell::new(MetricState::default()),
                events: Emitter::new(),
                plugins,
                variant,
            }),
        };

        for plugin in metric.inner.plugins.values() {
            plugin.register(&metric);
        }
        metric
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn start_time(&self) -> f64 {
        self.inner.state.borrow().start_time
    }

    pub fn stop_time(&self) -> f64 {
        self.inner.state.borrow().stop_time
    }

    pub fn duration(&self) -> f64 {
        self.inner.state.borrow().duration
    }

    pub fn status(&self) -> MetricStatus {
        self.inner.state.borrow().status
    }

    /// Current time on this metric's clock.
    pub fn now(&self) -> f64 {
        self.inner.clock.now()
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.inner.clock)
    }

    /// The recorded outcome, for interaction metrics only.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.inner.variant {
            Variant::Interaction => Some(self.inner.state.borrow().outcome.clone()),
            _ => None,
        }
    }

    pub fn plugins(&self) -> &PluginTable {
        &self.inner.plugins
    }

    pub fn plugin(&self, key: &str) -> Option<&PluginHandle> {
        self.inner.plugins.get(key)
    }

    pub fn plugin_keys(&self) -> impl Iterator<Item = &str> {
        self.inner.plugins.keys().map(String::as_str)
    }

    pub fn is_experience(&self) -> bool {
        matches!(self.inner.variant, Variant::Experience(_))
    }

    pub fn is_interaction(&self) -> bool {
        matches!(self.inner.variant, Variant::Interaction)
    }

    /// Whether both handles refer to the same metric instance.
    pub fn ptr_eq(&self, other: &Metric) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&self) -> bool {
        self.start_at(self.now())
    }

    /// Start the metric at `time`. Ignored unless the metric is idle.
    pub fn start_at(&self, time: f64) -> bool {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.status != MetricStatus::Idle {
                trace!(metric = %self.inner.name, status = ?state.status, "ignoring start");
                return false;
            }
            state.start_time = time;
            state.status = MetricStatus::InProgress;
        }
        debug!(metric = %self.inner.name, start_time = time, "metric started");
        self.emit(MetricEvent::Start);
        true
    }

    pub fn stop(&self) -> bool {
        self.stop_at(self.now())
    }

    pub fn stop_at(&self, time: f64) -> bool {
        self.stop_with(time, MetricStatus::Complete)
    }

    /// Stop the metric at `time` with a terminal `status`.
    /// Ignored unless the metric is in progress.
    ///
    /// Stopping an experience first stops every in-progress child at `time`.
    /// When that completes the experience, the aggregation has already
    /// stopped it at the latest child stop.
    pub fn stop_with(&self, time: f64, status: MetricStatus) -> bool {
        if !status.is_finished() {
            warn!(metric = %self.inner.name, ?status, "stop requires a terminal status");
            return false;
        }

        if let Variant::Experience(aggregation) = &self.inner.variant {
            if self.status() != MetricStatus::InProgress {
                trace!(metric = %self.inner.name, status = ?self.status(), "ignoring stop");
                return false;
            }
            for child in aggregation.children() {
                if child.status() == MetricStatus::InProgress {
                    child.stop_at(time);
                }
            }
            if self.status() != MetricStatus::InProgress {
                return true;
            }
        }

        let duration = {
            let mut state = self.inner.state.borrow_mut();
            if state.status != MetricStatus::InProgress {
                trace!(metric = %self.inner.name, status = ?state.status, "ignoring stop");
                return false;
            }
            state.stop_time = time;
            state.duration = time - state.start_time;
            state.status = status;
            state.duration
        };
        debug!(metric = %self.inner.name, duration, ?status, "metric stopped");
        self.emit(MetricEvent::Stop);
        true
    }

    /// Return to idle from any state.
    ///
    /// Resetting an experience resets every child first, then the experience
    /// itself, then forgets which children had completed.
    pub fn reset(&self) {
        if let Variant::Experience(aggregation) = &self.inner.variant {
            for child in aggregation.children() {
                child.reset();
            }
        }

        *self.inner.state.borrow_mut() = MetricState::default();
        debug!(metric = %self.inner.name, "metric reset");
        self.emit(MetricEvent::Reset);

        if let Variant::Experience(aggregation) = &self.inner.variant {
            aggregation.clear_completed();
        }
    }

    /// Move the start of an in-progress metric to `time` without emitting
    /// another `start` event. The duration is derived at stop, so it stays
    /// consistent with the adjusted start.
    pub fn adjust_start_time(&self, time: f64) -> bool {
        let mut state = self.inner.state.borrow_mut();
        if state.status != MetricStatus::InProgress {
            trace!(metric = %self.inner.name, status = ?state.status, "ignoring start adjustment");
            return false;
        }
        trace!(metric = %self.inner.name, from = state.start_time, to = time, "start time adjusted");
        state.start_time = time;
        true
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Subscribe to a lifecycle event of this metric.
    pub fn on<F>(&self, event: MetricEvent, listener: F) -> ListenerId
    where
        F: Fn(&Metric) + 'static,
    {
        self.inner.events.on(event, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn listener_count(&self, event: MetricEvent) -> usize {
        self.inner.events.listener_count(event)
    }

    pub(crate) fn emit(&self, event: MetricEvent) {
        self.inner.events.emit(event, self);
    }

    // ── Snapshot ─────────────────────────────────────────────────────

    pub fn snapshot(&self) -> MetricSnapshot {
        let state = self.inner.state.borrow().clone();

        let mut plugins = IndexMap::new();
        for (key, plugin) in &self.inner.plugins {
            if let Some(value) = plugin.snapshot() {
                plugins.insert(key.clone(), value);
            }
        }

        let metrics = match &self.inner.variant {
            Variant::Experience(aggregation) => aggregation
                .children()
                .iter()
                .map(Metric::snapshot)
                .collect(),
            _ => Vec::new(),
        };

        MetricSnapshot {
            name: self.inner.name.clone(),
            start_time: state.start_time,
            stop_time: state.stop_time,
            duration: state.duration,
            status: state.status,
            plugins,
            outcome: self.is_interaction().then_some(state.outcome),
            metrics,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    pub(crate) fn set_outcome(&self, outcome: Outcome) {
        self.inner.state.borrow_mut().outcome = outcome;
    }

    pub(crate) fn aggregation(&self) -> Option<&Rc<Aggregation>> {
        match &self.inner.variant {
            Variant::Experience(aggregation) => Some(aggregation),
            _ => None,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakMetric {
        WeakMetric(Rc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Metric")
            .field("name", &self.inner.name)
            .field("status", &state.status)
            .field("start_time", &state.start_time)
            .field("stop_time", &state.stop_time)
            .field("duration", &state.duration)
            .field("plugins", &self.inner.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Non-owning reference to a metric, used by listeners that must not keep
/// their target alive.
#[derive(Clone)]
pub(crate) struct WeakMetric(Weak<MetricInner>);

impl WeakMetric {
    pub(crate) fn upgrade(&self) -> Option<Metric> {
        self.0.upgrade().map(|inner| Metric { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;

    fn counting(metric: &Metric, event: MetricEvent) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        metric.on(event, move |_| counter.set(counter.get() + 1));
        count
    }

    #[test]
    fn start_stop_reset() {
        let metric = Metric::new("load", PluginTable::new());
        assert_eq!(metric.status(), MetricStatus::Idle);

        assert!(metric.start_at(10.0));
        assert_eq!(metric.status(), MetricStatus::InProgress);
        assert_eq!(metric.start_time(), 10.0);

        assert!(metric.stop_at(35.5));
        assert_eq!(metric.status(), MetricStatus::Complete);
        assert_eq!(metric.stop_time(), 35.5);
        assert_eq!(metric.duration(), 25.5);

        metric.reset();
        assert_eq!(metric.status(), MetricStatus::Idle);
        assert_eq!(metric.start_time(), 0.0);
        assert_eq!(metric.stop_time(), 0.0);
        assert_eq!(metric.duration(), 0.0);
    }

    #[test]
    fn second_start_keeps_first_start_time() {
        let metric = Metric::new("load", PluginTable::new());
        let starts = counting(&metric, MetricEvent::Start);

        assert!(metric.start_at(5.0));
        assert!(!metric.start_at(9.0));

        assert_eq!(metric.start_time(), 5.0);
        assert_eq!(starts.get(), 1);
    }

    #[test]
    fn stop_before_start_is_ignored() {
        let metric = Metric::new("load", PluginTable::new());
        let stops = counting(&metric, MetricEvent::Stop);

        assert!(!metric.stop_at(12.0));

        assert_eq!(metric.stop_time(), 0.0);
        assert_eq!(metric.duration(), 0.0);
        assert_eq!(metric.status(), MetricStatus::Idle);
        assert_eq!(stops.get(), 0);
    }

    #[test]
    fn second_stop_is_ignored() {
        let metric = Metric::new("load", PluginTable::new());
        metric.start_at(0.0);
        metric.stop_at(10.0);
        assert!(!metric.stop_at(20.0));
        assert_eq!(metric.stop_time(), 10.0);
        assert_eq!(metric.duration(), 10.0);
    }

    #[test]
    fn reset_on_idle_metric_still_emits() {
        let metric = Metric::new("load", PluginTable::new());
        let resets = counting(&metric, MetricEvent::Reset);

        metric.reset();
        metric.reset();

        assert_eq!(resets.get(), 2);
        assert_eq!(metric.status(), MetricStatus::Idle);
        assert_eq!(metric.start_time(), 0.0);
    }

    #[test]
    fn stop_with_non_terminal_status_is_rejected() {
        let metric = Metric::new("load", PluginTable::new());
        metric.start_at(1.0);
        assert!(!metric.stop_with(2.0, MetricStatus::InProgress));
        assert_eq!(metric.status(), MetricStatus::InProgress);
        assert!(metric.stop_with(2.0, MetricStatus::Failed));
        assert_eq!(metric.status(), MetricStatus::Failed);
    }

    #[test]
    fn default_times_come_from_clock() {
        let clock = Rc::new(ManualClock::new(100.0));
        let metric = Metric::with_clock("load", PluginTable::new(), clock.clone());

        metric.start();
        clock.advance(42.0);
        metric.stop();

        assert_eq!(metric.start_time(), 100.0);
        assert_eq!(metric.stop_time(), 142.0);
        assert_eq!(metric.duration(), 42.0);
    }

    #[test]
    fn listener_sees_updated_state() {
        let metric = Metric::new("load", PluginTable::new());
        let seen = Rc::new(Cell::new(MetricStatus::Idle));
        let observed = Rc::clone(&seen);
        metric.on(MetricEvent::Stop, move |m| observed.set(m.status()));

        metric.start_at(0.0);
        metric.stop_at(1.0);
        assert_eq!(seen.get(), MetricStatus::Complete);
    }

    #[test]
    fn reentrant_calls_from_listener_are_guarded() {
        let metric = Metric::new("load", PluginTable::new());
        let starts = counting(&metric, MetricEvent::Start);
        metric.on(MetricEvent::Start, |m| {
            // a second start from inside the start dispatch is inert
            m.start_at(999.0);
            m.stop_at(m.start_time() + 3.0);
        });

        metric.start_at(1.0);

        assert_eq!(starts.get(), 1);
        assert_eq!(metric.start_time(), 1.0);
        assert_eq!(metric.status(), MetricStatus::Complete);
        assert_eq!(metric.duration(), 3.0);
    }

    #[test]
    fn adjust_start_time_only_while_in_progress() {
        let metric = Metric::new("load", PluginTable::new());
        assert!(!metric.adjust_start_time(3.0));
        metric.start_at(10.0);
        assert!(metric.adjust_start_time(3.0));
        metric.stop_at(13.0);
        assert_eq!(metric.duration(), 10.0);
        assert!(!metric.adjust_start_time(0.0));
    }

    #[test]
    fn base_metric_has_no_outcome() {
        let metric = Metric::new("load", PluginTable::new());
        assert!(metric.outcome().is_none());
        assert!(!metric.is_interaction());
        assert!(!metric.is_experience());
    }

    #[test]
    fn clones_share_state() {
        let metric = Metric::new("load", PluginTable::new());
        let other = metric.clone();
        other.start_at(4.0);
        assert_eq!(metric.status(), MetricStatus::InProgress);
        assert!(metric.ptr_eq(&other));
    }
}
