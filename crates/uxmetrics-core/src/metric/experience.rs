//! Experience metrics: a metric derived from a fixed set of child metrics.
//!
//! The experience starts when the first child starts and stops once every
//! child has stopped. Its start time is the earliest child start and its
//! stop time the latest child stop, and each of its own `start` and `stop`
//! events fires at most once per run regardless of child order.
//!
//! Children are shared, not owned: application code keeps driving them
//! directly and the experience follows through listeners installed once at
//! construction.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, trace};

use super::base::{Metric, MetricStatus, Variant};
use crate::clock::{default_clock, Clock};
use crate::events::{ListenerId, MetricEvent};
use crate::plugin::PluginTable;

/// Completion key of one child slot.
///
/// Completion is tracked per slot rather than per name, so two children that
/// share a display name are still counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildId(usize);

/// Aggregation bookkeeping owned by an experience.
pub(crate) struct Aggregation {
    children: Vec<Metric>,
    completed: RefCell<HashSet<ChildId>>,
    listeners: RefCell<Vec<(usize, ListenerId)>>,
}

impl Aggregation {
    pub(crate) fn children(&self) -> &[Metric] {
        &self.children
    }

    pub(crate) fn clear_completed(&self) {
        self.completed.borrow_mut().clear();
    }

    fn completed_count(&self) -> usize {
        self.completed.borrow().len()
    }

    /// Mark a child as completed. Returns `true` when this completed the set.
    fn complete(&self, id: ChildId) -> bool {
        let mut completed = self.completed.borrow_mut();
        if !completed.insert(id) {
            return false;
        }
        completed.len() == self.children.len()
    }

    fn latest_stop(&self) -> f64 {
        self.children
            .iter()
            .map(Metric::stop_time)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

impl Drop for Aggregation {
    fn drop(&mut self) {
        for (index, id) in self.listeners.borrow().iter() {
            if let Some(child) = self.children.get(*index) {
                child.off(*id);
            }
        }
    }
}

impl fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregation")
            .field("children", &self.children.len())
            .field("completed", &self.completed_count())
            .finish()
    }
}

/// A metric whose timing envelope is derived from its children.
///
/// An experience with no children never starts or stops on its own; it can
/// still be driven manually through `start`/`stop`.
#[derive(Debug, Clone)]
pub struct ExperienceMetric {
    metric: Metric,
}

impl ExperienceMetric {
    pub fn new(name: impl Into<String>, metrics: Vec<Metric>, plugins: PluginTable) -> Self {
        Self::with_clock(name, metrics, plugins, default_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        metrics: Vec<Metric>,
        plugins: PluginTable,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let aggregation = Rc::new(Aggregation {
            children: metrics,
            completed: RefCell::new(HashSet::new()),
            listeners: RefCell::new(Vec::new()),
        });
        let metric = Metric::build(
            name.into(),
            plugins,
            clock,
            Variant::Experience(Rc::clone(&aggregation)),
        );

        let mut listeners = Vec::with_capacity(aggregation.children.len() * 2);
        for (index, child) in aggregation.children.iter().enumerate() {
            let id = ChildId(index);

            let parent = metric.downgrade();
            let on_start = child.on(MetricEvent::Start, move |child| {
                if let Some(parent) = parent.upgrade() {
                    on_child_start(&parent, child);
                }
            });

            let parent = metric.downgrade();
            let on_stop = child.on(MetricEvent::Stop, move |child| {
                if let Some(parent) = parent.upgrade() {
                    on_child_stop(&parent, id, child);
                }
            });

            listeners.push((index, on_start));
            listeners.push((index, on_stop));
        }
        *aggregation.listeners.borrow_mut() = listeners;

        debug!(
            experience = %metric.name(),
            children = aggregation.children.len(),
            "experience created"
        );
        Self { metric }
    }

    /// The child metrics, in construction order.
    pub fn metrics(&self) -> &[Metric] {
        self.metric
            .aggregation()
            .map(|aggregation| aggregation.children())
            .unwrap_or(&[])
    }

    /// Number of children that have reported completion in the current run.
    pub fn completed_count(&self) -> usize {
        self.metric
            .aggregation()
            .map(|aggregation| aggregation.completed_count())
            .unwrap_or(0)
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }
}

fn on_child_start(parent: &Metric, child: &Metric) {
    let child_start = child.start_time();
    match parent.status() {
        MetricStatus::Idle => {
            parent.start_at(child_start);
        }
        MetricStatus::InProgress => {
            if child_start < parent.start_time() {
                parent.adjust_start_time(child_start);
            }
        }
        status => {
            trace!(experience = %parent.name(), child = %child.name(), ?status, "child started after experience finished");
        }
    }
}

fn on_child_stop(parent: &Metric, id: ChildId, child: &Metric) {
    let Some(aggregation) = parent.aggregation() else {
        return;
    };
    if !aggregation.complete(id) {
        trace!(experience = %parent.name(), child = %child.name(), "child already completed");
        return;
    }

    let stop = aggregation.latest_stop();
    parent.stop_at(stop);
}

impl Deref for ExperienceMetric {
    type Target = Metric;

    fn deref(&self) -> &Metric {
        &self.metric
    }
}

impl From<ExperienceMetric> for Metric {
    fn from(experience: ExperienceMetric) -> Self {
        experience.metric
    }
}

impl From<&ExperienceMetric> for Metric {
    fn from(experience: &ExperienceMetric) -> Self {
        experience.metric.clone()
    }
}
