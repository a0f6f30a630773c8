//! Navigation-relative timing.
//!
//! In a single-page application a metric usually starts when the user
//! navigates, not when the code that creates the metric runs. The
//! [`NavigationTracker`] records the time of the most recent client-side
//! navigation; the plugin moves a metric's start back to that moment, or to
//! the time origin when the page has not navigated since it loaded.

use serde::Serialize;
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::events::MetricEvent;
use crate::metric::Metric;
use crate::plugin::{Plugin, PluginResult};

pub const NAVIGATION_KEY: &str = "navigation";

/// Shared record of client-side navigations.
///
/// One tracker is shared by every navigation plugin of an application.
/// Nothing is recorded until [`enable`](Self::enable) is called, which is
/// where the host hooks its history/router notifications.
#[derive(Debug, Default)]
pub struct NavigationTracker {
    enabled: Cell<bool>,
    last_navigation: Cell<Option<f64>>,
}

impl NavigationTracker {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn enable(&self) {
        if !self.enabled.replace(true) {
            debug!("navigation tracking enabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Record a navigation at `time`. Ignored until the tracker is enabled.
    pub fn record_navigation(&self, time: f64) {
        if !self.enabled.get() {
            trace!(time, "navigation ignored, tracking disabled");
            return;
        }
        self.last_navigation.set(Some(time));
    }

    pub fn last_navigation(&self) -> Option<f64> {
        self.last_navigation.get()
    }

    /// Forget recorded navigations and disable tracking.
    pub fn reset(&self) {
        self.enabled.set(false);
        self.last_navigation.set(None);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct NavigationState {
    transition: bool,
    initial_load: bool,
    browser_support: bool,
}

#[derive(Debug)]
pub struct NavigationTimingPlugin {
    tracker: Rc<NavigationTracker>,
    state: NavigationState,
}

impl NavigationTimingPlugin {
    pub fn new(tracker: Rc<NavigationTracker>) -> Self {
        Self {
            tracker,
            state: NavigationState::default(),
        }
    }

    pub fn is_transition(&self) -> bool {
        self.state.transition
    }

    pub fn is_initial_load(&self) -> bool {
        self.state.initial_load
    }
}

impl Plugin for NavigationTimingPlugin {
    fn name(&self) -> &str {
        NAVIGATION_KEY
    }

    fn events(&self) -> &'static [MetricEvent] {
        &[MetricEvent::Start, MetricEvent::Reset]
    }

    fn on_start(&mut self, metric: &Metric) -> PluginResult {
        if !self.tracker.is_enabled() {
            self.state = NavigationState::default();
            return Ok(());
        }

        let anchor = match self.tracker.last_navigation() {
            Some(time) => {
                self.state = NavigationState {
                    transition: true,
                    initial_load: false,
                    browser_support: true,
                };
                time
            }
            None => {
                self.state = NavigationState {
                    transition: false,
                    initial_load: true,
                    browser_support: true,
                };
                0.0
            }
        };
        metric.adjust_start_time(anchor);
        debug!(
            metric = %metric.name(),
            anchor,
            transition = self.state.transition,
            "start anchored to navigation"
        );
        Ok(())
    }

    fn on_reset(&mut self, _metric: &Metric) -> PluginResult {
        self.state = NavigationState::default();
        Ok(())
    }

    fn snapshot(&self) -> Option<Value> {
        let state = NavigationState {
            browser_support: self.tracker.is_enabled(),
            ..self.state
        };
        serde_json::to_value(state).ok()
    }
}
