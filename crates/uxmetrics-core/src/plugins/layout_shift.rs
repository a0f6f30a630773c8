//! Layout-shift tracking for one element.
//!
//! The plugin measures the element matched by a selector when the metric
//! starts, then every time it is sampled and once more when the metric stops.
//! Each measurement that differs from the previous one is recorded as a
//! shift containing only the fields that changed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::events::MetricEvent;
use crate::metric::{Metric, MetricStatus};
use crate::plugin::{Plugin, PluginResult};

/// Key under which the plugin is installed and serialized.
pub const LAYOUT_SHIFT_KEY: &str = "layoutShift";

/// Bounding box of an element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Rect at (`x`, `y`) with the given size; edges are derived.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            top: y,
            left: x,
            right: x + width,
            bottom: y + height,
            width,
            height,
        }
    }

    /// Fields of `self` that differ from `previous`.
    pub fn diff(&self, previous: &Rect) -> PartialRect {
        let changed = |now: f64, before: f64| (now != before).then_some(now);
        PartialRect {
            x: changed(self.x, previous.x),
            y: changed(self.y, previous.y),
            top: changed(self.top, previous.top),
            left: changed(self.left, previous.left),
            right: changed(self.right, previous.right),
            bottom: changed(self.bottom, previous.bottom),
            width: changed(self.width, previous.width),
            height: changed(self.height, previous.height),
        }
    }
}

/// A rect where only the changed fields are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialRect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl PartialRect {
    pub fn is_empty(&self) -> bool {
        *self == PartialRect::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutShift {
    pub time: f64,
    pub layout_shift: PartialRect,
}

/// Access to element geometry.
pub trait LayoutSource: fmt::Debug {
    /// Whether layout measurement is available at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Current bounding box of the element matched by `selector`, or `None`
    /// if no element matches.
    fn measure(&self, selector: &str) -> Option<Rect>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LayoutShiftSnapshot<'a> {
    selector: &'a str,
    layout_shifts: &'a [LayoutShift],
    browser_support: bool,
}

#[derive(Debug)]
pub struct LayoutShiftPlugin {
    selector: String,
    source: Option<Rc<dyn LayoutSource>>,
    previous: Option<Rect>,
    shifts: Vec<LayoutShift>,
}

impl LayoutShiftPlugin {
    pub fn new(selector: impl Into<String>, source: Rc<dyn LayoutSource>) -> Self {
        Self {
            selector: selector.into(),
            source: Some(source),
            previous: None,
            shifts: Vec::new(),
        }
    }

    /// A plugin with no layout source; it records nothing and reports
    /// `browserSupport: false`.
    pub fn unsupported(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            source: None,
            previous: None,
            shifts: Vec::new(),
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn shifts(&self) -> &[LayoutShift] {
        &self.shifts
    }

    pub fn browser_support(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_supported())
    }

    /// Measure the element now and record a shift if it moved or resized.
    /// Only samples while `metric` is in progress.
    pub fn sample(&mut self, metric: &Metric) -> bool {
        if metric.status() != MetricStatus::InProgress {
            trace!(metric = %metric.name(), "ignoring layout sample, metric not in progress");
            return false;
        }
        self.record(metric.now())
    }

    /// Sample the layout-shift plugin installed on `metric`, if any.
    pub fn sample_installed(metric: &Metric) -> bool {
        metric
            .plugin(LAYOUT_SHIFT_KEY)
            .and_then(|handle| handle.with_plugin_mut(|plugin: &mut Self| plugin.sample(metric)))
            .unwrap_or(false)
    }

    fn measure(&self) -> Option<Rect> {
        let source = self.source.as_ref().filter(|s| s.is_supported())?;
        source.measure(&self.selector)
    }

    fn record(&mut self, time: f64) -> bool {
        let Some(current) = self.measure() else {
            return false;
        };
        let Some(previous) = self.previous.replace(current) else {
            return false;
        };

        let layout_shift = current.diff(&previous);
        if layout_shift.is_empty() {
            return false;
        }
        debug!(selector = %self.selector, time, "layout shift recorded");
        self.shifts.push(LayoutShift { time, layout_shift });
        true
    }
}

impl Plugin for LayoutShiftPlugin {
    fn name(&self) -> &str {
        LAYOUT_SHIFT_KEY
    }

    fn events(&self) -> &'static [MetricEvent] {
        &MetricEvent::LIFECYCLE
    }

    fn on_start(&mut self, _metric: &Metric) -> PluginResult {
        self.shifts.clear();
        self.previous = self.measure();
        if self.previous.is_none() && self.source.is_some() {
            trace!(selector = %self.selector, "no element to measure at start");
        }
        Ok(())
    }

    fn on_stop(&mut self, metric: &Metric) -> PluginResult {
        self.record(metric.stop_time());
        Ok(())
    }

    fn on_reset(&mut self, _metric: &Metric) -> PluginResult {
        self.previous = None;
        self.shifts.clear();
        Ok(())
    }

    fn snapshot(&self) -> Option<Value> {
        let snapshot = LayoutShiftSnapshot {
            selector: &self.selector,
            layout_shifts: &self.shifts,
            browser_support: self.browser_support(),
        };
        serde_json::to_value(snapshot).ok()
    }
}
