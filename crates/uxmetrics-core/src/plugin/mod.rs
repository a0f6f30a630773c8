//! Plugin protocol.
//!
//! A plugin observes the lifecycle of exactly one metric. It declares the
//! events it handles through [`Plugin::events`]; registration subscribes a
//! handler for those events only, so a plugin that never asks for `start`
//! is never called on start.
//!
//! Handlers are isolated from each other: an error returned by one handler is
//! logged and dispatch continues with the next listener, and the metric's own
//! transition has already completed by the time any handler runs.

use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error, warn};

use crate::error::PluginError;
use crate::events::MetricEvent;
use crate::metric::Metric;

/// Plugins attached to a metric, keyed by the name they serialize under.
/// Fixed at construction.
pub type PluginTable = IndexMap<String, PluginHandle>;

pub type PluginResult = Result<(), PluginError>;

/// Behavior attached to a metric's lifecycle.
///
/// Every handler defaults to a no-op. Implementors override the handlers
/// they care about and list the matching events in `events`.
pub trait Plugin: fmt::Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// The events this plugin wants to receive.
    fn events(&self) -> &'static [MetricEvent];

    fn on_start(&mut self, _metric: &Metric) -> PluginResult {
        Ok(()) // default no-op
    }

    fn on_stop(&mut self, _metric: &Metric) -> PluginResult {
        Ok(()) // default no-op
    }

    fn on_reset(&mut self, _metric: &Metric) -> PluginResult {
        Ok(()) // default no-op
    }

    fn on_success(&mut self, _metric: &Metric) -> PluginResult {
        Ok(()) // default no-op
    }

    fn on_failure(&mut self, _metric: &Metric) -> PluginResult {
        Ok(()) // default no-op
    }

    /// Plugin-specific part of the metric snapshot. `None` contributes nothing.
    fn snapshot(&self) -> Option<Value> {
        None
    }
}

struct PluginSlot {
    registered: Cell<bool>,
    plugin: Rc<RefCell<dyn Plugin>>,
    concrete: Rc<dyn Any>,
}

impl PluginSlot {
    fn dispatch(&self, event: MetricEvent, metric: &Metric) {
        let Ok(mut plugin) = self.plugin.try_borrow_mut() else {
            warn!(%event, metric = %metric.name(), "plugin is busy, skipping re-entrant dispatch");
            return;
        };

        let result = match event {
            MetricEvent::Start => plugin.on_start(metric),
            MetricEvent::Stop => plugin.on_stop(metric),
            MetricEvent::Reset => plugin.on_reset(metric),
            MetricEvent::Success => plugin.on_success(metric),
            MetricEvent::Failure => plugin.on_failure(metric),
        };

        if let Err(err) = result {
            error!(
                plugin = %plugin.name(),
                %event,
                metric = %metric.name(),
                "plugin handler failed: {err}"
            );
        }
    }
}

/// Shared handle to a plugin instance.
///
/// A handle can be registered on one metric only; later registrations are
/// ignored with a warning so that one instance never receives events from
/// two unrelated timers.
#[derive(Clone)]
pub struct PluginHandle {
    slot: Rc<PluginSlot>,
}

impl PluginHandle {
    pub fn new<P>(plugin: P) -> Self
    where
        P: Plugin + 'static,
    {
        let concrete = Rc::new(RefCell::new(plugin));
        let plugin: Rc<RefCell<dyn Plugin>> = concrete.clone();
        Self {
            slot: Rc::new(PluginSlot {
                registered: Cell::new(false),
                plugin,
                concrete,
            }),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.slot.registered.get()
    }

    /// Bind the plugin to `metric`, subscribing one handler per declared
    /// event. Returns `false` if the plugin was already registered.
    pub fn register(&self, metric: &Metric) -> bool {
        let name = match self.slot.plugin.try_borrow() {
            Ok(plugin) => plugin.name().to_string(),
            Err(_) => "<busy>".to_string(),
        };

        if self.slot.registered.get() {
            warn!(plugin = %name, metric = %metric.name(), "plugin is already registered, ignoring");
            return false;
        }
        self.slot.registered.set(true);

        let events = match self.slot.plugin.try_borrow() {
            Ok(plugin) => plugin.events(),
            Err(_) => &[],
        };
        let mut subscribed: Vec<MetricEvent> = Vec::with_capacity(events.len());
        for &event in events {
            if subscribed.contains(&event) {
                continue;
            }
            let slot = Rc::clone(&self.slot);
            metric.on(event, move |metric| slot.dispatch(event, metric));
            subscribed.push(event);
        }

        debug!(plugin = %name, metric = %metric.name(), events = ?subscribed, "plugin registered");
        true
    }

    pub fn name(&self) -> Option<String> {
        self.slot
            .plugin
            .try_borrow()
            .ok()
            .map(|plugin| plugin.name().to_string())
    }

    /// The plugin's serialized form, or `None` if it has none or is busy
    /// handling an event.
    pub fn snapshot(&self) -> Option<Value> {
        self.slot.plugin.try_borrow().ok()?.snapshot()
    }

    /// Borrow the plugin as its concrete type.
    pub fn with_plugin<P, R>(&self, f: impl FnOnce(&P) -> R) -> Option<R>
    where
        P: Plugin + 'static,
    {
        let cell = self.slot.concrete.downcast_ref::<RefCell<P>>()?;
        let plugin = cell.try_borrow().ok()?;
        Some(f(&plugin))
    }

    /// Mutably borrow the plugin as its concrete type.
    pub fn with_plugin_mut<P, R>(&self, f: impl FnOnce(&mut P) -> R) -> Option<R>
    where
        P: Plugin + 'static,
    {
        let cell = self.slot.concrete.downcast_ref::<RefCell<P>>()?;
        let mut plugin = cell.try_borrow_mut().ok()?;
        Some(f(&mut plugin))
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name())
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// Build a [`PluginTable`] from `(key, plugin)` pairs.
pub fn plugin_table<I, K>(plugins: I) -> PluginTable
where
    I: IntoIterator<Item = (K, PluginHandle)>,
    K: Into<String>,
{
    plugins
        .into_iter()
        .map(|(key, plugin)| (key.into(), plugin))
        .collect()
}
