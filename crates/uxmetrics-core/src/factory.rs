//! Metric factory.
//!
//! A factory holds a clock and an ordered list of plugin constructors. Every
//! metric it creates gets fresh plugin instances, since a plugin instance can
//! only ever observe one metric.

use std::fmt;
use std::rc::Rc;
use tracing::debug;

use crate::clock::{default_clock, Clock};
use crate::config::Config;
use crate::error::Result;
use crate::metric::{ExperienceMetric, InteractionMetric, Metric};
use crate::plugin::{Plugin, PluginHandle, PluginTable};
use crate::plugins::{
    CriticalResourcePlugin, LayoutShiftPlugin, LayoutSource, LogPlugin, NavigationTimingPlugin,
    NavigationTracker, ReporterPlugin, ResourceCache, ResourceTimingSource,
    CRITICAL_RESOURCES_KEY, LAYOUT_SHIFT_KEY, LOG_KEY, NAVIGATION_KEY, REPORTER_KEY,
};
use crate::transport::{BatchTransport, Transport};

type PluginConstructor = Box<dyn Fn() -> PluginHandle>;

/// Collaborators the standard plugins need.
///
/// Anything left as `None` makes the corresponding plugin report
/// `browserSupport: false` instead of measuring.
pub struct PluginServices {
    pub clock: Rc<dyn Clock>,
    pub layout: Option<Rc<dyn LayoutSource>>,
    pub resources: Option<Rc<dyn ResourceTimingSource>>,
    pub resource_cache: Rc<ResourceCache>,
    pub navigation: Rc<NavigationTracker>,
    /// Transport for the reporter. When `None` and reporting is enabled, a
    /// [`BatchTransport`] is built from the `[reporter]` section.
    pub transport: Option<Rc<dyn Transport>>,
    pub log: bool,
}

impl Default for PluginServices {
    fn default() -> Self {
        Self {
            clock: default_clock(),
            layout: None,
            resources: None,
            resource_cache: ResourceCache::new(),
            navigation: NavigationTracker::new(),
            transport: None,
            log: false,
        }
    }
}

impl fmt::Debug for PluginServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginServices")
            .field("layout", &self.layout.is_some())
            .field("resources", &self.resources.is_some())
            .field("navigation", &self.navigation)
            .field("transport", &self.transport.is_some())
            .field("log", &self.log)
            .finish()
    }
}

pub struct MetricFactory {
    clock: Rc<dyn Clock>,
    plugins: Vec<(String, PluginConstructor)>,
}

impl MetricFactory {
    pub fn new() -> Self {
        Self::with_clock(default_clock())
    }

    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            plugins: Vec::new(),
        }
    }

    /// Add a plugin constructor under `key`. Replaces any constructor
    /// already registered under the same key, keeping its position.
    pub fn with_plugin<P, F>(mut self, key: impl Into<String>, make: F) -> Self
    where
        P: Plugin + 'static,
        F: Fn() -> P + 'static,
    {
        self.add_plugin(key, make);
        self
    }

    pub fn add_plugin<P, F>(&mut self, key: impl Into<String>, make: F)
    where
        P: Plugin + 'static,
        F: Fn() -> P + 'static,
    {
        let key = key.into();
        let constructor: PluginConstructor = Box::new(move || PluginHandle::new(make()));
        match self.plugins.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = constructor,
            None => self.plugins.push((key, constructor)),
        }
    }

    /// Build a factory with the standard plugins enabled in `config`.
    ///
    /// Plugins are installed in the order navigation, layout shift, critical
    /// resources, log, reporter, so that the reporter sees the results of
    /// every other plugin.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate or the reporter
    /// transport cannot be built.
    pub fn from_config(config: &Config, services: PluginServices) -> Result<Self> {
        config.validate()?;
        let mut factory = Self::with_clock(Rc::clone(&services.clock));

        if config.navigation.enabled {
            let tracker = services.navigation;
            factory.add_plugin(NAVIGATION_KEY, move || {
                NavigationTimingPlugin::new(Rc::clone(&tracker))
            });
        }

        if config.layout_shift.enabled {
            let selector = config.layout_shift.selector.clone();
            let layout = services.layout;
            factory.add_plugin(LAYOUT_SHIFT_KEY, move || match &layout {
                Some(source) => LayoutShiftPlugin::new(selector.clone(), Rc::clone(source)),
                None => LayoutShiftPlugin::unsupported(selector.clone()),
            });
        }

        if config.critical_resources.enabled {
            let extensions = config.critical_resources.extensions.clone();
            let resources = services.resources;
            let cache = services.resource_cache;
            factory.add_plugin(CRITICAL_RESOURCES_KEY, move || match &resources {
                Some(source) => {
                    CriticalResourcePlugin::new(&extensions, Rc::clone(source), Rc::clone(&cache))
                }
                None => CriticalResourcePlugin::unsupported(&extensions),
            });
        }

        if services.log {
            factory.add_plugin(LOG_KEY, LogPlugin::new);
        }

        if config.reporter.enabled {
            let transport: Rc<dyn Transport> = match services.transport {
                Some(transport) => transport,
                None => Rc::new(BatchTransport::from_config(&config.reporter)?),
            };
            factory.add_plugin(REPORTER_KEY, move || ReporterPlugin::new(Rc::clone(&transport)));
        }

        debug!(plugins = ?factory.plugin_keys().collect::<Vec<_>>(), "metric factory configured");
        Ok(factory)
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    pub fn plugin_keys(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|(key, _)| key.as_str())
    }

    fn plugin_table(&self) -> PluginTable {
        self.plugins
            .iter()
            .map(|(key, make)| (key.clone(), make()))
            .collect()
    }

    pub fn metric(&self, name: impl Into<String>) -> Metric {
        Metric::with_clock(name, self.plugin_table(), self.clock())
    }

    pub fn interaction(&self, name: impl Into<String>) -> InteractionMetric {
        InteractionMetric::with_clock(name, self.plugin_table(), self.clock())
    }

    /// Create an experience over `metrics`. Children keep their own plugins.
    pub fn experience(&self, name: impl Into<String>, metrics: Vec<Metric>) -> ExperienceMetric {
        ExperienceMetric::with_clock(name, metrics, self.plugin_table(), self.clock())
    }
}

impl Default for MetricFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricFactory")
            .field("plugins", &self.plugin_keys().collect::<Vec<_>>())
            .finish()
    }
}
