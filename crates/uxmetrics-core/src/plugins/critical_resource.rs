//! Critical-path resource accounting.
//!
//! When a metric stops, the plugin collects the network resources that were
//! fetched while it was running and whose file extension marks them as
//! critical (scripts, stylesheets, fonts, ...). It reports their total
//! decoded size and the share of those bytes served from cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};
use url::Url;

use crate::events::MetricEvent;
use crate::metric::Metric;
use crate::plugin::{Plugin, PluginResult};

pub const CRITICAL_RESOURCES_KEY: &str = "criticalResources";

/// One entry of the resource timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    /// Resource URL.
    pub name: String,
    pub start_time: f64,
    pub response_end: f64,
    /// Bytes received over the network; 0 for a cache hit.
    pub transfer_size: u64,
    pub decoded_body_size: u64,
}

/// Source of resource timing entries.
pub trait ResourceTimingSource: fmt::Debug {
    fn is_supported(&self) -> bool {
        true
    }

    fn entries(&self) -> Vec<ResourceEntry>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    /// Percentage (0 to 100) of critical bytes served from cache.
    pub cache_rate: f64,
    /// Total decoded size of critical resources, in bytes.
    pub critical_size: u64,
}

impl ResourceSummary {
    /// Summarize `entries` that match `extensions` and lie within
    /// `[start, stop]`.
    pub fn compute(entries: &[ResourceEntry], extensions: &[String], start: f64, stop: f64) -> Self {
        let mut critical_size = 0u64;
        let mut cached_size = 0u64;

        for entry in entries {
            if entry.start_time < start || entry.response_end > stop {
                continue;
            }
            let Some(ext) = extension_of(&entry.name) else {
                continue;
            };
            if !extensions.iter().any(|e| *e == ext) {
                continue;
            }
            critical_size += entry.decoded_body_size;
            if entry.transfer_size == 0 {
                cached_size += entry.decoded_body_size;
            }
        }

        let cache_rate = if critical_size == 0 {
            0.0
        } else {
            cached_size as f64 * 100.0 / critical_size as f64
        };
        Self {
            cache_rate,
            critical_size,
        }
    }
}

/// Lower-case file extension of a resource URL's path, without the dot.
fn extension_of(resource: &str) -> Option<String> {
    let path = match Url::parse(resource) {
        Ok(url) => url.path().to_string(),
        // relative URL
        Err(_) => resource
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Normalize configured extensions to lower case without a leading dot.
pub fn normalize_extensions<I, S>(extensions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for ext in extensions {
        let ext = ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !normalized.contains(&ext) {
            normalized.push(ext);
        }
    }
    normalized
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    start: u64,
    stop: u64,
    extensions: String,
}

impl CacheKey {
    fn new(start: f64, stop: f64, extensions: &[String]) -> Self {
        Self {
            start: start.to_bits(),
            stop: stop.to_bits(),
            extensions: extensions.join(","),
        }
    }
}

/// Memo of computed summaries keyed by time range and extension list.
///
/// Several metrics covering the same window (an experience and its children
/// often do) share one computation.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: RefCell<HashMap<CacheKey, ResourceSummary>>,
}

impl ResourceCache {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    fn get_or_compute(
        &self,
        start: f64,
        stop: f64,
        extensions: &[String],
        compute: impl FnOnce() -> ResourceSummary,
    ) -> ResourceSummary {
        let key = CacheKey::new(start, stop, extensions);
        if let Some(summary) = self.entries.borrow().get(&key) {
            trace!(start, stop, "resource summary cache hit");
            return summary.clone();
        }
        let summary = compute();
        self.entries.borrow_mut().insert(key, summary.clone());
        summary
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CriticalResourceSnapshot<'a> {
    cache_rate: f64,
    critical_size: u64,
    extensions: &'a [String],
    browser_support: bool,
}

#[derive(Debug)]
pub struct CriticalResourcePlugin {
    extensions: Vec<String>,
    source: Option<Rc<dyn ResourceTimingSource>>,
    cache: Rc<ResourceCache>,
    summary: ResourceSummary,
}

impl CriticalResourcePlugin {
    pub fn new<I, S>(
        extensions: I,
        source: Rc<dyn ResourceTimingSource>,
        cache: Rc<ResourceCache>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: normalize_extensions(extensions),
            source: Some(source),
            cache,
            summary: ResourceSummary::default(),
        }
    }

    /// A plugin with no resource timeline; it reports zeros and
    /// `browserSupport: false`.
    pub fn unsupported<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: normalize_extensions(extensions),
            source: None,
            cache: ResourceCache::new(),
            summary: ResourceSummary::default(),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn summary(&self) -> &ResourceSummary {
        &self.summary
    }

    pub fn browser_support(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_supported())
    }
}

impl Plugin for CriticalResourcePlugin {
    fn name(&self) -> &str {
        CRITICAL_RESOURCES_KEY
    }

    fn events(&self) -> &'static [MetricEvent] {
        &[MetricEvent::Stop, MetricEvent::Reset]
    }

    fn on_stop(&mut self, metric: &Metric) -> PluginResult {
        let Some(source) = self.source.as_ref().filter(|s| s.is_supported()) else {
            self.summary = ResourceSummary::default();
            return Ok(());
        };

        let (start, stop) = (metric.start_time(), metric.stop_time());
        let extensions = &self.extensions;
        self.summary = self.cache.get_or_compute(start, stop, extensions, || {
            ResourceSummary::compute(&source.entries(), extensions, start, stop)
        });
        debug!(
            metric = %metric.name(),
            critical_size = self.summary.critical_size,
            cache_rate = self.summary.cache_rate,
            "critical resources measured"
        );
        Ok(())
    }

    fn on_reset(&mut self, _metric: &Metric) -> PluginResult {
        self.summary = ResourceSummary::default();
        Ok(())
    }

    fn snapshot(&self) -> Option<Value> {
        let snapshot = CriticalResourceSnapshot {
            cache_rate: self.summary.cache_rate,
            critical_size: self.summary.critical_size,
            extensions: &self.extensions,
            browser_support: self.browser_support(),
        };
        serde_json::to_value(snapshot).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{plugin_table, PluginHandle};
    use serde_json::json;
    use std::cell::Cell;

    #[derive(Debug, Default)]
    struct Timeline {
        entries: Vec<ResourceEntry>,
        reads: Cell<usize>,
    }

    impl ResourceTimingSource for Timeline {
        fn entries(&self) -> Vec<ResourceEntry> {
            self.reads.set(self.reads.get() + 1);
            self.entries.clone()
        }
    }

    fn entry(name: &str, start: f64, transfer: u64, decoded: u64) -> ResourceEntry {
        ResourceEntry {
            name: name.to_string(),
            start_time: start,
            response_end: start + 5.0,
            transfer_size: transfer,
            decoded_body_size: decoded,
        }
    }

    fn timeline() -> Rc<Timeline> {
        Rc::new(Timeline {
            entries: vec![
                entry("https://cdn.example.com/app.js", 10.0, 120, 100),
                entry("https://cdn.example.com/theme.css?v=3", 12.0, 220, 200),
                entry("/static/vendor.JS", 20.0, 0, 700),
                entry("https://cdn.example.com/logo.png", 30.0, 0, 5_000),
                entry("https://cdn.example.com/late.js", 500.0, 0, 9_000),
            ],
            reads: Cell::new(0),
        })
    }

    #[test]
    fn computes_size_and_cache_rate() {
        let metric = Metric::new(
            "checkout",
            plugin_table([(
                CRITICAL_RESOURCES_KEY,
                PluginHandle::new(CriticalResourcePlugin::new(
                    ["js", ".css"],
                    timeline(),
                    ResourceCache::new(),
                )),
            )]),
        );

        metric.start_at(0.0);
        metric.stop_at(100.0);

        assert_eq!(
            metric.snapshot().plugins[CRITICAL_RESOURCES_KEY],
            json!({
                "cacheRate": 70.0,
                "criticalSize": 1000,
                "extensions": ["js", "css"],
                "browserSupport": true
            })
        );
    }

    #[test]
    fn cache_is_shared_for_same_window() {
        let source = timeline();
        let cache = ResourceCache::new();
        let make = || {
            Metric::new(
                "checkout",
                plugin_table([(
                    CRITICAL_RESOURCES_KEY,
                    PluginHandle::new(CriticalResourcePlugin::new(
                        ["js", "css"],
                        source.clone(),
                        Rc::clone(&cache),
                    )),
                )]),
            )
        };

        for metric in [make(), make()] {
            metric.start_at(0.0);
            metric.stop_at(100.0);
        }

        assert_eq!(source.reads.get(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_source_reports_zeros() {
        let metric = Metric::new(
            "checkout",
            plugin_table([(
                CRITICAL_RESOURCES_KEY,
                PluginHandle::new(CriticalResourcePlugin::unsupported(["js"])),
            )]),
        );
        metric.start_at(0.0);
        metric.stop_at(10.0);

        let plugin = &metric.snapshot().plugins[CRITICAL_RESOURCES_KEY];
        assert_eq!(plugin["cacheRate"], 0.0);
        assert_eq!(plugin["criticalSize"], 0);
        assert_eq!(plugin["browserSupport"], false);
    }

    #[test]
    fn no_matching_resources_gives_zero_rate() {
        let summary = ResourceSummary::compute(&timeline().entries, &["woff2".to_string()], 0.0, 100.0);
        assert_eq!(summary, ResourceSummary::default());
    }

    #[test]
    fn extension_parsing() {
        assert_eq!(extension_of("https://a.io/x/app.min.js?x=1").as_deref(), Some("js"));
        assert_eq!(extension_of("/fonts/inter.WOFF2#frag").as_deref(), Some("woff2"));
        assert_eq!(extension_of("https://a.io/api/users"), None);
        assert_eq!(extension_of("https://a.io/"), None);
        assert_eq!(normalize_extensions([".JS", "css", "js", " "]), vec!["js", "css"]);
    }
}
