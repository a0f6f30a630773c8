//! Logs every lifecycle transition.

use tracing::info;

use crate::events::MetricEvent;
use crate::metric::Metric;
use crate::plugin::{Plugin, PluginResult};

pub const LOG_KEY: &str = "log";

#[derive(Debug, Default)]
pub struct LogPlugin;

impl LogPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for LogPlugin {
    fn name(&self) -> &str {
        LOG_KEY
    }

    fn events(&self) -> &'static [MetricEvent] {
        &MetricEvent::ALL
    }

    fn on_start(&mut self, metric: &Metric) -> PluginResult {
        info!(metric = %metric.name(), start_time = metric.start_time(), "start");
        Ok(())
    }

    fn on_stop(&mut self, metric: &Metric) -> PluginResult {
        info!(
            metric = %metric.name(),
            duration = metric.duration(),
            status = ?metric.status(),
            "stop"
        );
        Ok(())
    }

    fn on_reset(&mut self, metric: &Metric) -> PluginResult {
        info!(metric = %metric.name(), "reset");
        Ok(())
    }

    fn on_success(&mut self, metric: &Metric) -> PluginResult {
        info!(metric = %metric.name(), "success");
        Ok(())
    }

    fn on_failure(&mut self, metric: &Metric) -> PluginResult {
        let data = metric.outcome().and_then(|o| o.data);
        info!(metric = %metric.name(), ?data, "failure");
        Ok(())
    }
}
