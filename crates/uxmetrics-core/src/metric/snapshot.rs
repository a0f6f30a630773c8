//! Serialized form of a metric, as handed to the reporting transport.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{MetricStatus, Outcome};

/// Point-in-time copy of a metric.
///
/// ```json
/// {
///   "name": "search",
///   "startTime": 12.5,
///   "stopTime": 140.0,
///   "duration": 127.5,
///   "status": "complete",
///   "plugins": { "criticalResources": { "cacheRate": 70.0, ... } }
/// }
/// ```
///
/// Interaction metrics add `succeeded`, `failed` and `data`; experiences add
/// the snapshots of their children under `metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub name: String,
    pub start_time: f64,
    pub stop_time: f64,
    pub duration: f64,
    pub status: MetricStatus,
    #[serde(default)]
    pub plugins: IndexMap<String, Value>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{InteractionMetric, Metric};
    use crate::plugin::PluginTable;
    use serde_json::json;

    #[test]
    fn snapshot_uses_camel_case_shape() {
        let metric = Metric::new("search", PluginTable::new());
        metric.start_at(10.0);
        metric.stop_at(25.0);

        let value = serde_json::to_value(metric.snapshot()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "search",
                "startTime": 10.0,
                "stopTime": 25.0,
                "duration": 15.0,
                "status": "complete",
                "plugins": {}
            })
        );
    }

    #[test]
    fn in_progress_status_serializes_camel_case() {
        let metric = Metric::new("search", PluginTable::new());
        metric.start_at(1.0);
        let value = serde_json::to_value(metric.snapshot()).unwrap();
        assert_eq!(value["status"], "inProgress");
    }

    #[test]
    fn interaction_snapshot_carries_outcome() {
        let interaction = InteractionMetric::new("submit", PluginTable::new());
        interaction.start_at(0.0);
        interaction.fail_at(Some(json!({"error": "x"})), 8.0);

        let value = serde_json::to_value(interaction.snapshot()).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["succeeded"], false);
        assert_eq!(value["failed"], true);
        assert_eq!(value["data"], json!({"error": "x"}));
    }

    #[test]
    fn snapshot_deserializes_back() {
        let interaction = InteractionMetric::new("submit", PluginTable::new());
        interaction.start_at(0.0);
        interaction.succeed_at(None, 3.0);

        let snapshot = interaction.snapshot();
        let text = serde_json::to_string(&snapshot).unwrap();
        let parsed: MetricSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
