use metrics::counter;
use migration_core::traits::{TelemetryProperties, TelemetrySink};
use tracing::info;

/// 将遥测事件写入 `telemetry` 日志目标，并累加 `migration_events_total` 计数器
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetrySink for TracingTelemetry {
    fn event(&self, name: &str, properties: TelemetryProperties) {
        let properties_json = serde_json::to_string(&properties).unwrap_or_default();
        info!(target: "telemetry", event = name, properties = %properties_json, "遥测事件");
        counter!("migration_events_total", "event" => name.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_core::traits::telemetry_properties;

    #[test]
    fn test_event_without_recorder_is_noop() {
        let telemetry = TracingTelemetry::new();
        telemetry.event(
            "visits-migration-started",
            telemetry_properties([("migrationId", "2020-03-24T12:00:00")]),
        );
    }
}
