use std::collections::BTreeMap;

pub type TelemetryProperties = BTreeMap<String, String>;

/// 审计/遥测事件接收端，发送即忘，不阻塞也不向调用方报告失败
pub trait TelemetrySink: Send + Sync {
    fn event(&self, name: &str, properties: TelemetryProperties);
}

/// 由键值对构造事件属性
pub fn telemetry_properties<I, K, V>(pairs: I) -> TelemetryProperties
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.to_string()))
        .collect()
}

/// 丢弃所有事件
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn event(&self, _name: &str, _properties: TelemetryProperties) {}
}
