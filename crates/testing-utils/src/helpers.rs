//! 异步测试辅助函数

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时，基于 tokio 时钟，在 `start_paused` 测试中同样可用
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(100)).await;
        }

        false
    }
}

/// 生成 `count` 条源记录，ID 为 `1..=count`
pub fn source_records(count: usize) -> Vec<(String, Value)> {
    (1..=count)
        .map(|i| {
            let id = i.to_string();
            let record = json!({
                "id": id,
                "description": format!("record {i}"),
            });
            (id, record)
        })
        .collect()
}
