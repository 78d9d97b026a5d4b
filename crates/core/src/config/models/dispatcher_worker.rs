use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 协调器配置，包括完成检测的去抖参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub default_page_size: i64,
    /// 需要连续观察到"可能为空"的次数
    pub required_empty_checks: u32,
    /// 队列仍忙时的复查间隔
    pub busy_recheck_delay_seconds: u64,
    /// 队列可能为空时的复查间隔
    pub empty_recheck_delay_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            required_empty_checks: 10,
            busy_recheck_delay_seconds: 10,
            empty_recheck_delay_seconds: 1,
        }
    }
}

impl CoordinatorConfig {
    pub fn busy_recheck_delay(&self) -> Duration {
        Duration::from_secs(self.busy_recheck_delay_seconds)
    }

    pub fn empty_recheck_delay(&self) -> Duration {
        Duration::from_secs(self.empty_recheck_delay_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_page_size <= 0 {
            return Err(anyhow::anyhow!("默认页大小必须大于0"));
        }

        if self.required_empty_checks < 2 {
            return Err(anyhow::anyhow!("完成检测所需的连续空检查次数必须大于1"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    pub concurrency: usize,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: "worker-001".to_string(),
            concurrency: 8,
            batch_size: 10,
            poll_interval_ms: 500,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }

        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("Worker并发数必须大于0"));
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批量拉取数量必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        Ok(())
    }
}
