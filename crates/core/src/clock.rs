use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// 时间来源，run_id 使用本地时间，历史记录时间戳使用 UTC
pub trait Clock: Send + Sync {
    fn now_local(&self) -> NaiveDateTime;

    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
