//! 迁移队列消费者
//!
//! 从各迁移类型的队列中拉取消息交给协调器处理，成功时确认，失败时交由传输层重投递。

pub mod service;

pub use service::{WorkerService, WorkerServiceBuilder};
