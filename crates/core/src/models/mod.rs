//! # 数据模型
//!
//! 迁移引擎的核心数据结构: 迁移历史记录、队列工作单元以及映射记录。
//!
//! ## 状态流转
//!
//! ```text
//! STARTED → COMPLETED
//!    ↓
//! CANCELLED_REQUESTED → CANCELLED
//! ```
//!
//! 所有模型都实现了 `serde` 序列化，消息体和历史记录在线上使用 camelCase 字段名。

pub mod mapping;
pub mod message;
pub mod migration_run;
pub mod migration_type;

pub use mapping::*;
pub use message::*;
pub use migration_run::*;
pub use migration_type::*;
