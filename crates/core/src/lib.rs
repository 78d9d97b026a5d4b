//! 迁移协调引擎的核心类型：错误、模型、协作方接口与配置

pub mod clock;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use clock::{Clock, SystemClock};
pub use errors::{MigrationError, MigrationResult};
