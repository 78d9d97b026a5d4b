//! 配置模型与加载
//!
//! 配置来源依次为默认值、TOML 文件、`MIGRATION__` 前缀的环境变量。

pub mod models;

pub use models::*;
