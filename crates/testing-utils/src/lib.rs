//! # Migration Testing Utils
//!
//! 迁移引擎各 crate 共享的测试工具: 协作方接口的内存实现、测试数据构建器以及异步等待辅助函数。
//!
//! ```toml
//! [dev-dependencies]
//! migration-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
