pub mod database;
pub mod http;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;
pub mod telemetry;

pub use database::*;
pub use http::*;
pub use in_memory_queue::*;
pub use message_queue::*;
pub use message_queue_factory::*;
pub use telemetry::*;
