pub mod adapters;
pub mod message_queue;
pub mod repository;
pub mod telemetry;

pub use adapters::*;
pub use message_queue::*;
pub use repository::*;
pub use telemetry::*;
