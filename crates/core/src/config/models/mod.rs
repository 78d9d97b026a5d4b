pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod dispatcher_worker;
pub mod message_queue;
pub mod migrations;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_worker::{CoordinatorConfig, WorkerConfig};
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use migrations::{MigrationEndpointConfig, PagingMode};
