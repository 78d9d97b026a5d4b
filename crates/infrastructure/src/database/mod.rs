pub mod manager;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::PostgresMigrationHistoryRepository;
pub use sqlite::SqliteMigrationHistoryRepository;
