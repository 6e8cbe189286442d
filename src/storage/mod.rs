pub mod cached;
pub mod query;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use query::{date_range_filter, percent_change, AggregateQuery, EventColumn, Filter};
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};
