pub mod client;
pub mod config;
pub mod scheduler;
pub mod status;
pub mod sync;

pub use client::{HttpIngestionClient, IngestClientError, IngestionClient};
pub use config::{Config, QueueConfig};
pub use scheduler::{CollectError, CollectionScheduler, SchedulerError, SchedulerSettings};
pub use sync::{BackgroundSync, MemoryRetryQueue, SqliteRetryQueue, SyncMessage, SyncRound};
pub use sync::queue::{RetryPolicy, RetryQueue, SyncJob};
