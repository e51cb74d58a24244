// Service exports
pub mod cache;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod runner;
pub mod store;

pub use cache::{CacheError, CacheKey, CacheManager};
pub use memory::InMemoryStore;
pub use postgres::PostgresClient;
pub use queue::{start_workers, CohortLocks, PassWorker, QueueError, TaskQueue, WorkerOptions};
pub use runner::{EngineError, PassRunner};
pub use store::{
    AssignmentStore, EngineStore, GroupDirectory, PairingStore, ParticipantDirectory, StoreError,
    StoreResult,
};
