// Cache persistence module
// Author: kelexine (https://github.com/kelexine)

pub mod manager;
pub mod scheduler;
pub mod store;

pub use manager::{CleanupOutcome, FlushOutcome, PersistenceManager};
pub use scheduler::{PersistenceScheduler, SchedulerHandle};
pub use store::{FileStore, KeyValueStore, MemoryStore};
