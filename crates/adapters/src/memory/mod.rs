//! In-memory adapters

pub mod entity_store;
pub mod task_queue;

pub use entity_store::InMemoryEntityStore;
pub use task_queue::InMemoryTaskQueue;
