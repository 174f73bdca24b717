//! PostgreSQL adapters

pub mod entity_store;
pub mod task_queue;

pub use entity_store::PostgresEntityStore;
pub use task_queue::PostgresTaskQueue;
