pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{MemoryEventStore, MemoryKvStore};
pub use postgres::PostgresEventStore;
pub use redis::RedisKvStore;
