//! Storage implementations for different backends

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::{InMemoryRowStore, InMemorySendLog};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresRowStore, PostgresSendLog, ensure_send_log_schema};
