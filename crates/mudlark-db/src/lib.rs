//! Database layer for Mudlark: connection pool, table migrator, and the
//! ordered write queue.
//!
//! Reads go through the shared [`DbPool`]; every mutating statement
//! funnels through exactly one [`WriteQueue`] consumer that owns a
//! dedicated connection. That single-writer arrangement is what gives
//! the entity runtime its ordering guarantee: writes are applied in the
//! exact order they were enqueued, and a [barrier](queue::WriteQueue::barrier)
//! gives any caller a read-after-write fence without stalling the queue.
//!
//! Startup-time schema reconciliation lives in [`migrate`]: every entity
//! table is created, migrated, or verified inside one outer transaction
//! before the first read or write is issued (all-or-nothing startup).
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`migrate`] -- four-phase table migrator and on-disk schema store
//! - [`queue`] -- single-consumer ordered write queue with barriers
//! - [`error`] -- shared error types

pub mod error;
pub mod migrate;
pub mod postgres;
pub mod queue;

pub use error::DbError;
pub use migrate::{
    MigrationError, MigrationPrompt, MigratorMode, SchemaStore, StdinPrompt, TableMigrator,
};
pub use postgres::{DbPool, PostgresConfig};
pub use queue::{
    Guard, PgWriteExecutor, QueueConsumer, QueueError, WriteExecutor, WriteQueue, WriteRequest,
};
