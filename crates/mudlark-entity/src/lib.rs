//! Generic entity runtime for Mudlark: identity-cached live objects
//! backed by `PostgreSQL` rows.
//!
//! An entity kind is any type implementing [`Record`]. The
//! [`EntityRuntime`] gives each kind a table (created and migrated at
//! startup), an identity cache guaranteeing at most one in-memory
//! instance per row, and write-behind persistence: every mutation made
//! through [`Entity::modify`] is enqueued on the shared ordered write
//! queue automatically. There is no save call anywhere.
//!
//! Reads ([`EntityRuntime::get`], [`EntityRuntime::select`]) flush the
//! queue first, so they always observe every prior mutation.
//!
//! # Modules
//!
//! - [`record`] -- the [`Record`] contract and the [`ValueReader`] decoder
//! - [`handle`] -- the shared [`Entity`] handle (read, modify, destroy)
//! - [`runtime`] -- registration, startup reconciliation, CRUD, queries
//! - [`filter`] -- the typed comparison DSL for selects
//! - [`hooks`] -- lifecycle hooks ([`EntityHooks`])
//! - [`error`] -- the [`EntityError`] type

pub mod error;
pub mod filter;
pub mod handle;
pub mod hooks;
pub mod record;
pub mod runtime;

pub use error::EntityError;
pub use filter::{Field, Filter, Op};
pub use handle::{Entity, WeakEntity};
pub use hooks::{EntityHooks, HookFuture, NoHooks};
pub use record::{Record, ValueReader};
pub use runtime::{EntityRuntime, RuntimeBuilder};
