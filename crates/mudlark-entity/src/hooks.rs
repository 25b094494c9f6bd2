//! Lifecycle hooks attached to an entity kind at registration.
//!
//! Hooks are how out-of-scope collaborators (the world layer, sessions)
//! observe entity lifecycles without the runtime knowing about them.
//! All hooks default to no-ops; a kind registered without hooks pays
//! nothing.
//!
//! The async hooks return boxed futures so implementations can be stored
//! behind `Arc<dyn EntityHooks<E>>`.

use std::pin::Pin;

use crate::handle::Entity;
use crate::record::Record;

/// A boxed future as returned by the async hooks.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Lifecycle observers for one entity kind.
pub trait EntityHooks<E: Record>: Send + Sync {
    /// Called synchronously when a new entity is constructed, before its
    /// INSERT is enqueued.
    fn on_constructed(&self, entity: &Entity<E>) {
        let _ = entity;
    }

    /// Called synchronously when an entity is hydrated from a database
    /// row (never for cache hits).
    fn on_loaded(&self, entity: &Entity<E>) {
        let _ = entity;
    }

    /// Fired asynchronously once a new entity's INSERT has actually been
    /// applied to the database.
    fn on_created<'a>(&'a self, entity: &'a Entity<E>) -> HookFuture<'a> {
        let _ = entity;
        Box::pin(async {})
    }

    /// Awaited at the start of [`Entity::destroy`], while the entity is
    /// still live.
    fn before_destroy<'a>(&'a self, entity: &'a Entity<E>) -> HookFuture<'a> {
        let _ = entity;
        Box::pin(async {})
    }
}

/// The default hook set: every hook is a no-op.
#[derive(Debug, Default)]
pub struct NoHooks;

impl<E: Record> EntityHooks<E> for NoHooks {}
