//! Entity handles: shared, identity-cached references to live entities.
//!
//! An [`Entity`] is a cheap-to-clone handle to the canonical in-memory
//! instance of one database row. The identity cache guarantees there is
//! at most one instance per `(kind, id)`, so every holder observes and
//! mutates the same state.
//!
//! Field mutation goes through [`Entity::modify`]: the closure updates
//! the in-memory record, and the handle enqueues a guarded UPDATE
//! carrying the full field snapshot at enqueue time. No explicit save
//! call exists anywhere -- every mutation is durable-eventually.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use mudlark_db::WriteRequest;
use mudlark_schema::Value;

use crate::error::EntityError;
use crate::record::Record;
use crate::runtime::KindShared;

/// The canonical in-memory state of one row.
///
/// Owned by the identity cache (weakly) and by every handle (strongly).
/// Pending queued writes also hold a strong reference through their
/// guard closures, pinning the cell until they flush.
pub(crate) struct EntityCell<E> {
    pub(crate) id: i32,
    pub(crate) destroyed: AtomicBool,
    pub(crate) data: RwLock<E>,
    /// Serializes concurrent [`Entity::destroy`] calls: the hook must
    /// fire once, and a caller that lost the race must not return until
    /// the winning DELETE is durable.
    destroy_gate: tokio::sync::Mutex<()>,
}

impl<E> EntityCell<E> {
    pub(crate) fn new(id: i32, data: E) -> Self {
        Self {
            id,
            destroyed: AtomicBool::new(false),
            data: RwLock::new(data),
            destroy_gate: tokio::sync::Mutex::new(()),
        }
    }
}

/// Read a lock, tolerating poisoning.
///
/// Mutating closures are short and non-panicking by contract; if one
/// does panic, the stored state is still the last coherent snapshot.
fn read_lock<E>(lock: &RwLock<E>) -> std::sync::RwLockReadGuard<'_, E> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<E>(lock: &RwLock<E>) -> std::sync::RwLockWriteGuard<'_, E> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A shared handle to a live entity of kind `E`.
pub struct Entity<E: Record> {
    pub(crate) cell: Arc<EntityCell<E>>,
    pub(crate) shared: Arc<KindShared<E>>,
}

impl<E: Record> Clone for Entity<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Record> std::fmt::Debug for Entity<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &E::KIND)
            .field("id", &self.cell.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<E: Record> Entity<E> {
    /// The entity's primary key.
    pub fn id(&self) -> i32 {
        self.cell.id
    }

    /// Whether [`Entity::destroy`] has completed its terminal flag set.
    pub fn is_destroyed(&self) -> bool {
        self.cell.destroyed.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same in-memory instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Read the entity's fields under the shared lock.
    pub fn read<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&read_lock(&self.cell.data))
    }

    /// Clone the entity's current field values.
    pub fn snapshot(&self) -> E
    where
        E: Clone,
    {
        read_lock(&self.cell.data).clone()
    }

    /// Mutate the entity's fields and enqueue the corresponding UPDATE.
    ///
    /// The UPDATE carries the full field snapshot taken at enqueue time,
    /// so later mutations naturally supersede earlier ones in queue
    /// order. The write is guarded: if the entity is destroyed by the
    /// time the queue flushes it, the statement is discarded silently.
    /// Mutating an already-destroyed entity still updates the in-memory
    /// value; only durability is vetoed.
    pub fn modify(&self, f: impl FnOnce(&mut E)) {
        // Snapshot and enqueue under the same lock. Were the lock
        // dropped in between, a concurrent modify could slip its newer
        // snapshot into the queue first, and this stale one would be
        // flushed last. Enqueueing is synchronous and never blocks, so
        // holding the lock across it is safe.
        let mut data = write_lock(&self.cell.data);
        f(&mut data);
        let params: Vec<Value> = std::iter::once(Value::from(self.cell.id))
            .chain(data.to_values())
            .collect();
        let cell = Arc::clone(&self.cell);
        self.shared.queue.queue_write(
            WriteRequest::new(self.shared.update_sql.clone(), params)
                .with_guard(Box::new(move || !cell.destroyed.load(Ordering::Acquire)))
                .expect_rows(),
        );
    }

    /// Downgrade to a weak handle that does not keep the instance live.
    pub fn downgrade(&self) -> WeakEntity<E> {
        WeakEntity {
            cell: Arc::downgrade(&self.cell),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Destroy this entity.
    ///
    /// Awaits the `before_destroy` hook, sets the terminal destroyed
    /// flag (after which no queued write for this instance is honored,
    /// even one enqueued earlier), evicts the instance from the identity
    /// cache, enqueues the DELETE, and waits on a barrier so that every
    /// visible side effect of destruction -- cascaded foreign keys
    /// included -- has been applied before returning.
    ///
    /// Concurrent destroys of one entity are serialized: only the first
    /// runs the hook and deletes, and the others also return only after
    /// that DELETE is durable. Destroying an already-destroyed entity is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::Queue`] if the write queue has stopped.
    pub async fn destroy(&self) -> Result<(), EntityError> {
        let _gate = self.cell.destroy_gate.lock().await;
        if self.is_destroyed() {
            // The destroy that set the flag held the gate through its
            // barrier, so the row is already durably gone.
            return Ok(());
        }

        if let Some(hooks) = self.shared.hooks.as_ref() {
            hooks.before_destroy(self).await;
        }

        self.cell.destroyed.store(true, Ordering::Release);
        self.shared.cache_remove(self.cell.id);

        self.shared.queue.queue_write(WriteRequest::new(
            self.shared.delete_sql.clone(),
            vec![Value::from(self.cell.id)],
        ));
        self.shared.queue.barrier().await?;

        tracing::debug!(kind = E::KIND, id = self.cell.id, "Entity destroyed");
        Ok(())
    }
}

/// A weak counterpart to [`Entity`].
///
/// Holding one does not keep the instance in memory; upgrade yields the
/// live handle only while some strong handle (or pending write) still
/// exists and the entity has not been destroyed.
pub struct WeakEntity<E: Record> {
    cell: std::sync::Weak<EntityCell<E>>,
    shared: Arc<KindShared<E>>,
}

impl<E: Record> Clone for WeakEntity<E> {
    fn clone(&self) -> Self {
        Self {
            cell: std::sync::Weak::clone(&self.cell),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Record> WeakEntity<E> {
    /// Recover the strong handle if the instance is still live and not
    /// destroyed.
    pub fn upgrade(&self) -> Option<Entity<E>> {
        let cell = self.cell.upgrade()?;
        if cell.destroyed.load(Ordering::Acquire) {
            return None;
        }
        Some(Entity {
            cell,
            shared: Arc::clone(&self.shared),
        })
    }
}
