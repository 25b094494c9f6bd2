//! Single-consumer ordered write queue.
//!
//! Every database-mutating statement is appended to this queue and
//! applied by exactly one consumer task owning a dedicated connection.
//! Producers never wait for the database: [`WriteQueue::queue_write`]
//! returns as soon as the request is enqueued. Callers that need
//! read-after-write consistency await [`WriteQueue::barrier`], which
//! resolves once every write enqueued before it has been submitted.
//!
//! Entries are never reordered or batched out of order. Write latency is
//! not a correctness concern here; write *order* is.
//!
//! # Guards
//!
//! A write may carry a guard predicate. Guards are evaluated immediately
//! before the write is applied (flush time, never enqueue time); a false
//! guard discards the write silently. This is the intended behavior for
//! writes that raced against an entity's destruction -- discarding is
//! not an error, but it is observable through
//! [`WriteQueue::discarded_writes`] and a `tracing` debug event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sqlx::pool::PoolConnection;
use sqlx::postgres::PgArguments;
use sqlx::{Postgres, Connection as _};
use tokio::sync::{mpsc, oneshot};

use mudlark_schema::Value;

use crate::error::DbError;
use crate::postgres::DbPool;

/// A flush-time predicate deciding whether a queued write still applies.
pub type Guard = Box<dyn Fn() -> bool + Send + 'static>;

/// Errors that can occur in the write queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Executing a queued statement failed.
    ///
    /// This indicates a fundamental invariant violation (bad generated
    /// SQL, lost connection, a row deleted outside the queue's
    /// knowledge) and stops the consumer.
    #[error("write failed for `{sql}`: {message}")]
    WriteFailed {
        /// The statement that failed.
        sql: String,
        /// Description of the underlying database error.
        message: String,
    },

    /// An UPDATE that must affect its target row affected none.
    ///
    /// The target row was deleted outside the queue's knowledge.
    #[error("statement affected no rows: `{sql}`")]
    NoRowsAffected {
        /// The statement that affected nothing.
        sql: String,
    },

    /// The consumer task is no longer running.
    #[error("write queue consumer is gone")]
    ConsumerGone,
}

/// An ordered write request: optional guard, SQL text, and positional
/// parameters.
pub struct WriteRequest {
    /// Flush-time predicate; `false` discards the write.
    pub guard: Option<Guard>,
    /// Parameterized SQL text.
    pub sql: String,
    /// Positional parameters in `$1..$n` order.
    pub params: Vec<Value>,
    /// Whether zero affected rows is an invariant violation.
    ///
    /// Set for UPDATEs (their target row must exist once the guard has
    /// passed) and for INSERTs of freshly allocated ids (the row cannot
    /// already exist); left unset for DELETE.
    pub must_affect_rows: bool,
}

impl WriteRequest {
    /// Create an unguarded write request.
    pub fn new(sql: String, params: Vec<Value>) -> Self {
        Self {
            guard: None,
            sql,
            params,
            must_affect_rows: false,
        }
    }

    /// Attach a flush-time guard.
    #[must_use]
    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Mark that this statement must affect at least one row.
    #[must_use]
    pub const fn expect_rows(mut self) -> Self {
        self.must_affect_rows = true;
        self
    }
}

impl std::fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRequest")
            .field("guard", &self.guard.as_ref().map(|_| "<fn>"))
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("must_affect_rows", &self.must_affect_rows)
            .finish()
    }
}

/// A queue entry: either a write or a barrier marker.
enum QueueEntry {
    /// A pending database write.
    Write(WriteRequest),
    /// A synchronization fence; completed when the consumer reaches it.
    Barrier(oneshot::Sender<()>),
    /// Orderly stop marker; the consumer exits when it reaches it.
    Shutdown,
}

/// Producer handle to the write queue.
///
/// Cheap to clone; all clones feed the same single consumer.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
    discarded: Arc<AtomicU64>,
}

impl WriteQueue {
    /// Create a queue and its consumer half.
    ///
    /// The consumer must be driven by calling [`QueueConsumer::run`] on
    /// a dedicated task; until then, writes accumulate unbounded.
    pub fn new() -> (Self, QueueConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let discarded = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                discarded: Arc::clone(&discarded),
            },
            QueueConsumer { rx, discarded },
        )
    }

    /// Append a write to the tail of the queue.
    ///
    /// Returns immediately; the write is applied asynchronously, in
    /// order. If the consumer has stopped the request is dropped with a
    /// warning -- the process is shutting down at that point.
    pub fn queue_write(&self, request: WriteRequest) {
        if let Err(error) = self.tx.send(QueueEntry::Write(request)) {
            tracing::warn!(%error, "Write queued after consumer stopped; dropped");
        }
    }

    /// Await a fence: resolves once every write enqueued strictly before
    /// this call has been submitted to the database.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConsumerGone`] if the consumer has stopped.
    pub async fn barrier(&self) -> Result<(), QueueError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(QueueEntry::Barrier(tx))
            .map_err(|_| QueueError::ConsumerGone)?;
        rx.await.map_err(|_| QueueError::ConsumerGone)
    }

    /// Ask the consumer to stop once it reaches this point in the queue.
    ///
    /// Writes enqueued before this call are still applied; anything
    /// enqueued after it is dropped. Producer handles may outlive the
    /// consumer (entity handles hold one each), so orderly shutdown
    /// cannot wait for every handle to drop.
    pub fn close(&self) {
        let _ = self.tx.send(QueueEntry::Shutdown);
    }

    /// Number of guarded writes discarded so far.
    pub fn discarded_writes(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// Applies queued statements against a [`WriteExecutor`].
pub trait WriteExecutor: Send {
    /// Execute one parameterized statement, returning affected rows.
    fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<u64, QueueError>> + Send;
}

/// Consumer half of the write queue.
///
/// Owns the receiving end; exactly one consumer exists per queue.
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<QueueEntry>,
    discarded: Arc<AtomicU64>,
}

impl QueueConsumer {
    /// Process queue entries until every producer handle is dropped or a
    /// [`WriteQueue::close`] marker is reached.
    ///
    /// Writes are applied strictly FIFO. Guarded writes whose guard
    /// returns `false` are discarded and counted. Barrier markers signal
    /// their waiters and processing continues.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when a statement fails or a must-affect
    /// statement affects no rows. The statement and its parameters are
    /// logged with full context before returning; queued entries behind
    /// the failure are dropped.
    pub async fn run<X: WriteExecutor>(mut self, mut executor: X) -> Result<(), QueueError> {
        while let Some(entry) = self.rx.recv().await {
            match entry {
                QueueEntry::Write(request) => {
                    if let Some(guard) = request.guard.as_ref() {
                        if !guard() {
                            self.discarded.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(sql = %request.sql, "Guarded write discarded");
                            continue;
                        }
                    }
                    let affected = match executor.execute(&request.sql, &request.params).await {
                        Ok(affected) => affected,
                        Err(error) => {
                            tracing::error!(
                                sql = %request.sql,
                                params = ?request.params,
                                %error,
                                "Queued write failed"
                            );
                            return Err(error);
                        }
                    };
                    if request.must_affect_rows && affected == 0 {
                        tracing::error!(
                            sql = %request.sql,
                            params = ?request.params,
                            "Queued write affected no rows"
                        );
                        return Err(QueueError::NoRowsAffected { sql: request.sql });
                    }
                }
                QueueEntry::Barrier(waiter) => {
                    // A dropped waiter is fine; it no longer cares.
                    let _ = waiter.send(());
                }
                QueueEntry::Shutdown => break,
            }
        }
        tracing::debug!("Write queue drained, consumer stopping");
        Ok(())
    }
}

/// Bind a [`Value`] as the next positional parameter.
pub(crate) fn bind_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Double(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
    }
}

/// Production executor: one dedicated pooled connection.
///
/// The connection is checked out once and held for the consumer's whole
/// life, so no other task can interleave statements on it.
pub struct PgWriteExecutor {
    conn: PoolConnection<Postgres>,
}

impl PgWriteExecutor {
    /// Check a dedicated connection out of the pool.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if acquisition fails.
    pub async fn acquire(pool: &DbPool) -> Result<Self, DbError> {
        let conn = pool.inner().acquire().await?;
        Ok(Self { conn })
    }

    /// Ping the dedicated connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the connection is broken.
    pub async fn ping(&mut self) -> Result<(), DbError> {
        self.conn.ping().await?;
        Ok(())
    }
}

impl WriteExecutor for PgWriteExecutor {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, QueueError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query
            .execute(&mut *self.conn)
            .await
            .map_err(|e| QueueError::WriteFailed {
                sql: sql.to_owned(),
                message: e.to_string(),
            })?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Test executor that records every applied statement.
    struct RecordingExecutor {
        applied: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
        rows_affected: u64,
    }

    impl RecordingExecutor {
        fn new(rows_affected: u64) -> (Self, Arc<Mutex<Vec<(String, Vec<Value>)>>>) {
            let applied = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    applied: Arc::clone(&applied),
                    rows_affected,
                },
                applied,
            )
        }
    }

    impl WriteExecutor for RecordingExecutor {
        async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, QueueError> {
            self.applied
                .lock()
                .unwrap()
                .push((sql.to_owned(), params.to_vec()));
            Ok(self.rows_affected)
        }
    }

    #[tokio::test]
    async fn writes_are_applied_in_enqueue_order() {
        let (queue, consumer) = WriteQueue::new();
        let (executor, applied) = RecordingExecutor::new(1);
        let worker = tokio::spawn(consumer.run(executor));

        queue.queue_write(WriteRequest::new("W1".to_owned(), vec![Value::from(1)]));
        queue.queue_write(WriteRequest::new("W2".to_owned(), vec![Value::from(2)]));
        queue.barrier().await.unwrap();

        let seen = applied.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("W1".to_owned(), vec![Value::from(1)]),
                ("W2".to_owned(), vec![Value::from(2)]),
            ]
        );

        drop(queue);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn false_guard_discards_write_observably() {
        let (queue, consumer) = WriteQueue::new();
        let (executor, applied) = RecordingExecutor::new(1);
        let worker = tokio::spawn(consumer.run(executor));

        queue.queue_write(
            WriteRequest::new("SKIPPED".to_owned(), vec![]).with_guard(Box::new(|| false)),
        );
        queue.queue_write(WriteRequest::new("KEPT".to_owned(), vec![]));
        queue.barrier().await.unwrap();

        let seen: Vec<String> = applied
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect();
        assert_eq!(seen, vec!["KEPT".to_owned()]);
        assert_eq!(queue.discarded_writes(), 1);

        drop(queue);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn guard_is_evaluated_at_flush_time() {
        // The guard flips after enqueue but before the consumer starts;
        // flush-time evaluation must observe the new state.
        let alive = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let (queue, consumer) = WriteQueue::new();
        let (executor, applied) = RecordingExecutor::new(1);

        let guard_flag = Arc::clone(&alive);
        queue.queue_write(
            WriteRequest::new("LATE".to_owned(), vec![]).with_guard(Box::new(move || {
                guard_flag.load(Ordering::Relaxed)
            })),
        );
        alive.store(false, Ordering::Relaxed);

        let worker = tokio::spawn(consumer.run(executor));
        queue.barrier().await.unwrap();

        assert!(applied.lock().unwrap().is_empty());
        assert_eq!(queue.discarded_writes(), 1);

        drop(queue);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn barrier_resolves_after_prior_writes_only() {
        let (queue, consumer) = WriteQueue::new();
        let (executor, applied) = RecordingExecutor::new(1);
        let worker = tokio::spawn(consumer.run(executor));

        queue.queue_write(WriteRequest::new("BEFORE".to_owned(), vec![]));
        queue.barrier().await.unwrap();
        let seen_at_barrier = applied.lock().unwrap().len();
        queue.queue_write(WriteRequest::new("AFTER".to_owned(), vec![]));
        queue.barrier().await.unwrap();

        assert_eq!(seen_at_barrier, 1);
        assert_eq!(applied.lock().unwrap().len(), 2);

        drop(queue);
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn zero_row_update_stops_the_consumer() {
        let (queue, consumer) = WriteQueue::new();
        let (executor, _applied) = RecordingExecutor::new(0);
        let worker = tokio::spawn(consumer.run(executor));

        queue.queue_write(WriteRequest::new("UPDATE nothing".to_owned(), vec![]).expect_rows());

        let result = worker.await.unwrap();
        assert!(matches!(result, Err(QueueError::NoRowsAffected { .. })));

        // Later barriers observe the dead consumer.
        assert!(matches!(
            queue.barrier().await,
            Err(QueueError::ConsumerGone)
        ));
    }

    #[tokio::test]
    async fn close_stops_the_consumer_with_producers_still_alive() {
        let (queue, consumer) = WriteQueue::new();
        let (executor, applied) = RecordingExecutor::new(1);
        let worker = tokio::spawn(consumer.run(executor));

        queue.queue_write(WriteRequest::new("BEFORE".to_owned(), vec![]));
        queue.close();

        // The queue handle is still alive, yet the consumer must exit
        // after applying everything enqueued before the close.
        worker.await.unwrap().unwrap();
        assert_eq!(applied.lock().unwrap().len(), 1);
        assert!(matches!(
            queue.barrier().await,
            Err(QueueError::ConsumerGone)
        ));
    }

    #[tokio::test]
    async fn consumer_stops_when_producers_drop() {
        let (queue, consumer) = WriteQueue::new();
        let (executor, applied) = RecordingExecutor::new(1);
        let worker = tokio::spawn(consumer.run(executor));

        queue.queue_write(WriteRequest::new("LAST".to_owned(), vec![]));
        drop(queue);

        worker.await.unwrap().unwrap();
        assert_eq!(applied.lock().unwrap().len(), 1);
    }
}
