//! Per-order serialization lock.
//!
//! Only one attempt may touch a given order at a time. The lock is an
//! injected capability ([`NamedLock`]) so the pipeline runs the same way on
//! an in-process keyed mutex and on PostgreSQL advisory locks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// SQLSTATE `lock_not_available`, raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Key of a named lock, derived from the order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(i64);

impl LockKey {
    /// Folds the 128-bit order UUID into the 64-bit key space of advisory locks.
    pub fn for_order(order_id: OrderId) -> Self {
        let bits = order_id.as_uuid().as_u128();
        Self(((bits >> 64) as u64 ^ bits as u64) as i64)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from a lock backend.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was held by someone else for longer than the timeout.
    #[error("Timed out after {timeout:?} waiting for lock {key}")]
    Timeout { key: LockKey, timeout: Duration },

    /// The lock backend cannot be used.
    #[error("Lock backend unavailable: {0}")]
    Unavailable(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An exclusive lock identified by a key.
///
/// Dropping a handle without calling `release` must still free the lock,
/// so a panicking or cancelled holder never leaves it taken.
#[async_trait]
pub trait NamedLock: Send + Sync {
    type Handle: Send;

    /// Waits up to `timeout` for the lock.
    async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<Self::Handle, LockError>;

    /// Frees a lock obtained from `acquire`.
    async fn release(&self, handle: Self::Handle) -> Result<(), LockError>;
}

/// Runs `f` while holding the lock for `order_id`.
///
/// The handle lives on this frame, so it is dropped (and the lock freed) on
/// every exit path, including a panic inside `f` or cancellation of the
/// returned future.
pub async fn with_order_lock<L, F, Fut, T>(
    lock: &L,
    order_id: OrderId,
    timeout: Duration,
    f: F,
) -> Result<T, LockError>
where
    L: NamedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let key = LockKey::for_order(order_id);
    let handle = lock.acquire(key, timeout).await?;
    tracing::trace!(%order_id, %key, "order lock acquired");

    let output = f().await;

    if let Err(e) = lock.release(handle).await {
        tracing::warn!(%order_id, %key, error = %e, "failed to release order lock");
    }
    Ok(output)
}

/// Keyed in-process mutex.
///
/// Entries are created on demand and removed when the last holder or waiter
/// goes away, whether it released, timed out, or was cancelled.
#[derive(Clone, Default)]
pub struct InMemoryNamedLock {
    locks: Arc<Mutex<HashMap<LockKey, Entry>>>,
}

struct Entry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

/// One holder's or waiter's claim on an entry.
struct Slot {
    locks: Arc<Mutex<HashMap<LockKey, Entry>>>,
    key: LockKey,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = locks.get_mut(&self.key) {
            entry.users -= 1;
            if entry.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

/// Handle for [`InMemoryNamedLock`]; dropping it unlocks.
pub struct InMemoryLockHandle {
    _guard: OwnedMutexGuard<()>,
    _slot: Slot,
}

impl std::fmt::Debug for InMemoryLockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLockHandle").finish_non_exhaustive()
    }
}

impl InMemoryNamedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn join(&self, key: LockKey) -> (Arc<tokio::sync::Mutex<()>>, Slot) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = locks.entry(key).or_insert_with(|| Entry {
            mutex: Arc::default(),
            users: 0,
        });
        entry.users += 1;

        let slot = Slot {
            locks: self.locks.clone(),
            key,
        };
        (entry.mutex.clone(), slot)
    }
}

#[async_trait]
impl NamedLock for InMemoryNamedLock {
    type Handle = InMemoryLockHandle;

    async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<Self::Handle, LockError> {
        let (mutex, slot) = self.join(key);

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(InMemoryLockHandle {
                _guard: guard,
                _slot: slot,
            }),
            Err(_) => Err(LockError::Timeout { key, timeout }),
        }
    }

    async fn release(&self, handle: Self::Handle) -> Result<(), LockError> {
        drop(handle);
        Ok(())
    }
}

/// PostgreSQL transaction-scoped advisory lock.
///
/// Each handle owns a transaction holding `pg_advisory_xact_lock(key)`.
/// Committing releases the lock; dropping the handle rolls the transaction
/// back, which releases it as well.
///
/// A handle pins one connection for the whole critical section, so give
/// this lock its own pool: if holders shared a pool with the order
/// repository, enough of them could drain it and then wait forever on the
/// connections they need to finish.
#[derive(Clone)]
pub struct PostgresAdvisoryLock {
    pool: PgPool,
}

/// Handle for [`PostgresAdvisoryLock`].
pub struct PostgresLockHandle {
    key: LockKey,
    tx: Transaction<'static, Postgres>,
}

impl PostgresAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_in_transaction(
        &self,
        key: LockKey,
        timeout: Duration,
    ) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Server-side bound, so an abandoned wait does not linger in Postgres
        let millis = timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key.as_i64())
            .execute(&mut *tx)
            .await?;

        Ok(tx)
    }
}

#[async_trait]
impl NamedLock for PostgresAdvisoryLock {
    type Handle = PostgresLockHandle;

    /// Waiting for a pooled connection counts against `timeout` too.
    async fn acquire(&self, key: LockKey, timeout: Duration) -> Result<Self::Handle, LockError> {
        let locked = tokio::time::timeout(timeout, self.lock_in_transaction(key, timeout)).await;

        match locked {
            Ok(Ok(tx)) => Ok(PostgresLockHandle { key, tx }),
            Ok(Err(sqlx::Error::PoolTimedOut)) => Err(LockError::Timeout { key, timeout }),
            Ok(Err(e)) => {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
                {
                    return Err(LockError::Timeout { key, timeout });
                }
                Err(LockError::Database(e))
            }
            Err(_) => Err(LockError::Timeout { key, timeout }),
        }
    }

    async fn release(&self, handle: Self::Handle) -> Result<(), LockError> {
        tracing::trace!(key = %handle.key, "releasing advisory lock");
        handle.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable_per_order() {
        let order_id = OrderId::new();
        assert_eq!(LockKey::for_order(order_id), LockKey::for_order(order_id));
    }

    #[test]
    fn lock_key_folds_both_halves() {
        let high = OrderId::from_uuid(uuid::Uuid::from_u128(1u128 << 64));
        let low = OrderId::from_uuid(uuid::Uuid::from_u128(1));
        let both = OrderId::from_uuid(uuid::Uuid::from_u128((1u128 << 64) | 1));

        assert_eq!(LockKey::for_order(high).as_i64(), 1);
        assert_eq!(LockKey::for_order(low).as_i64(), 1);
        assert_eq!(LockKey::for_order(both).as_i64(), 0);
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let lock = InMemoryNamedLock::new();
        let key = LockKey::for_order(OrderId::new());

        let handle = lock.acquire(key, Duration::from_millis(50)).await.unwrap();
        let err = lock
            .acquire(key, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        lock.release(handle).await.unwrap();
        let again = lock.acquire(key, Duration::from_millis(20)).await.unwrap();
        lock.release(again).await.unwrap();
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let lock = InMemoryNamedLock::new();
        let a = lock
            .acquire(LockKey::for_order(OrderId::new()), Duration::from_millis(20))
            .await
            .unwrap();
        let b = lock
            .acquire(LockKey::for_order(OrderId::new()), Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(lock.tracked_keys(), 2);
        lock.release(a).await.unwrap();
        lock.release(b).await.unwrap();
        assert_eq!(lock.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn with_order_lock_returns_closure_output() {
        let lock = InMemoryNamedLock::new();
        let value = with_order_lock(&lock, OrderId::new(), Duration::from_millis(50), || async {
            42
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(lock.tracked_keys(), 0);
    }

    async fn explode() -> u32 {
        panic!("attempt panicked while holding the lock");
    }

    #[tokio::test]
    async fn panic_inside_lock_frees_it() {
        let lock = InMemoryNamedLock::new();
        let order_id = OrderId::new();

        let panicking = {
            let lock = lock.clone();
            tokio::spawn(async move {
                with_order_lock(&lock, order_id, Duration::from_millis(50), explode).await
            })
        };
        assert!(panicking.await.unwrap_err().is_panic());

        let handle = lock
            .acquire(LockKey::for_order(order_id), Duration::from_millis(50))
            .await
            .unwrap();
        lock.release(handle).await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_its_key() {
        let lock = InMemoryNamedLock::new();
        let key = LockKey::for_order(OrderId::new());
        let held = lock.acquire(key, Duration::from_millis(50)).await.unwrap();

        // Queue a waiter, let the holder leave, then drop the waiter before it runs again
        let mut waiter = Box::pin(lock.acquire(key, Duration::from_secs(5)));
        assert!(futures_util::poll!(waiter.as_mut()).is_pending());
        lock.release(held).await.unwrap();
        assert_eq!(lock.tracked_keys(), 1);
        drop(waiter);

        assert_eq!(lock.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn timed_out_waiter_is_pruned_with_the_holder() {
        let lock = InMemoryNamedLock::new();
        let key = LockKey::for_order(OrderId::new());
        let held = lock.acquire(key, Duration::from_millis(50)).await.unwrap();

        let err = lock
            .acquire(key, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert_eq!(lock.tracked_keys(), 1);

        drop(held);
        assert_eq!(lock.tracked_keys(), 0);
    }
}
