//! `allowance::AdvisoryLock` backed by a Postgres transaction-scoped
//! advisory lock (`pg_try_advisory_xact_lock`): the lock is held by the
//! transaction, not the session, so releasing it is just letting the
//! transaction end - no explicit unlock call needed on drop, which would
//! otherwise require blocking on async work from a synchronous `Drop`
//! (spec.md §4.3, "`ALLOWANCE_FETCHING`"; spec.md §5: "no critical section
//! spans a suspension except holding an advisory lock for the duration of
//! a bounded work unit").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use allowance::advisory_lock::{AdvisoryLock, LockGuard};

pub struct PostgresAdvisoryLock {
    pool: PgPool,
}

impl PostgresAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `pg_advisory_xact_lock` takes a single `bigint` key; lock names are
/// hashed into one deterministically so callers keep using readable names
/// like `ALLOWANCE_FETCHING`.
fn lock_key(name: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as i64
}

struct PgLockGuard {
    // Held only to keep the transaction (and therefore the lock) alive;
    // `sqlx::Transaction::drop` rolls back without blocking, which is what
    // releases the advisory lock.
    #[allow(dead_code)]
    tx: Transaction<'static, Postgres>,
}

impl LockGuard for PgLockGuard {}

#[async_trait]
impl AdvisoryLock for PostgresAdvisoryLock {
    async fn try_acquire(&self, name: &str) -> Option<Box<dyn LockGuard>> {
        let mut tx = self.pool.begin().await.ok()?;
        let key = lock_key(name);
        let acquired: Option<(bool,)> = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .ok()?;

        match acquired {
            Some((true,)) => Some(Box::new(PgLockGuard { tx })),
            _ => {
                let _ = tx.rollback().await;
                None
            }
        }
    }
}
