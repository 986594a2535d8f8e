//! Named mutual-exclusion locks with a bounded acquisition budget.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use tokio::{
    sync::{Mutex as TokioMutex, OwnedMutexGuard},
    time,
};

use crate::{RangecoreError, RangecoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A registry of named locks.
///
/// A lock is identified by name alone, so independent callers contending for
/// the same shared resource serialize on the same mutex. Guards release on
/// drop, on every exit path.
#[derive(Debug, Default)]
pub struct NamedLocks {
    locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NamedLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the named lock, retrying up to `attempts` times with `backoff`
    /// sleeps between attempts. Exhausting the budget fails with
    /// [`RangecoreError::LockTimeout`].
    pub async fn acquire(
        &self,
        name: &str,
        attempts: u32,
        backoff: Duration,
    ) -> RangecoreResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock registry poisoned");
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(())))
                .clone()
        };

        for attempt in 0..attempts {
            if let Ok(guard) = lock.clone().try_lock_owned() {
                return Ok(guard);
            }
            tracing::debug!(
                "lock '{}' held, attempt {}/{}",
                name,
                attempt + 1,
                attempts
            );
            time::sleep(backoff).await;
        }

        Err(RangecoreError::LockTimeout {
            name: name.to_string(),
            attempts,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_free_lock() -> RangecoreResult<()> {
        let locks = NamedLocks::new();
        let _guard = locks
            .acquire("pool", 3, Duration::from_millis(1))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() -> RangecoreResult<()> {
        let locks = NamedLocks::new();
        let _held = locks
            .acquire("pool", 3, Duration::from_millis(1))
            .await?;

        let result = locks.acquire("pool", 2, Duration::from_millis(1)).await;
        assert!(matches!(
            result,
            Err(RangecoreError::LockTimeout { attempts: 2, .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() -> RangecoreResult<()> {
        let locks = NamedLocks::new();
        {
            let _guard = locks
                .acquire("pool", 1, Duration::from_millis(1))
                .await?;
        }
        // Reacquire succeeds because the guard dropped.
        let _guard = locks.acquire("pool", 1, Duration::from_millis(1)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_distinct_names_do_not_contend() -> RangecoreResult<()> {
        let locks = NamedLocks::new();
        let _first = locks
            .acquire("pool-a", 1, Duration::from_millis(1))
            .await?;
        let _second = locks
            .acquire("pool-b", 1, Duration::from_millis(1))
            .await?;
        Ok(())
    }
}
