//! Per-note mutual exclusion.
//!
//! Re-indexing a note deletes, upserts and commits in sequence. Two rewrites
//! of the same note must not interleave, while rewrites of different notes
//! may run freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder has `path`, then holds it until the guard drops.
    pub async fn lock(&self, path: &str) -> PathGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody else is holding or waiting on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        PathGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of paths currently held or awaited.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}

pub struct PathGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_is_serialized() {
        let locks = PathLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("daily/a.md").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock("a.md").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b.md")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }
}
