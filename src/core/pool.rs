//! Lock-free object pool for per-request buffers.
//!
//! Buffers are handed out wrapped in [`Pooled`], which resets and returns them
//! to the pool when dropped. The backing store is an `scc::Bag`, so any task
//! on any worker thread can acquire or release without locking.
use std::{
    fmt, mem,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use scc::Bag;

/// Types that can be reset to an empty state for reuse.
pub trait Recycle: Default + Send + 'static {
    fn recycle(&mut self);
}

struct Shared<T> {
    items: Bag<T>,
    idle: AtomicUsize,
    max_idle: usize,
}

/// Thread-safe pool of reusable buffers. Cloning shares the same storage.
pub struct Pool<T: Recycle> {
    shared: Arc<Shared<T>>,
}

impl<T: Recycle> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Recycle> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle())
            .field("max_idle", &self.shared.max_idle)
            .finish()
    }
}

impl<T: Recycle> Pool<T> {
    /// Create a pool keeping at most `max_idle` released items around.
    pub fn new(max_idle: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Bag::new(),
                idle: AtomicUsize::new(0),
                max_idle,
            }),
        }
    }

    /// Take an item from the pool, or build a fresh one when it is empty.
    pub fn acquire(&self) -> Pooled<T> {
        let item = match self.shared.items.pop() {
            Some(item) => {
                self.shared.idle.fetch_sub(1, Ordering::Relaxed);
                item
            }
            None => T::default(),
        };
        Pooled {
            item,
            pool: Some(self.clone()),
        }
    }

    /// Number of items currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.shared.idle.load(Ordering::Relaxed)
    }

    fn release(&self, mut item: T) {
        if self.shared.idle.fetch_add(1, Ordering::Relaxed) >= self.shared.max_idle {
            self.shared.idle.fetch_sub(1, Ordering::Relaxed);
            return;
        }
        item.recycle();
        self.shared.items.push(item);
    }
}

/// An item checked out of a [`Pool`]; goes back on drop.
pub struct Pooled<T: Recycle> {
    item: T,
    pool: Option<Pool<T>>,
}

impl<T: Recycle> Pooled<T> {
    /// Detach the item from the pool.
    pub fn into_inner(mut self) -> T {
        self.pool = None;
        mem::take(&mut self.item)
    }
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.item, f)
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(mem::take(&mut self.item));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::Params;

    #[test]
    fn test_items_are_reset_and_reused() {
        let pool: Pool<Params> = Pool::new(4);
        {
            let mut params = pool.acquire();
            params.push("id", "42");
            params.reserve(8);
        }
        assert_eq!(pool.idle(), 1);

        let params = pool.acquire();
        assert!(params.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_max_idle_is_respected() {
        let pool: Pool<Params> = Pool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_into_inner_detaches() {
        let pool: Pool<Params> = Pool::new(2);
        let mut params = pool.acquire();
        params.push("k", "v");
        let owned = params.into_inner();
        assert_eq!(owned.get("k"), Some("v"));
        assert_eq!(pool.idle(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_release() {
        let pool: Pool<Params> = Pool::new(64);
        let mut tasks = Vec::new();
        for i in 0..32 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let mut params = pool.acquire();
                    assert!(params.is_empty());
                    params.push("n", i.to_string());
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(pool.idle() <= 64);
    }
}
