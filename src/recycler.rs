//! A LIFO pool of reusable expensive resources, with scoped borrow-and-return.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::errors::{ErrorKind, Result};

/// Pool of pre-built `T`s. `acquire` pops the most recently released instance if one is
/// available, otherwise builds a fresh one via the factory supplied at construction.
pub struct Recycler<T> {
    pool: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> Result<T> + Send + Sync>,
    closed: AtomicBool,
}

impl<T> Recycler<T> {
    /// Builds a recycler whose factory may fail (e.g. allocating a large off-heap buffer).
    pub fn new_fallible<F>(factory: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Recycler {
            pool: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds a recycler whose factory is infallible.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new_fallible(move || Ok(factory()))
    }

    /// Returns a pooled instance, or builds a fresh one if the pool is empty.
    pub fn acquire(&self) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorKind::Closed.into());
        }
        if let Some(v) = self.pool.lock().unwrap().pop() {
            return Ok(v);
        }
        (self.factory)()
    }

    /// Returns `value` to the pool for future reuse. No-op (drops `value`) once closed.
    pub fn release(&self, value: T) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.pool.lock().unwrap().push(value);
    }

    /// Runs `body` with a pooled instance, guaranteeing release on every exit path
    /// (including panics unwinding through `body`).
    pub fn scoped<R>(&self, body: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = ReleaseGuard { recycler: self, value: Some(self.acquire()?) };
        let result = body(guard.value.as_mut().unwrap());
        drop(guard);
        Ok(result)
    }

    /// Drains and disposes every pooled instance; subsequent `acquire` calls fail.
    pub fn force_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pool.lock().unwrap().clear();
    }
}

/// Returns its held value to the recycler on drop, including on unwind through `body`.
struct ReleaseGuard<'a, T> {
    recycler: &'a Recycler<T>,
    value: Option<T>,
}

impl<'a, T> Drop for ReleaseGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.recycler.release(value);
        }
    }
}
