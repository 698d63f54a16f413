// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bounded, thread-safe pool of reusable objects.
//!
//! Objects are created lazily by the pool's factory, up to the capacity,
//! and handed out as [`Pooled`] loans which return to the free list when
//! dropped. Acquisition never blocks on exhaustion; it reports it.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};
use tracing::{debug, trace};

type Factory<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

struct PoolState<T> {
    free: Vec<T>,
    used: usize,
}

struct PoolShared<T> {
    name: &'static str,
    capacity: usize,
    factory: Factory<T>,
    state: Mutex<PoolState<T>>,
}

impl<T> PoolShared<T> {
    fn release(&self, object: T) {
        let mut state = self.state.lock();
        state.used = state.used.saturating_sub(1);
        state.free.push(object);
        trace!(
            pool = self.name,
            in_use = state.used,
            free = state.free.len(),
            "object released"
        );
    }
}

/// Pool of objects of a single kind, shared by clones of the handle.
pub struct ObjectPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Create a pool holding at most `capacity` objects built by `factory`.
    pub fn new<F>(name: &'static str, capacity: usize, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(Error::UnsupportedOperation(format!(
                "{name} pool needs a capacity of at least one"
            )));
        }
        debug!(pool = name, capacity, "pool created");
        Ok(Self {
            shared: Arc::new(PoolShared {
                name,
                capacity,
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    free: Vec::with_capacity(capacity),
                    used: 0,
                }),
            }),
        })
    }

    /// Take a free object, creating one if the pool is below capacity.
    ///
    /// Returns `Ok(None)` when every object is in use and the capacity is
    /// reached, and an error if the factory fails.
    pub fn acquire(&self) -> Result<Option<Pooled<T>>> {
        {
            let mut state = self.shared.state.lock();
            if let Some(object) = state.free.pop() {
                state.used += 1;
                return Ok(Some(self.loan(object)));
            }
            if state.used >= self.shared.capacity {
                debug!(
                    pool = self.shared.name,
                    capacity = self.shared.capacity,
                    "pool exhausted"
                );
                return Ok(None);
            }
            // reserve the slot so concurrent acquirers respect the capacity
            state.used += 1;
        }

        match (self.shared.factory)() {
            Ok(object) => {
                trace!(pool = self.shared.name, "object created");
                Ok(Some(self.loan(object)))
            }
            Err(err) => {
                let mut state = self.shared.state.lock();
                state.used -= 1;
                Err(err)
            }
        }
    }

    /// Like [`ObjectPool::acquire`] but reports exhaustion as
    /// [`Error::ResourceExhausted`].
    pub fn try_acquire(&self) -> Result<Pooled<T>> {
        self.acquire()?
            .ok_or_else(|| Error::ResourceExhausted(self.in_use()))
    }

    /// Return an object to the pool. Equivalent to dropping the loan.
    pub fn release(&self, object: Pooled<T>) {
        drop(object)
    }

    fn loan(&self, object: T) -> Pooled<T> {
        Pooled {
            object: Some(object),
            pool: self.shared.clone(),
        }
    }
}

impl<T> ObjectPool<T> {
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of objects currently on loan.
    pub fn in_use(&self) -> usize {
        self.shared.state.lock().used
    }

    /// Number of idle objects ready for reuse.
    pub fn available(&self) -> usize {
        self.shared.state.lock().free.len()
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ObjectPool")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("in_use", &state.used)
            .field("available", &state.free.len())
            .finish()
    }
}

/// Object on loan from an [`ObjectPool`]; returned to the pool on drop.
pub struct Pooled<T> {
    object: Option<T>,
    pool: Arc<PoolShared<T>>,
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // always Some until drop
        self.object.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.release(object);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.object).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_pool(capacity: usize) -> (ObjectPool<usize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let pool = ObjectPool::new("test", capacity, move || {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        })
        .unwrap();
        (pool, created)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(ObjectPool::new("test", 0, || Ok(0u8)).is_err());
    }

    #[test]
    fn exhaustion_returns_none() {
        let (pool, created) = counting_pool(2);
        let a = pool.acquire().unwrap().unwrap();
        let b = pool.acquire().unwrap().unwrap();
        assert!(pool.acquire().unwrap().is_none());
        assert!(matches!(
            pool.try_acquire(),
            Err(Error::ResourceExhausted(2))
        ));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_ne!(*a, *b);
    }

    #[test]
    fn released_objects_are_reused() {
        let (pool, created) = counting_pool(1);
        let first = *pool.acquire().unwrap().unwrap();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 1);
        let again = pool.acquire().unwrap().unwrap();
        assert_eq!(*again, first);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_failure_frees_the_slot() {
        let pool = ObjectPool::<u8>::new("test", 1, || Err(Error::Provider("boom".into()))).unwrap();
        assert!(pool.acquire().is_err());
        assert_eq!(pool.in_use(), 0);
    }
}
