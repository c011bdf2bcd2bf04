use crate::error::{EngineError, Result};
use parking_lot::{Condvar, Mutex};
use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::thread::{self, ThreadId};

#[derive(Default)]
struct Ownership {
    holder: Option<ThreadId>,
    depth: usize,
}

/// A reentrant lock with explicit acquire/release counting.
///
/// The holding thread may acquire again without blocking; only the release
/// matching the first acquire lets another thread in. Releasing from a
/// thread that does not hold the lock, or past depth zero, is refused with
/// [`EngineError::LockOwnership`].
pub struct RawLock {
    state: Mutex<Ownership>,
    released: Condvar,
}

impl RawLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Ownership::default()),
            released: Condvar::new(),
        }
    }

    /// Blocks until the lock is available and returns the new depth.
    pub fn acquire(&self) -> usize {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.holder == Some(me) {
            state.depth += 1;
            return state.depth;
        }
        while state.holder.is_some() {
            self.released.wait(&mut state);
        }
        state.holder = Some(me);
        state.depth = 1;
        1
    }

    /// Acquires without blocking. `None` if another thread holds the lock.
    pub fn try_acquire(&self) -> Option<usize> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.holder {
            Some(holder) if holder == me => {
                state.depth += 1;
                Some(state.depth)
            }
            Some(_) => None,
            None => {
                state.holder = Some(me);
                state.depth = 1;
                Some(1)
            }
        }
    }

    /// Drops one level of ownership and returns the remaining depth.
    pub fn release(&self) -> Result<usize> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.depth == 0 || state.holder != Some(me) {
            return Err(EngineError::LockOwnership);
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(state.depth);
        }
        state.holder = None;
        drop(state);
        self.released.notify_one();
        Ok(0)
    }

    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().holder.is_some()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().holder == Some(thread::current().id())
    }
}

impl Default for RawLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A value guarded by a [`RawLock`].
///
/// The value sits in a `RefCell`: the lock keeps other threads out, the cell
/// catches the holding thread borrowing twice (a hook calling back into a
/// locked accessor) and reports it as [`EngineError::Reentrant`].
pub struct Lock<T> {
    raw: RawLock,
    value: RefCell<T>,
}

// SAFETY: `value` is only reachable through a `LockGuard`, which exists only
// while the current thread holds `raw` and cannot leave that thread.
unsafe impl<T: Send> Sync for Lock<T> {}

impl<T> Lock<T> {
    pub fn new(value: T) -> Self {
        Self {
            raw: RawLock::new(),
            value: RefCell::new(value),
        }
    }

    pub fn acquire(&self) -> LockGuard<'_, T> {
        self.raw.acquire();
        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` on the value with the lock held for the whole call.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let guard = self.acquire();
        let mut value = guard.borrow_mut()?;
        Ok(f(&mut value))
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.raw.is_held_by_current_thread()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Scoped ownership of a [`Lock`]; dropping it performs the matching release.
pub struct LockGuard<'a, T> {
    lock: &'a Lock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> LockGuard<'_, T> {
    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        self.lock.value.try_borrow().map_err(|_| EngineError::Reentrant)
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>> {
        self.lock
            .value
            .try_borrow_mut()
            .map_err(|_| EngineError::Reentrant)
    }

    pub fn depth(&self) -> usize {
        self.lock.raw.depth()
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.raw.release() {
            tracing::error!("LockGuard: release failed: {}", e);
        }
    }
}
