//! # Lock Tests: RawLock and Lock<T>
//!
//! Validates reentrant depth counting, ownership checks on release,
//! cross-thread exclusion, and reentrant-borrow detection.

use corral_core::{EngineError, Lock, RawLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Verifies that the holder can acquire repeatedly and that the release
/// past depth zero is refused.
#[test]
fn test_reentrant_depth() {
    let t = Instant::now();

    let lock = RawLock::new();
    assert_eq!(lock.acquire(), 1);
    assert_eq!(lock.acquire(), 2);
    assert_eq!(lock.depth(), 2);
    assert!(lock.is_held_by_current_thread());

    assert_eq!(lock.release().unwrap(), 1);
    assert_eq!(lock.release().unwrap(), 0);
    assert!(!lock.is_locked());
    assert!(matches!(lock.release(), Err(EngineError::LockOwnership)));

    let overhead = t.elapsed();
    println!("test_reentrant_depth: Testing Overhead = {:?}", overhead);
}

/// Verifies that a thread that does not hold the lock cannot release it.
#[test]
fn test_foreign_release_refused() {
    let t = Instant::now();

    let lock = Arc::new(RawLock::new());
    lock.acquire();

    let other = lock.clone();
    let result = thread::spawn(move || {
        let refused = matches!(other.release(), Err(EngineError::LockOwnership));
        let blocked = other.try_acquire().is_none();
        (refused, blocked)
    })
    .join()
    .unwrap();

    assert_eq!(result, (true, true));
    assert_eq!(lock.depth(), 1, "Foreign release must not change the depth");
    lock.release().unwrap();

    let overhead = t.elapsed();
    println!("test_foreign_release_refused: Testing Overhead = {:?}", overhead);
}

/// Verifies that a second thread blocks until the holder fully releases.
#[test]
fn test_contender_waits_for_full_release() {
    let t = Instant::now();

    let lock = Arc::new(RawLock::new());
    let entered = Arc::new(AtomicBool::new(false));
    lock.acquire();
    lock.acquire();

    let contender = {
        let lock = lock.clone();
        let entered = entered.clone();
        thread::spawn(move || {
            lock.acquire();
            entered.store(true, Ordering::SeqCst);
            lock.release().unwrap();
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!entered.load(Ordering::SeqCst));
    lock.release().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!entered.load(Ordering::SeqCst), "Depth 1 still excludes others");
    lock.release().unwrap();

    contender.join().unwrap();
    assert!(entered.load(Ordering::SeqCst));
    assert!(!lock.is_locked());

    let overhead = t.elapsed();
    println!("test_contender_waits_for_full_release: Testing Overhead = {:?}", overhead);
}

/// Verifies that borrowing the guarded value twice on one thread reports
/// `Reentrant` instead of panicking.
#[test]
fn test_lock_detects_reentrant_borrow() {
    let t = Instant::now();

    let lock = Lock::new(vec![1, 2, 3]);
    {
        let guard = lock.acquire();
        let value = guard.borrow_mut().unwrap();
        assert_eq!(value.len(), 3);
        assert!(matches!(lock.with(|v| v.len()), Err(EngineError::Reentrant)));
        assert!(matches!(guard.borrow(), Err(EngineError::Reentrant)));
        assert_eq!(guard.depth(), 1, "Failed nested calls must release their level");
    }
    assert!(!lock.is_held_by_current_thread());
    assert_eq!(lock.with(|v| v.len()).unwrap(), 3);

    let overhead = t.elapsed();
    println!("test_lock_detects_reentrant_borrow: Testing Overhead = {:?}", overhead);
}

/// Verifies mutual exclusion across threads.
#[test]
fn test_lock_counts_across_threads() {
    let t = Instant::now();

    let counter = Arc::new(Lock::new(0u64));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    counter.with(|n| *n += 1).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(Arc::try_unwrap(counter).ok().unwrap().into_inner(), 4000);

    let overhead = t.elapsed();
    println!("test_lock_counts_across_threads: Testing Overhead = {:?}", overhead);
}
