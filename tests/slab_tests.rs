//! # Slab Tests: generational ids and leasing
//!
//! Validates id stability, stale-id rejection after reuse, and the
//! take/restore/vacate cycle the dispatcher relies on while hooks run.

use corral_dsa::Slab;
use std::time::Instant;

/// Verifies that a removed id never resolves to the entry that reuses
/// its slot.
#[test]
fn test_stale_id_after_reuse() {
    let t = Instant::now();

    let mut slab = Slab::new();
    let first = slab.insert("first");
    assert_eq!(slab.get(first), Some(&"first"));
    assert_eq!(slab.remove(first), Some("first"));
    assert_eq!(slab.get(first), None);

    let second = slab.insert("second");
    assert_eq!(second.index(), first.index(), "Slot should be reused");
    assert_ne!(second.version(), first.version(), "Version must change on reuse");
    assert_eq!(slab.get(first), None, "Stale id must not see the new entry");
    assert_eq!(slab.get(second), Some(&"second"));

    let overhead = t.elapsed();
    println!("test_stale_id_after_reuse: Testing Overhead = {:?}", overhead);
}

/// Verifies that a leased entry keeps its slot and count until restored.
#[test]
fn test_take_and_restore() {
    let t = Instant::now();

    let mut slab = Slab::new();
    let a = slab.insert(1);
    let b = slab.insert(2);

    let value = slab.take(a).unwrap();
    assert!(slab.is_leased(a));
    assert!(slab.contains(a));
    assert_eq!(slab.get(a), None, "Leased entries are not reachable");
    assert_eq!(slab.len(), 2);
    assert_eq!(slab.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![b]);
    assert_eq!(slab.ids(), vec![a, b], "ids() includes leased slots");

    // Slot is reserved: a new insert goes elsewhere.
    let c = slab.insert(3);
    assert_ne!(c.index(), a.index());

    slab.restore(a, value + 10).unwrap();
    assert_eq!(slab.get(a), Some(&11));
    assert!(!slab.is_leased(a));

    let overhead = t.elapsed();
    println!("test_take_and_restore: Testing Overhead = {:?}", overhead);
}

/// Verifies that vacating a lease frees the slot and that restoring into
/// a slot that is not leased hands the value back.
#[test]
fn test_vacate_and_bad_restore() {
    let t = Instant::now();

    let mut slab = Slab::new();
    let id = slab.insert(String::from("conn"));
    let _ = slab.take(id).unwrap();
    assert!(slab.vacate(id));
    assert!(!slab.contains(id));
    assert!(slab.is_empty());
    assert!(!slab.vacate(id), "Second vacate is refused");

    let rejected = slab.restore(id, String::from("late"));
    assert_eq!(rejected, Err(String::from("late")));

    let live = slab.insert(String::from("live"));
    assert!(!slab.vacate(live), "Only leased slots can be vacated");
    assert_eq!(slab.take(id), None);

    let overhead = t.elapsed();
    println!("test_vacate_and_bad_restore: Testing Overhead = {:?}", overhead);
}

/// Verifies id_at and insert_with hand out the id the value lives under.
#[test]
fn test_insert_with_sees_own_id() {
    let t = Instant::now();

    let mut slab = Slab::with_capacity(4);
    let id = slab.insert_with(|id| id);
    assert_eq!(slab.get(id), Some(&id));
    assert_eq!(slab.id_at(id.index()), Some(id));
    assert_eq!(slab.id_at(99), None);

    for (_, value) in slab.iter_mut() {
        assert_eq!(*value, id);
    }

    let overhead = t.elapsed();
    println!("test_insert_with_sees_own_id: Testing Overhead = {:?}", overhead);
}
