//! # Buffer Layer Tests: ByteBuffer
//!
//! Validates append ordering, growth from the seed, the zero terminator,
//! and cursor behaviour on consume and read.

use corral_dsa::{ByteBuffer, DEFAULT_SEED};
use std::time::Instant;

/// Verifies that successive appends concatenate in order.
#[test]
fn test_append_concatenates() {
    let t = Instant::now();

    let mut buffer = ByteBuffer::new();
    assert_eq!(buffer.append(b"ab"), 2);
    assert_eq!(buffer.append(b"cd"), 2);
    assert_eq!(buffer.unread(), b"abcd");
    assert_eq!(buffer.len(), 4);
    assert_eq!(buffer.seed(), DEFAULT_SEED);

    let overhead = t.elapsed();
    println!("test_append_concatenates: Testing Overhead = {:?}", overhead);
}

/// Verifies that storage doubles from the seed and always keeps room for
/// the terminator.
#[test]
fn test_growth_keeps_terminator_room() {
    let t = Instant::now();

    let mut buffer = ByteBuffer::with_seed(4);
    assert_eq!(buffer.capacity(), 0, "Nothing is allocated before the first append");

    buffer.append(b"0123456789");
    assert_eq!(buffer.capacity(), 16, "4 -> 8 -> 16 to hold 10 bytes plus terminator");
    assert!(buffer.capacity() >= buffer.len() + 1);
    assert_eq!(buffer.unread_with_nul(), b"0123456789\0");

    buffer.append(b"abcde");
    assert_eq!(buffer.capacity(), 16);
    buffer.append(b"f");
    assert_eq!(buffer.capacity(), 32);
    assert_eq!(buffer.unread_with_nul().last(), Some(&0));

    let overhead = t.elapsed();
    println!("test_growth_keeps_terminator_room: Testing Overhead = {:?}", overhead);
}

/// Verifies that empty appends are no-ops.
#[test]
fn test_empty_append_is_noop() {
    let t = Instant::now();

    let mut buffer = ByteBuffer::with_seed(8);
    assert_eq!(buffer.append(b""), 0);
    assert_eq!(buffer.capacity(), 0);
    assert!(buffer.is_empty());
    assert_eq!(buffer.unread_with_nul(), b"");

    let overhead = t.elapsed();
    println!("test_empty_append_is_noop: Testing Overhead = {:?}", overhead);
}

/// Verifies that the cursor only moves forward and resets once it catches
/// up with the end.
#[test]
fn test_consume_advances_then_resets() {
    let t = Instant::now();

    let mut buffer = ByteBuffer::with_seed(8);
    buffer.append(b"abcdef");

    assert_eq!(buffer.consume(2), 2);
    assert_eq!(buffer.position(), 2);
    assert_eq!(buffer.unread(), b"cdef");
    assert_eq!(buffer.unread_len(), 4);

    assert_eq!(buffer.consume(10), 4, "Consume is clamped to what is unread");
    assert_eq!(buffer.position(), 0);
    assert_eq!(buffer.len(), 0);
    assert!(buffer.is_empty());

    // The allocation survives the reset.
    let capacity = buffer.capacity();
    buffer.append(b"xy");
    assert_eq!(buffer.capacity(), capacity);
    assert_eq!(buffer.unread(), b"xy");

    let overhead = t.elapsed();
    println!("test_consume_advances_then_resets: Testing Overhead = {:?}", overhead);
}

/// Verifies partial reads into a short destination.
#[test]
fn test_read_partial() {
    let t = Instant::now();

    let mut buffer = ByteBuffer::new();
    buffer.append(b"hello");

    let mut out = [0u8; 3];
    assert_eq!(buffer.read(&mut out), 3);
    assert_eq!(&out, b"hel");
    assert_eq!(buffer.unread(), b"lo");

    assert_eq!(buffer.read(&mut out), 2);
    assert_eq!(&out[..2], b"lo");
    assert_eq!(buffer.read(&mut out), 0, "Nothing left to read");

    let overhead = t.elapsed();
    println!("test_read_partial: Testing Overhead = {:?}", overhead);
}

/// Verifies that clear drops the contents but keeps the storage.
#[test]
fn test_clear_keeps_storage() {
    let t = Instant::now();

    let mut buffer = ByteBuffer::with_seed(16);
    buffer.append(b"payload");
    buffer.consume(3);
    buffer.clear();

    assert!(buffer.is_empty());
    assert_eq!(buffer.len(), 0);
    assert_eq!(buffer.position(), 0);
    assert_eq!(buffer.capacity(), 16);

    let overhead = t.elapsed();
    println!("test_clear_keeps_storage: Testing Overhead = {:?}", overhead);
}
