#![no_std]
extern crate alloc;

pub mod buffer;
pub mod slab;

pub use buffer::{ByteBuffer, DEFAULT_SEED};
pub use slab::{Slab, SlotId};
