//! Corral: an embeddable, single-worker TCP server engine.
//!
//! Applications install hooks (join, leave, data-ready, pre-write) and the
//! engine takes care of accepting, buffering and flushing on one worker
//! thread. Layered protocols keep their own state in named attachments on
//! the server or on each connection.

pub use corral_core::{
    config, error, lock, registry, Attachment, Attachments, EngineError, Lock, LockGuard, Owner,
    RawLock, Result, ServerConfig,
};
pub use corral_dsa::{ByteBuffer, Slab, SlotId};
pub use corral_transport::{
    Connection, ConnectionId, Flush, Hook, HookContext, HookKind, HookTable, ReadWindow, Server,
    ServerBuilder, ServerHandle, Status,
};
