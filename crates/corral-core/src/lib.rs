pub mod config;
pub mod error;
pub mod lock;
pub mod registry;

pub use config::ServerConfig;
pub use error::{EngineError, Result};
pub use lock::{Lock, LockGuard, RawLock};
pub use registry::{Attachment, Attachments, Owner};
