use thiserror::Error;

/// Failures surfaced by the engine.
///
/// Socket errors on individual connections never reach callers; they are
/// logged and the connection is torn down inside the loop. What does reach
/// callers is lifecycle misuse and transport failures while opening.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("server is not open")]
    NotOpen,
    #[error("server is already open")]
    AlreadyOpen,
    #[error("server is not running")]
    NotRunning,
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server is already quitting")]
    AlreadyQuitting,
    #[error("refused while the readiness loop is executing")]
    InLoop,
    #[error("refused on the server's own worker thread")]
    WorkerThread,
    #[error("lock released by a thread that does not hold it")]
    LockOwnership,
    #[error("server state is already borrowed on this thread")]
    Reentrant,
    #[error("attachment `{0}` already exists")]
    AttachmentExists(String),
    #[error("attachment `{0}` not found")]
    AttachmentMissing(String),
    #[error("connection {0} no longer exists")]
    StaleConnection(String),
    #[error("no wakeup primitive available")]
    NoWakeup,
    #[error("worker thread panicked")]
    WorkerPanicked,
    #[error("server has been dropped")]
    ServerGone,
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
