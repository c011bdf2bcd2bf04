use crate::connection::{Connection, ConnectionId};
use crate::dispatcher::Peer;
use crate::server::{ServerHandle, Shared};
use corral_core::{Attachments, EngineError, Result};
use corral_dsa::Slab;
use std::sync::Arc;

/// The four points where user code is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// A connection was accepted. Returning `false` rejects it.
    Join,
    /// A connection is about to be destroyed.
    Leave,
    /// Input arrived.
    DataReady,
    /// A new output batch is about to be flushed.
    PreWrite,
}

pub type JoinFn = dyn Fn(&mut HookContext<'_>) -> bool + Send + Sync;
pub type LeaveFn = dyn Fn(&mut HookContext<'_>) + Send + Sync;
pub type DataReadyFn = dyn Fn(&mut HookContext<'_>, &mut ReadWindow<'_>) + Send + Sync;
pub type PreWriteFn = dyn Fn(&mut HookContext<'_>, &[u8]) + Send + Sync;

/// A typed hook callback.
#[derive(Clone)]
pub enum Hook {
    Join(Arc<JoinFn>),
    Leave(Arc<LeaveFn>),
    DataReady(Arc<DataReadyFn>),
    PreWrite(Arc<PreWriteFn>),
}

impl Hook {
    pub fn join(f: impl Fn(&mut HookContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        Hook::Join(Arc::new(f))
    }

    pub fn leave(f: impl Fn(&mut HookContext<'_>) + Send + Sync + 'static) -> Self {
        Hook::Leave(Arc::new(f))
    }

    pub fn data_ready(
        f: impl Fn(&mut HookContext<'_>, &mut ReadWindow<'_>) + Send + Sync + 'static,
    ) -> Self {
        Hook::DataReady(Arc::new(f))
    }

    pub fn pre_write(f: impl Fn(&mut HookContext<'_>, &[u8]) + Send + Sync + 'static) -> Self {
        Hook::PreWrite(Arc::new(f))
    }

    pub fn kind(&self) -> HookKind {
        match self {
            Hook::Join(_) => HookKind::Join,
            Hook::Leave(_) => HookKind::Leave,
            Hook::DataReady(_) => HookKind::DataReady,
            Hook::PreWrite(_) => HookKind::PreWrite,
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hook::{:?}", self.kind())
    }
}

/// One optional callback per [`HookKind`].
#[derive(Clone, Default)]
pub struct HookTable {
    join: Option<Arc<JoinFn>>,
    leave: Option<Arc<LeaveFn>>,
    data_ready: Option<Arc<DataReadyFn>>,
    pre_write: Option<Arc<PreWriteFn>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `hook`, replacing any callback of the same kind.
    pub fn set(&mut self, hook: Hook) {
        tracing::debug!("HookTable: installing {:?}", hook.kind());
        match hook {
            Hook::Join(f) => self.join = Some(f),
            Hook::Leave(f) => self.leave = Some(f),
            Hook::DataReady(f) => self.data_ready = Some(f),
            Hook::PreWrite(f) => self.pre_write = Some(f),
        }
    }

    /// Removes the callback of `kind`. Returns whether one was installed.
    pub fn clear(&mut self, kind: HookKind) -> bool {
        match kind {
            HookKind::Join => self.join.take().is_some(),
            HookKind::Leave => self.leave.take().is_some(),
            HookKind::DataReady => self.data_ready.take().is_some(),
            HookKind::PreWrite => self.pre_write.take().is_some(),
        }
    }

    pub fn is_set(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::Join => self.join.is_some(),
            HookKind::Leave => self.leave.is_some(),
            HookKind::DataReady => self.data_ready.is_some(),
            HookKind::PreWrite => self.pre_write.is_some(),
        }
    }

    // Getters hand out clones so the callback can run while the table
    // itself is reachable (and replaceable) through the hook context.

    pub fn join(&self) -> Option<Arc<JoinFn>> {
        self.join.clone()
    }

    pub fn leave(&self) -> Option<Arc<LeaveFn>> {
        self.leave.clone()
    }

    pub fn data_ready(&self) -> Option<Arc<DataReadyFn>> {
        self.data_ready.clone()
    }

    pub fn pre_write(&self) -> Option<Arc<PreWriteFn>> {
        self.pre_write.clone()
    }
}

impl std::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookTable")
            .field("join", &self.join.is_some())
            .field("leave", &self.leave.is_some())
            .field("data_ready", &self.data_ready.is_some())
            .field("pre_write", &self.pre_write.is_some())
            .finish()
    }
}

/// Unread input handed to the data-ready hook.
///
/// The hook reports how much it handled with [`consume`](Self::consume);
/// unconsumed bytes stay buffered and are offered again, together with
/// anything that arrives later.
pub struct ReadWindow<'a> {
    data: &'a [u8],
    fresh_from: usize,
    used: usize,
}

impl<'a> ReadWindow<'a> {
    pub(crate) fn new(data: &'a [u8], fresh_from: usize) -> Self {
        Self {
            data,
            fresh_from: fresh_from.min(data.len()),
            used: 0,
        }
    }

    /// Everything not yet consumed.
    pub fn unread(&self) -> &'a [u8] {
        &self.data[self.used..]
    }

    /// Only the bytes never offered before.
    pub fn fresh(&self) -> &'a [u8] {
        &self.data[self.fresh_from.max(self.used)..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks `n` more bytes as handled. Clamped to what remains.
    pub fn consume(&mut self, n: usize) -> usize {
        let remaining = self.len();
        if n > remaining {
            tracing::warn!(
                "ReadWindow: asked to consume {} bytes with {} available",
                n,
                remaining
            );
        }
        let n = n.min(remaining);
        self.used += n;
        n
    }

    /// Consumes everything.
    pub fn consume_all(&mut self) -> usize {
        self.consume(self.len())
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

/// What a hook can reach while it runs on the worker thread.
///
/// The server lock is already held, so everything here is direct access;
/// calling back into [`Server`](crate::Server) or a [`ServerHandle`] from a
/// hook fails with [`EngineError::Reentrant`].
pub struct HookContext<'a> {
    pub(crate) id: ConnectionId,
    pub(crate) conn: &'a mut Connection,
    pub(crate) peers: &'a mut Slab<Peer>,
    pub(crate) hooks: &'a mut HookTable,
    pub(crate) attachments: &'a mut Attachments,
    pub(crate) shared: &'a Arc<Shared>,
}

impl<'a> HookContext<'a> {
    /// The connection the hook fired for.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connection(&mut self) -> &mut Connection {
        self.conn
    }

    pub fn write(&mut self, data: &[u8]) -> usize {
        self.conn.write(data)
    }

    pub fn write_str(&mut self, text: &str) -> usize {
        self.conn.write_str(text)
    }

    /// Closes the current connection gracefully.
    pub fn close(&mut self) -> bool {
        self.conn.close()
    }

    /// Writes to another connection of the same server.
    pub fn write_to(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize> {
        if id == self.id {
            return Ok(self.conn.write(data));
        }
        self.peers
            .get_mut(id)
            .map(|peer| peer.conn.write(data))
            .ok_or_else(|| EngineError::StaleConnection(id.to_string()))
    }

    /// Runs `f` on another connection of the same server.
    pub fn with_peer<R>(&mut self, id: ConnectionId, f: impl FnOnce(&mut Connection) -> R) -> Result<R> {
        if id == self.id {
            return Ok(f(self.conn));
        }
        self.peers
            .get_mut(id)
            .map(|peer| f(&mut peer.conn))
            .ok_or_else(|| EngineError::StaleConnection(id.to_string()))
    }

    /// Writes `data` to every connection, this one included. Returns the
    /// number of connections that accepted it.
    pub fn broadcast(&mut self, data: &[u8]) -> usize {
        let mut count = usize::from(self.conn.write(data) > 0);
        for (_, peer) in self.peers.iter_mut() {
            if peer.conn.write(data) > 0 {
                count += 1;
            }
        }
        count
    }

    pub fn broadcast_str(&mut self, text: &str) -> usize {
        self.broadcast(text.as_bytes())
    }

    /// Live connections, this one included.
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Live connection ids, this one included.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.peers.ids()
    }

    /// The server-level attachment registry.
    pub fn server_attachments(&mut self) -> &mut Attachments {
        self.attachments
    }

    /// Replaces a hook. Takes effect from the next invocation on.
    pub fn set_hook(&mut self, hook: Hook) {
        self.hooks.set(hook);
    }

    pub fn clear_hook(&mut self, kind: HookKind) -> bool {
        self.hooks.clear(kind)
    }

    /// Asks the worker to exit after the current iteration.
    pub fn stop(&self) -> Result<()> {
        self.shared.request_stop()
    }

    /// A handle for use outside the hook, e.g. from another thread.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::from_shared(self.shared)
    }
}
