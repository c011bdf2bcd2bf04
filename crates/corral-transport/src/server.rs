use crate::connection::{Connection, ConnectionId};
use crate::dispatcher::{Core, Dispatcher, LISTENER, WAKER};
use crate::hooks::{Hook, HookKind, HookTable};
use corral_core::{EngineError, Lock, Result, ServerConfig};
use mio::net::TcpListener;
use mio::{Interest, Poll, Waker};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use std::any::Any;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

pub(crate) const OPEN: u8 = 1 << 0;
pub(crate) const RUNNING: u8 = 1 << 1;
pub(crate) const QUIT: u8 = 1 << 2;
pub(crate) const IN_LOOP: u8 = 1 << 3;
pub(crate) const WAKEUP: u8 = 1 << 4;
pub(crate) const FREED: u8 = 1 << 5;

/// State shared by the server, its handles and the worker thread.
pub(crate) struct Shared {
    state: AtomicU8,
    pub(crate) core: Lock<Core>,
    waker: RwLock<Option<Arc<Waker>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Mutex<Option<ThreadId>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Shared {
    fn new(config: ServerConfig, hooks: HookTable) -> Self {
        Self {
            state: AtomicU8::new(0),
            core: Lock::new(Core::new(config, hooks)),
            waker: RwLock::new(None),
            worker: Mutex::new(None),
            worker_id: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub(crate) fn has(&self, flag: u8) -> bool {
        self.state.load(Ordering::Acquire) & flag != 0
    }

    pub(crate) fn set(&self, flag: u8) {
        self.state.fetch_or(flag, Ordering::AcqRel);
    }

    pub(crate) fn unset(&self, flag: u8) {
        self.state.fetch_and(!flag, Ordering::AcqRel);
    }

    fn on_worker_thread(&self) -> bool {
        *self.worker_id.lock() == Some(thread::current().id())
    }

    pub(crate) fn enter_worker(&self, id: ThreadId) {
        *self.worker_id.lock() = Some(id);
    }

    /// Called by the worker once its loop has exited.
    pub(crate) fn finish(self: &Arc<Self>, poll: Poll) {
        let auto_close = match self.core.with(|core| {
            core.poll = Some(poll);
            core.auto_close
        }) {
            Ok(auto_close) => auto_close,
            Err(e) => {
                tracing::error!("Server: worker could not hand back the poll instance: {}", e);
                false
            }
        };
        if auto_close {
            self.teardown();
        }
        *self.worker_id.lock() = None;
        self.unset(RUNNING | QUIT | IN_LOOP);
        tracing::info!("Server: worker stopped");
    }

    fn open(&self) -> Result<()> {
        let guard = self.core.acquire();
        let mut core = guard.borrow_mut()?;
        if self.has(OPEN) {
            return Err(EngineError::AlreadyOpen);
        }

        let mut listener = bind_listener(&core.config)?;
        let local_addr = listener.local_addr()?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let registry = poll.registry().try_clone()?;

        if !core.config.wakeup {
            tracing::debug!(
                "Server: wakeup disabled, waiting in {}ms slices",
                core.config.idle_poll_ms
            );
        } else {
            match Waker::new(poll.registry(), WAKER) {
                Ok(waker) => {
                    *self.waker.write() = Some(Arc::new(waker));
                    self.set(WAKEUP);
                }
                Err(e) => {
                    tracing::warn!(
                        "Server: no wakeup primitive ({}). Falling back to {}ms timed waits.",
                        e,
                        core.config.idle_poll_ms
                    );
                }
            }
        }

        core.listener = Some(listener);
        core.poll = Some(poll);
        core.registry = Some(registry);
        *self.local_addr.lock() = Some(local_addr);
        self.set(OPEN);
        tracing::info!("Server: listening on {}", local_addr);
        Ok(())
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        if self.has(RUNNING) {
            return Err(EngineError::AlreadyRunning);
        }
        let implicit = !self.has(OPEN);
        if implicit {
            self.open()?;
        }

        let (poll, config) = {
            let guard = self.core.acquire();
            let mut core = guard.borrow_mut()?;
            let poll = core.poll.take().ok_or(EngineError::NotOpen)?;
            if implicit {
                core.auto_close = true;
            }
            (poll, core.config.clone())
        };

        self.unset(QUIT);
        self.set(RUNNING);
        let dispatcher = Dispatcher::new(poll, Arc::clone(self), &config, self.has(WAKEUP));
        let spawned = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || dispatcher.run());

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                tracing::info!("Server: worker `{}` started", config.thread_name);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Server: unable to spawn worker: {}", e);
                self.unset(RUNNING);
                // The poll instance went down with the closure.
                self.teardown();
                Err(e.into())
            }
        }
    }

    pub(crate) fn interrupt(&self) -> Result<()> {
        if !self.has(RUNNING) {
            return Err(EngineError::NotRunning);
        }
        let waker = self.waker.read().clone().ok_or(EngineError::NoWakeup)?;
        waker.wake().map_err(|e| {
            tracing::warn!("Server: wakeup failed: {}", e);
            EngineError::from(e)
        })
    }

    /// Wakes the worker after state was changed from outside the loop.
    fn nudge(&self) {
        if self.has(RUNNING) && !self.on_worker_thread() {
            let _ = self.interrupt();
        }
    }

    pub(crate) fn request_stop(&self) -> Result<()> {
        if !self.has(RUNNING) {
            return Err(EngineError::NotRunning);
        }
        if self.has(QUIT) {
            return Err(EngineError::AlreadyQuitting);
        }
        self.set(QUIT);
        tracing::info!("Server: stop requested");
        let _ = self.interrupt();
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        if self.on_worker_thread() {
            return Err(EngineError::WorkerThread);
        }
        let handle = self.worker.lock().take().ok_or(EngineError::NotRunning)?;
        if handle.join().is_err() {
            tracing::error!("Server: worker panicked");
            *self.worker_id.lock() = None;
            self.unset(RUNNING | QUIT | IN_LOOP);
            return Err(EngineError::WorkerPanicked);
        }
        Ok(())
    }

    fn close(self: &Arc<Self>) -> Result<()> {
        if self.on_worker_thread() {
            return Err(if self.has(IN_LOOP) {
                EngineError::InLoop
            } else {
                EngineError::WorkerThread
            });
        }
        if !self.has(OPEN) {
            return Err(EngineError::NotOpen);
        }
        if self.has(RUNNING) {
            match self.request_stop() {
                Ok(()) | Err(EngineError::AlreadyQuitting) | Err(EngineError::NotRunning) => {}
                Err(e) => return Err(e),
            }
            match self.wait() {
                Ok(()) | Err(EngineError::NotRunning) => {}
                Err(e) => return Err(e),
            }
            if self.has(RUNNING) {
                // Another thread holds the join handle and the worker is
                // still winding down.
                return Err(EngineError::AlreadyRunning);
            }
        }
        if !self.has(OPEN) {
            // The worker closed it on its way out.
            return Ok(());
        }
        self.teardown();
        Ok(())
    }

    /// Destroys every connection and releases the listener and poll.
    pub(crate) fn teardown(self: &Arc<Self>) {
        let guard = self.core.acquire();
        let mut core = match guard.borrow_mut() {
            Ok(core) => core,
            Err(e) => {
                tracing::error!("Server: close refused: {}", e);
                return;
            }
        };
        if !self.has(OPEN) {
            return;
        }

        let ids = core.peers.ids();
        for id in ids {
            core.destroy(self, id);
        }
        let registry = core.registry.take();
        if let (Some(registry), Some(listener)) = (registry, core.listener.as_mut()) {
            let _ = registry.deregister(listener);
        }
        core.listener = None;
        core.poll = None;
        core.auto_close = false;

        *self.waker.write() = None;
        *self.local_addr.lock() = None;
        self.unset(OPEN | WAKEUP);
        tracing::info!("Server: closed");
    }

    fn free(self: &Arc<Self>) -> Result<()> {
        if self.on_worker_thread() {
            return Err(EngineError::WorkerThread);
        }
        if self.has(FREED) {
            return Ok(());
        }

        match self.request_stop() {
            Ok(()) | Err(EngineError::NotRunning) | Err(EngineError::AlreadyQuitting) => {}
            Err(e) => return Err(e),
        }
        match self.wait() {
            Ok(()) | Err(EngineError::NotRunning) | Err(EngineError::WorkerPanicked) => {}
            Err(e) => return Err(e),
        }
        self.teardown();
        self.core.with(|core| {
            core.attachments.clear();
            core.hooks = HookTable::default();
        })?;
        self.set(FREED);
        tracing::info!("Server: freed");
        Ok(())
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> Result<R> {
        self.core.with(f)
    }

    fn broadcast(&self, data: &[u8]) -> Result<usize> {
        let count = self.with_core(|core| {
            let mut count = 0;
            for (_, peer) in core.peers.iter_mut() {
                if peer.conn.write(data) > 0 {
                    count += 1;
                }
            }
            count
        })?;
        if count > 0 {
            self.nudge();
        }
        Ok(count)
    }

    fn with_connection<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Connection) -> R) -> Result<R> {
        let result = self
            .with_core(|core| core.peers.get_mut(id).map(|peer| f(&mut peer.conn)))?
            .ok_or_else(|| EngineError::StaleConnection(id.to_string()))?;
        self.nudge();
        Ok(result)
    }

    fn connection_ids(&self) -> Result<Vec<ConnectionId>> {
        self.with_core(|core| core.peers.ids())
    }

    fn connection_count(&self) -> Result<usize> {
        self.with_core(|core| core.peers.len())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

fn bind_listener(config: &ServerConfig) -> Result<TcpListener> {
    let addr = SocketAddr::V4(SocketAddrV4::new(config.host, config.port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.bind(&addr.into()) {
        tracing::error!("Server: unable to bind {}: {}", addr, e);
        return Err(e.into());
    }
    socket.listen(config.backlog)?;
    socket.set_nonblocking(true)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// An embeddable TCP server driven by one worker thread.
///
/// ## Lifecycle
/// `open` binds and listens, `start` spawns the worker (opening first if
/// needed), `stop` asks it to exit, `wait` joins it, `close` drops every
/// connection and the listener, `free` does all of the above and releases
/// hooks and attachments. Dropping a `Server` frees it.
///
/// A server opened implicitly by `start` is closed by its worker on exit.
/// After an explicit `open` it stays open across stop/start cycles until
/// `close` is called.
///
/// ## Threads
/// Every method takes the server lock. Hooks run on the worker with that
/// lock held and reach the server through their
/// [`HookContext`](crate::HookContext); calling back into the `Server`
/// from a hook returns [`EngineError::Reentrant`].
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Validates `config` and creates the (closed) server.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_hooks(config, HookTable::default()))
    }

    pub(crate) fn with_hooks(config: ServerConfig, hooks: HookTable) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, hooks)),
        }
    }

    /// A server on `port` with default settings otherwise.
    pub fn with_port(port: u16) -> Result<Self> {
        Self::new(ServerConfig {
            port,
            ..ServerConfig::default()
        })
    }

    pub fn builder() -> crate::ServerBuilder {
        crate::ServerBuilder::new()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle::from_shared(&self.shared)
    }

    pub fn config(&self) -> Result<ServerConfig> {
        self.shared.with_core(|core| core.config.clone())
    }

    pub fn is_open(&self) -> bool {
        self.shared.has(OPEN)
    }

    pub fn is_running(&self) -> bool {
        self.shared.has(RUNNING)
    }

    pub fn is_quitting(&self) -> bool {
        self.shared.has(QUIT)
    }

    /// The bound address while open. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr()
    }

    pub fn open(&self) -> Result<()> {
        self.shared.open()
    }

    pub fn start(&self) -> Result<()> {
        self.shared.start()
    }

    /// Wakes the worker out of its readiness wait.
    pub fn interrupt(&self) -> Result<()> {
        self.shared.interrupt()
    }

    pub fn stop(&self) -> Result<()> {
        self.shared.request_stop()
    }

    pub fn wait(&self) -> Result<()> {
        self.shared.wait()
    }

    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }

    pub fn free(self) -> Result<()> {
        self.shared.free()
    }

    pub fn set_hook(&self, hook: Hook) -> Result<()> {
        self.shared.with_core(|core| core.hooks.set(hook))
    }

    pub fn clear_hook(&self, kind: HookKind) -> Result<bool> {
        self.shared.with_core(|core| core.hooks.clear(kind))
    }

    /// Writes `data` to every connection. Returns how many accepted it.
    pub fn broadcast(&self, data: &[u8]) -> Result<usize> {
        self.shared.broadcast(data)
    }

    pub fn broadcast_str(&self, text: &str) -> Result<usize> {
        self.shared.broadcast(text.as_bytes())
    }

    pub fn write(&self, id: ConnectionId, data: &[u8]) -> Result<usize> {
        self.shared.with_connection(id, |conn| conn.write(data))
    }

    pub fn write_str(&self, id: ConnectionId, text: &str) -> Result<usize> {
        self.write(id, text.as_bytes())
    }

    pub fn close_connection(&self, id: ConnectionId) -> Result<bool> {
        self.shared.with_connection(id, |conn| conn.close())
    }

    pub fn with_connection<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Connection) -> R) -> Result<R> {
        self.shared.with_connection(id, f)
    }

    pub fn connection_ids(&self) -> Result<Vec<ConnectionId>> {
        self.shared.connection_ids()
    }

    pub fn connection_count(&self) -> Result<usize> {
        self.shared.connection_count()
    }

    pub fn attach<T: Any + Send>(&self, name: &str, value: T) -> Result<()> {
        self.shared.with_core(|core| core.attachments.attach(name, value))?
    }

    pub fn attach_with<T, D>(&self, name: &str, value: T, destructor: D) -> Result<()>
    where
        T: Any + Send,
        D: FnOnce(T) + Send + 'static,
    {
        self.shared
            .with_core(|core| core.attachments.attach_with(name, value, destructor))?
    }

    pub fn detach(&self, name: &str) -> Result<()> {
        self.shared.with_core(|core| core.attachments.detach(name))?
    }

    /// Runs `f` on the server attachment `name` if it exists with type `T`.
    pub fn with_attachment<T: Any, R>(&self, name: &str, f: impl FnOnce(&mut T) -> R) -> Result<Option<R>> {
        self.shared
            .with_core(|core| core.attachments.find_mut::<T>(name).map(f))
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.shared.has(FREED) {
            return;
        }
        if let Err(e) = self.shared.free() {
            tracing::error!("Server: release on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("open", &self.is_open())
            .field("running", &self.is_running())
            .field("quitting", &self.is_quitting())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// A cloneable, non-owning reference to a [`Server`] for other threads.
///
/// Every call fails with [`EngineError::ServerGone`] once the server has
/// been dropped.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Weak<Shared>,
}

impl ServerHandle {
    pub(crate) fn from_shared(shared: &Arc<Shared>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
        }
    }

    fn upgrade(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(EngineError::ServerGone)
    }

    pub fn is_running(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| shared.has(RUNNING))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.upgrade().and_then(|shared| shared.local_addr())
    }

    pub fn interrupt(&self) -> Result<()> {
        self.upgrade()?.interrupt()
    }

    pub fn stop(&self) -> Result<()> {
        self.upgrade()?.request_stop()
    }

    pub fn broadcast(&self, data: &[u8]) -> Result<usize> {
        self.upgrade()?.broadcast(data)
    }

    pub fn broadcast_str(&self, text: &str) -> Result<usize> {
        self.broadcast(text.as_bytes())
    }

    pub fn write(&self, id: ConnectionId, data: &[u8]) -> Result<usize> {
        self.upgrade()?.with_connection(id, |conn| conn.write(data))
    }

    pub fn write_str(&self, id: ConnectionId, text: &str) -> Result<usize> {
        self.write(id, text.as_bytes())
    }

    pub fn close_connection(&self, id: ConnectionId) -> Result<bool> {
        self.upgrade()?.with_connection(id, |conn| conn.close())
    }

    pub fn with_connection<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Connection) -> R) -> Result<R> {
        self.upgrade()?.with_connection(id, f)
    }

    pub fn connection_ids(&self) -> Result<Vec<ConnectionId>> {
        self.upgrade()?.connection_ids()
    }

    pub fn connection_count(&self) -> Result<usize> {
        self.upgrade()?.connection_count()
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}
