use crate::connection::{Connection, ConnectionId};
use crate::hooks::{HookContext, HookTable};
use crate::server::{Shared, IN_LOOP, QUIT};
use corral_core::{Attachments, ServerConfig};
use corral_dsa::Slab;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub(crate) const LISTENER: Token = Token(usize::MAX - 1);
pub(crate) const WAKER: Token = Token(usize::MAX);

/// A connection together with its socket and readiness bookkeeping.
pub(crate) struct Peer {
    pub(crate) stream: TcpStream,
    pub(crate) conn: Connection,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) failed: bool,
    /// The peer closed its side; destroyed at the end of this iteration.
    pub(crate) hung_up: bool,
}

impl Peer {
    fn new(stream: TcpStream, conn: Connection) -> Self {
        // Edge-triggered: assume writable until the socket says otherwise.
        Self {
            stream,
            conn,
            readable: false,
            writable: true,
            failed: false,
            hung_up: false,
        }
    }
}

/// Everything the server lock protects.
pub(crate) struct Core {
    pub(crate) config: ServerConfig,
    pub(crate) listener: Option<TcpListener>,
    pub(crate) poll: Option<Poll>,
    pub(crate) registry: Option<Registry>,
    pub(crate) peers: Slab<Peer>,
    pub(crate) hooks: HookTable,
    pub(crate) attachments: Attachments,
    /// The worker opened the server itself and closes it on exit.
    pub(crate) auto_close: bool,
}

impl Core {
    pub(crate) fn new(config: ServerConfig, hooks: HookTable) -> Self {
        Self {
            config,
            listener: None,
            poll: None,
            registry: None,
            peers: Slab::new(),
            hooks,
            attachments: Attachments::new(corral_core::Owner::Server),
            auto_close: false,
        }
    }

    fn context<'a>(
        &'a mut self,
        shared: &'a Arc<Shared>,
        id: ConnectionId,
        conn: &'a mut Connection,
    ) -> HookContext<'a> {
        HookContext {
            id,
            conn,
            peers: &mut self.peers,
            hooks: &mut self.hooks,
            attachments: &mut self.attachments,
            shared,
        }
    }

    fn restore(&mut self, id: ConnectionId, peer: Peer) {
        if self.peers.restore(id, peer).is_err() {
            tracing::error!("Core: connection {} lost its slot during a hook", id);
        }
    }

    /// Folds one batch of readiness events into the peers. Returns whether
    /// the listener is ready.
    fn mark_ready(&mut self, events: &Events) -> bool {
        let mut accept = false;
        for event in events.iter() {
            match event.token() {
                LISTENER => accept = true,
                WAKER => {}
                Token(index) => {
                    let Some(id) = self.peers.id_at(index) else {
                        continue;
                    };
                    let Some(peer) = self.peers.get_mut(id) else {
                        continue;
                    };
                    if event.is_readable() || event.is_read_closed() {
                        peer.readable = true;
                    }
                    if event.is_writable() {
                        peer.writable = true;
                    }
                    if event.is_error() {
                        peer.failed = true;
                    }
                }
            }
        }
        accept
    }

    /// Accepts until the backlog is empty.
    fn accept(&mut self, shared: &Arc<Shared>) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, addr)) => self.admit(shared, stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("Core: accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn admit(&mut self, shared: &Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("Core: TCP_NODELAY failed for {}: {}", addr, e);
            }
        }

        let seed = self.config.buffer_seed;
        let id = self
            .peers
            .insert_with(|id| Peer::new(stream, Connection::new(id, addr, seed)));

        let registered = match (self.registry.as_ref(), self.peers.get_mut(id)) {
            (Some(registry), Some(peer)) => registry.register(
                &mut peer.stream,
                Token(id.index()),
                Interest::READABLE | Interest::WRITABLE,
            ),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "server is closed")),
        };
        if let Err(e) = registered {
            tracing::error!("Core: unable to watch {} ({}): {}", id, addr, e);
            self.peers.remove(id);
            return;
        }
        tracing::debug!("Core: accepted {} from {}", id, addr);

        let Some(join) = self.hooks.join() else {
            return;
        };
        let Some(mut peer) = self.peers.take(id) else {
            return;
        };
        let admitted = {
            let mut ctx = self.context(shared, id, &mut peer.conn);
            join(&mut ctx)
        };
        if admitted {
            self.restore(id, peer);
            return;
        }

        tracing::debug!("Core: join hook rejected {} ({})", id, addr);
        if let Some(registry) = self.registry.as_ref() {
            let _ = registry.deregister(&mut peer.stream);
        }
        self.peers.vacate(id);
    }

    /// Drains the socket into the input buffer and runs the data-ready hook.
    /// A peer that closed its side gets that last dispatch, one staging and
    /// flush pass, and is then destroyed by the reaper.
    fn receive(&mut self, shared: &Arc<Shared>, id: ConnectionId, scratch: &mut [u8]) {
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        if peer.failed || !peer.readable {
            return;
        }
        peer.readable = false;

        let mut received = 0;
        let mut eof = false;
        loop {
            match peer.conn.fd_read(&mut peer.stream, scratch) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => received += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Core: read from {} failed: {}", id, e);
                    peer.failed = true;
                    return;
                }
            }
        }

        if received > 0 {
            self.dispatch(shared, id);
        }
        if eof {
            if let Some(peer) = self.peers.get_mut(id) {
                tracing::debug!("Core: {} closed its side", id);
                peer.conn.close();
                peer.hung_up = true;
            }
        }
    }

    fn dispatch(&mut self, shared: &Arc<Shared>, id: ConnectionId) {
        let Some(hook) = self.hooks.data_ready() else {
            return;
        };
        let Some(mut peer) = self.peers.take(id) else {
            return;
        };
        peer.conn.dispatch_input(|conn, window| {
            let mut ctx = self.context(shared, id, conn);
            hook(&mut ctx, window);
        });
        self.restore(id, peer);
    }

    /// Starts a new output batch if one is due, running the pre-write hook.
    fn stage(&mut self, shared: &Arc<Shared>, id: ConnectionId) {
        match self.peers.get_mut(id) {
            Some(peer) if peer.conn.needs_staging() => {}
            _ => return,
        }

        let Some(hook) = self.hooks.pre_write() else {
            if let Some(peer) = self.peers.get_mut(id) {
                peer.conn.stage_output();
            }
            return;
        };
        let Some(mut peer) = self.peers.take(id) else {
            return;
        };
        peer.conn.stage_output_with(|conn, payload| {
            let mut ctx = self.context(shared, id, conn);
            hook(&mut ctx, payload);
        });
        self.restore(id, peer);
    }

    fn flush(&mut self, id: ConnectionId) {
        let Some(peer) = self.peers.get_mut(id) else {
            return;
        };
        if peer.failed || !peer.writable || !peer.conn.is_writing() {
            return;
        }
        match peer.conn.flush_to(&mut peer.stream) {
            Ok(flush) => {
                if flush.blocked {
                    peer.writable = false;
                }
            }
            Err(e) => {
                tracing::debug!("Core: write to {} failed: {}", id, e);
                peer.failed = true;
            }
        }
    }

    fn reap(&mut self, shared: &Arc<Shared>, id: ConnectionId) {
        let doomed = match self.peers.get(id) {
            Some(peer) => peer.failed || peer.hung_up || peer.conn.is_finished(),
            None => false,
        };
        if doomed {
            self.destroy(shared, id);
        }
    }

    /// Runs the leave hook, releases attachments, makes a last attempt at
    /// flushing and drops the socket.
    pub(crate) fn destroy(&mut self, shared: &Arc<Shared>, id: ConnectionId) -> bool {
        let Some(mut peer) = self.peers.take(id) else {
            return false;
        };

        if let Some(leave) = self.hooks.leave() {
            let mut ctx = self.context(shared, id, &mut peer.conn);
            leave(&mut ctx);
        }
        peer.conn.attachments_mut().clear();

        if !peer.failed {
            peer.conn.stage_output();
            if let Err(e) = peer.conn.flush_to(&mut peer.stream) {
                tracing::debug!("Core: final flush to {} failed: {}", id, e);
            }
        }
        if let Some(registry) = self.registry.as_ref() {
            let _ = registry.deregister(&mut peer.stream);
        }
        self.peers.vacate(id);
        tracing::debug!("Core: destroyed {} ({})", id, peer.conn.address());
        true
    }

    /// Output that arrived after this iteration's staging pass.
    fn has_late_output(&self) -> bool {
        self.peers.iter().any(|(_, peer)| {
            !peer.failed && (peer.conn.needs_staging() || (peer.writable && peer.conn.is_writing()))
        })
    }
}

pub(crate) enum Flow {
    Continue,
    Stop,
}

/// The worker side of a running server: owns the poll instance for as long
/// as the worker runs and drives one readiness iteration at a time.
pub(crate) struct Dispatcher {
    poll: Poll,
    events: Events,
    scratch: Vec<u8>,
    timeout: Option<Duration>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(poll: Poll, shared: Arc<Shared>, config: &ServerConfig, can_wake: bool) -> Self {
        let timeout = if can_wake {
            None
        } else {
            Some(Duration::from_millis(config.idle_poll_ms))
        };
        Self {
            poll,
            events: Events::with_capacity(config.events_capacity),
            scratch: vec![0u8; config.read_chunk],
            timeout,
            shared,
        }
    }

    /// Worker thread entry point.
    pub(crate) fn run(self) {
        let shared = Arc::clone(&self.shared);
        shared.enter_worker(thread::current().id());
        tracing::info!("Dispatcher: readiness loop started");
        let poll = self.run_loop();
        shared.finish(poll);
    }

    fn run_loop(mut self) -> Poll {
        while !self.shared.has(QUIT) {
            if let Flow::Stop = self.turn() {
                break;
            }
        }
        self.poll
    }

    /// One loop iteration: wait, then under the server lock accept, read,
    /// stage and flush, and reap.
    pub(crate) fn turn(&mut self) -> Flow {
        match self.poll.poll(&mut self.events, self.timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Flow::Continue,
            Err(e) => {
                tracing::error!("Dispatcher: readiness wait failed: {}", e);
                self.shared.set(QUIT);
                return Flow::Stop;
            }
        }

        let guard = self.shared.core.acquire();
        let mut core = match guard.borrow_mut() {
            Ok(core) => core,
            Err(e) => {
                tracing::error!("Dispatcher: {}", e);
                self.shared.set(QUIT);
                return Flow::Stop;
            }
        };
        self.shared.set(IN_LOOP);

        if core.mark_ready(&self.events) {
            core.accept(&self.shared);
        }

        let ids = core.peers.ids();
        for &id in &ids {
            core.receive(&self.shared, id, &mut self.scratch);
        }
        for &id in &ids {
            core.stage(&self.shared, id);
            core.flush(id);
        }
        for &id in &ids {
            core.reap(&self.shared, id);
        }

        let late = core.has_late_output();
        self.shared.unset(IN_LOOP);
        drop(core);
        drop(guard);

        if late {
            let _ = self.shared.interrupt();
        }
        if self.shared.has(QUIT) {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
