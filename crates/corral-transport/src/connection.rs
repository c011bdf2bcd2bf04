use crate::hooks::ReadWindow;
use corral_core::{Attachments, Owner};
use corral_dsa::{ByteBuffer, SlotId};
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Stable identifier of a connection within its server.
pub type ConnectionId = SlotId;

/// Status flags of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    /// A batch is staged and draining; the pre-write hook will not fire again
    /// until its ceiling reaches zero.
    pub writing: bool,
    /// Output is buffered and waiting to be flushed.
    pub wrote: bool,
    /// Closing gracefully; destroyed once the output buffer drains.
    pub closing: bool,
    /// Advisory, set by layered protocols.
    pub keep_open: bool,
    /// Advisory, set by layered protocols.
    pub timed_out: bool,
}

/// Result of one [`Connection::flush_to`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flush {
    pub written: usize,
    /// The sink reported `WouldBlock` before the ceiling was reached.
    pub blocked: bool,
}

/// One accepted client: buffers, flags and attachments.
///
/// The socket itself stays with the dispatcher; everything here is plain
/// state so hooks can work on it directly.
///
/// ## Staged output
/// `write` appends to the output buffer and flags it. Before flushing, the
/// dispatcher stages the buffer: the pre-write hook sees the whole pending
/// payload once, then the *ceiling* records how many bytes belong to the
/// batch. Flushes never go past the ceiling. Bytes appended while a batch
/// drains wait for the next batch and its own pre-write call.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    address: String,
    status: Status,
    input: ByteBuffer,
    // Absolute input offset already shown to the data-ready hook.
    seen: usize,
    output: ByteBuffer,
    ceiling: usize,
    attachments: Attachments,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, buffer_seed: usize) -> Self {
        Self {
            id,
            peer,
            address: peer.ip().to_string(),
            status: Status::default(),
            input: ByteBuffer::with_seed(buffer_seed),
            seen: 0,
            output: ByteBuffer::with_seed(buffer_seed),
            ceiling: 0,
            attachments: Attachments::new(Owner::Connection(id)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Peer IP address as text.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_closing(&self) -> bool {
        self.status.closing
    }

    pub fn is_writing(&self) -> bool {
        self.status.writing
    }

    pub fn has_pending_output(&self) -> bool {
        self.status.wrote
    }

    pub fn keep_open(&self) -> bool {
        self.status.keep_open
    }

    pub fn set_keep_open(&mut self, keep_open: bool) {
        self.status.keep_open = keep_open;
    }

    pub fn is_timed_out(&self) -> bool {
        self.status.timed_out
    }

    pub fn set_timed_out(&mut self, timed_out: bool) {
        self.status.timed_out = timed_out;
    }

    pub fn input(&self) -> &ByteBuffer {
        &self.input
    }

    pub fn output(&self) -> &ByteBuffer {
        &self.output
    }

    /// Bytes the current batch may still flush.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut Attachments {
        &mut self.attachments
    }

    /// Marks the connection for graceful close. Returns false if it was
    /// already closing.
    pub fn close(&mut self) -> bool {
        if self.status.closing {
            return false;
        }
        self.status.closing = true;
        true
    }

    /// Queues `data` for output. Returns the bytes queued: 0 for empty input
    /// or once the connection is closing.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() || self.status.closing {
            return 0;
        }
        let n = self.output.append(data);
        self.status.wrote = true;
        n
    }

    pub fn write_str(&mut self, text: &str) -> usize {
        self.write(text.as_bytes())
    }

    /// Flags buffered output as awaiting a flush.
    pub fn wrote(&mut self) -> bool {
        self.status.wrote = !self.output.is_empty();
        self.status.wrote
    }

    /// Copies unread input into `buf`, consuming it.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        self.input.read(buf)
    }

    pub fn unread_input(&self) -> &[u8] {
        self.input.unread()
    }

    /// One bounded read from `src` into `scratch`, appended to the input
    /// buffer. `Ok(0)` means the peer closed.
    pub fn fd_read<R: Read>(&mut self, src: &mut R, scratch: &mut [u8]) -> io::Result<usize> {
        let n = src.read(scratch)?;
        if n > 0 {
            self.input.append(&scratch[..n]);
        }
        Ok(n)
    }

    /// Offers unread input to `on_window` until it stops consuming or the
    /// buffer is empty. Returns the total consumed.
    ///
    /// While `on_window` runs the input buffer is lent to the window, so
    /// reads through the connection itself see nothing.
    pub fn dispatch_input<F>(&mut self, mut on_window: F) -> usize
    where
        F: FnMut(&mut Connection, &mut ReadWindow<'_>),
    {
        let mut total = 0;
        while !self.input.is_empty() {
            let seed = self.input.seed();
            let mut input = std::mem::replace(&mut self.input, ByteBuffer::with_seed(seed));
            let fresh_from = self.seen.saturating_sub(input.position());
            let used = {
                let mut window = ReadWindow::new(input.unread(), fresh_from);
                on_window(self, &mut window);
                window.used()
            };
            input.consume(used);
            self.seen = input.len();
            self.input = input;

            if used == 0 {
                break;
            }
            total += used;
        }
        total
    }

    /// True when output is flagged and no batch is currently draining.
    pub fn needs_staging(&self) -> bool {
        self.status.wrote && !self.status.writing
    }

    /// Stages pending output as a new batch without a pre-write call.
    pub fn stage_output(&mut self) -> Option<usize> {
        if !self.needs_staging() {
            return None;
        }
        Some(self.begin_batch())
    }

    /// Stages pending output as a new batch, calling `pre_write` once with
    /// the full pending payload. Anything `pre_write` writes joins this
    /// batch. Returns the batch ceiling, or `None` if nothing was staged.
    pub fn stage_output_with<F>(&mut self, pre_write: F) -> Option<usize>
    where
        F: FnOnce(&mut Connection, &[u8]),
    {
        if !self.needs_staging() {
            return None;
        }

        let seed = self.output.seed();
        let staged = std::mem::replace(&mut self.output, ByteBuffer::with_seed(seed));
        pre_write(self, staged.unread());
        let injected = std::mem::replace(&mut self.output, staged);
        if !injected.is_empty() {
            self.output.append(injected.unread());
        }

        Some(self.begin_batch())
    }

    fn begin_batch(&mut self) -> usize {
        self.status.writing = true;
        self.ceiling = self.output.unread_len();
        self.ceiling
    }

    /// Writes the staged batch to `sink`, never past the ceiling.
    ///
    /// Stops early on `WouldBlock`. A sink accepting zero bytes is an error.
    pub fn flush_to<W: Write>(&mut self, sink: &mut W) -> io::Result<Flush> {
        let mut written = 0;
        let mut blocked = false;

        while self.status.writing && self.ceiling > 0 {
            let pending = self.output.unread();
            let limit = self.ceiling.min(pending.len());
            if limit == 0 {
                self.ceiling = 0;
                break;
            }
            match sink.write(&pending[..limit]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("connection {} accepted no bytes", self.id),
                    ));
                }
                Ok(n) => {
                    self.output.consume(n);
                    self.ceiling -= n;
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    blocked = true;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if self.ceiling == 0 {
            self.status.writing = false;
        }
        if self.output.is_empty() {
            self.status.wrote = false;
        }
        Ok(Flush { written, blocked })
    }

    /// Closing and fully flushed.
    pub fn is_finished(&self) -> bool {
        self.status.closing && self.output.is_empty()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("status", &self.status)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("ceiling", &self.ceiling)
            .finish()
    }
}
