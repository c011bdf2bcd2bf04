use alloc::vec::Vec;
use core::fmt;

/// Initial capacity of a buffer's first allocation.
pub const DEFAULT_SEED: usize = 256;

/// A growable byte buffer with a consume cursor.
///
/// Three indices describe the contents:
/// - `capacity`: bytes of backing storage.
/// - `len`: logical end of the buffered data.
/// - `pos`: first byte not yet consumed (input) or flushed (output).
///
/// Storage doubles from the seed size until it can hold `len + n + 1`,
/// keeping one zero byte after the data so the unread window can be
/// treated as text. Once the cursor catches up with `len`, both indices
/// reset to zero and the next append starts at the front again.
#[derive(Clone)]
pub struct ByteBuffer {
    storage: Vec<u8>,
    len: usize,
    pos: usize,
    seed: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Creates an empty buffer whose first allocation is `seed` bytes.
    /// Nothing is allocated until the first append.
    pub fn with_seed(seed: usize) -> Self {
        Self {
            storage: Vec::new(),
            len: 0,
            pos: 0,
            seed: seed.max(1),
        }
    }

    pub fn seed(&self) -> usize {
        self.seed
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Logical length, including bytes already consumed.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Position of the consume cursor.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn unread_len(&self) -> usize {
        self.len - self.pos
    }

    /// True when every appended byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos == self.len
    }

    /// The bytes between the cursor and the logical end.
    pub fn unread(&self) -> &[u8] {
        &self.storage[self.pos..self.len]
    }

    /// The unread bytes followed by the zero terminator.
    pub fn unread_with_nul(&self) -> &[u8] {
        if self.storage.is_empty() {
            return &[];
        }
        &self.storage[self.pos..=self.len]
    }

    /// Appends `data`, growing the storage as needed. Returns the number of
    /// bytes appended (0 for an empty slice).
    pub fn append(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let needed = self.len + data.len() + 1;
        let mut capacity = if self.storage.is_empty() {
            self.seed
        } else {
            self.storage.len()
        };
        while capacity < needed {
            capacity *= 2;
        }
        if capacity != self.storage.len() {
            self.storage.resize(capacity, 0);
        }

        self.storage[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        self.storage[self.len] = 0;
        data.len()
    }

    /// Advances the cursor by up to `n` bytes and returns how far it moved.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.unread_len());
        self.pos += n;
        if self.pos >= self.len {
            self.reset();
        }
        n
    }

    /// Copies up to `out.len()` unread bytes into `out` and consumes them.
    /// Returns 0 when there is nothing to read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.unread_len());
        if n == 0 {
            return 0;
        }
        out[..n].copy_from_slice(&self.storage[self.pos..self.pos + n]);
        self.consume(n)
    }

    /// Drops all buffered bytes but keeps the allocation.
    pub fn clear(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.len = 0;
        self.pos = 0;
        if let Some(first) = self.storage.first_mut() {
            *first = 0;
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}
