//! Bounded negotiation buffer for STARTTLS handshakes.
//!
//! Each handshake attempt accumulates peer bytes into a fixed-capacity buffer
//! with a fill cursor. The buffer is scoped to one attempt and dropped when
//! the attempt resolves, so negotiation memory stays bounded no matter how a
//! peer behaves.

/// Capacity of the upstream feature-scan buffer.
pub const NEGOTIATION_BUFFER_CAPACITY: usize = 10 * 1024;

/// Capacity of the downstream buffer that waits for the client's STARTTLS
/// request. The request element is tiny; 1 KiB leaves ample room.
pub const DOWNSTREAM_BUFFER_CAPACITY: usize = 1024;

/// Remaining-capacity margin below which a scan fails closed instead of
/// reading further.
pub const NEGOTIATION_FILL_MARGIN: usize = 64;

/// Fixed-capacity byte buffer with a fill cursor.
///
/// Invariants: the fill cursor never exceeds capacity, and scanning only ever
/// sees bytes below the cursor.
#[derive(Debug)]
pub struct NegotiationBuffer {
    buf: Vec<u8>,
    pos: usize,
    margin: usize,
}

impl NegotiationBuffer {
    /// Creates a buffer sized for the upstream feature scan.
    pub fn new() -> Self {
        Self::with_capacity(NEGOTIATION_BUFFER_CAPACITY, NEGOTIATION_FILL_MARGIN)
    }

    /// Creates a buffer with an explicit capacity and near-full margin, so
    /// tests can exercise the capacity boundary with small buffers.
    pub fn with_capacity(capacity: usize, margin: usize) -> Self {
        assert!(
            margin < capacity,
            "margin ({}) must be smaller than capacity ({})",
            margin,
            capacity
        );
        Self {
            buf: vec![0u8; capacity],
            pos: 0,
            margin,
        }
    }

    /// Returns the bytes filled so far.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// Returns the writable remainder of the buffer.
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    /// Advances the fill cursor after `n` bytes were read into
    /// [`unfilled_mut`](Self::unfilled_mut).
    pub fn advance(&mut self, n: usize) {
        assert!(
            self.pos + n <= self.buf.len(),
            "fill cursor would exceed capacity"
        );
        self.pos += n;
    }

    /// True once fewer than the margin's worth of capacity remains.
    pub fn is_nearly_full(&self) -> bool {
        self.buf.len() - self.pos < self.margin
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes filled so far.
    pub fn len(&self) -> usize {
        self.pos
    }

    /// True if no bytes have been filled yet.
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }
}

impl Default for NegotiationBuffer {
    fn default() -> Self {
        Self::new()
    }
}
