//! Console byte bridge between the host and the guest character device.
//!
//! Host keystrokes are queued one byte at a time into a fixed-capacity ring
//! ([`ConsoleRing`]) and drained into the guest by the scheduler in small
//! chunks. Guest output takes the opposite path and is streamed to the host
//! sink as it is produced; nothing is buffered on the way out.
//!
//! ```text
//! host input ──► ConsoleRing ──(scheduler drain)──► guest console device
//! guest output ──────────────(CharDevice::write_bytes)──► host sink
//! ```

use std::io::{self, Write};

/// Capacity of the host-input ring, in bytes.
pub const RING_CAPACITY: usize = 1024;

/// Fixed-capacity circular byte buffer for host→guest console input.
///
/// Wraparound arithmetic is internal; callers never compute offsets. When
/// the ring is full, newly enqueued bytes are dropped; earlier input is
/// never overwritten.
pub struct ConsoleRing {
    buf: [u8; RING_CAPACITY],
    windex: usize,
    rindex: usize,
    count: usize,
}

impl ConsoleRing {
    pub fn new() -> Self {
        Self {
            buf: [0; RING_CAPACITY],
            windex: 0,
            rindex: 0,
            count: 0,
        }
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Enqueue one byte. Returns `false` (byte dropped) when the ring is
    /// full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.count == RING_CAPACITY {
            return false;
        }
        self.buf[self.windex] = byte;
        self.windex += 1;
        if self.windex == RING_CAPACITY {
            self.windex = 0;
        }
        self.count += 1;
        true
    }

    /// Enqueue every byte of `bytes`, dropping whatever does not fit.
    pub fn push_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if !self.push(b) {
                break;
            }
        }
    }

    /// Dequeue up to `out.len()` bytes into `out`, returning the number
    /// copied. Copies in at most two runs around the wrap point.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let mut remaining = out.len().min(self.count);
        self.count -= remaining;
        let mut copied = 0;
        while remaining != 0 {
            let run = remaining.min(RING_CAPACITY - self.rindex);
            out[copied..copied + run].copy_from_slice(&self.buf[self.rindex..self.rindex + run]);
            remaining -= run;
            copied += run;
            self.rindex += run;
            if self.rindex == RING_CAPACITY {
                self.rindex = 0;
            }
        }
        copied
    }
}

impl Default for ConsoleRing {
    fn default() -> Self {
        Self::new()
    }
}

/// The capability surface a guest character device needs from the host side
/// of the console bridge.
pub trait CharDevice {
    /// Drain pending host input into `buf`, returning the bytes copied.
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize;

    /// Deliver guest output to the host.
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
}

/// Concrete console bridge: input ring on one side, an unbuffered host sink
/// on the other.
pub struct HostConsole<W: Write> {
    input: ConsoleRing,
    output: W,
}

impl<W: Write> HostConsole<W> {
    pub fn new(output: W) -> Self {
        Self {
            input: ConsoleRing::new(),
            output,
        }
    }

    /// Host input entry point. Returns `false` when the byte was dropped
    /// because the ring is full.
    pub fn queue_byte(&mut self, byte: u8) -> bool {
        self.input.push(byte)
    }

    /// Queue a whole byte sequence, dropping whatever does not fit.
    pub fn queue_bytes(&mut self, bytes: &[u8]) {
        self.input.push_all(bytes);
    }

    /// Bytes queued and not yet delivered to the guest.
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }
}

impl<W: Write> CharDevice for HostConsole<W> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        self.input.drain_into(buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.output.write_all(buf)?;
        self.output.flush()
    }
}
