//! Cooperative execution scheduler.
//!
//! A [`Session`] drives the machine in bounded bursts so it can be embedded
//! in an event loop the host owns. One [`Session::run_slice`] call drains
//! console input into the guest, runs interpreter bursts until either the
//! machine reports a pending timed wait or the per-entry cycle budget is
//! spent, and then tells the host when to call again:
//!
//! ```text
//! loop {
//!     match session.run_slice() {
//!         SliceOutcome::Continue  => /* re-enter with no delay */,
//!         SliceOutcome::Sleep(d)  => /* re-enter after d */,
//!     }
//! }
//! ```
//!
//! Everything is single-threaded and non-preemptive: the session is only
//! touched between slices, never concurrently with one, so no locking is
//! needed anywhere in this module.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use crate::console::{CharDevice, HostConsole};
use crate::machine::Machine;

/// Guest cycles executed per interpreter burst.
pub const CYCLES_PER_BURST: u32 = 200_000;

/// Total cycle budget for one scheduler entry.
pub const TOTAL_CYCLE_BUDGET: u32 = 3_000_000;

/// Bursts allowed per entry before a forced yield.
pub const BURST_CEILING: u32 = TOTAL_CYCLE_BUDGET / CYCLES_PER_BURST;

/// Longest wait the machine may report for its next timed event.
pub const MAX_EVENT_WAIT: Duration = Duration::from_millis(10);

/// Most console-input bytes delivered to the guest per entry.
pub const CONSOLE_CHUNK: usize = 128;

/// Geometry announced by the one-shot resize event.
pub const CONSOLE_COLS: u16 = 80;
pub const CONSOLE_ROWS: u16 = 24;

/// Queued as guest input the first time the machine reports an idle wait,
/// exactly once per session. ENQ: an observer on the guest side answers it
/// to confirm the boot has settled.
pub const IDLE_SIGNAL: &[u8] = b"\x05";

/// What the host must do before the next [`Session::run_slice`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// More work is ready; re-enter with no delay.
    Continue,
    /// Nothing to do until a timed event; re-enter after the wait.
    Sleep(Duration),
}

/// One VM run: the machine handle, its console bridge, and the session-scoped
/// one-shot flags.
pub struct Session<M: Machine, W: Write> {
    machine: M,
    console: HostConsole<W>,
    resize_pending: bool,
    idle_signal_sent: bool,
}

impl<M: Machine, W: Write> Session<M, W> {
    /// Create a session over a constructed machine. The initial resize event
    /// is armed here and delivered on the first slice that finds the console
    /// transport writable.
    pub fn new(machine: M, output: W) -> Self {
        Self {
            machine,
            console: HostConsole::new(output),
            resize_pending: true,
            idle_signal_sent: false,
        }
    }

    /// Host input entry point. Returns `false` when the byte was dropped
    /// because the input ring is full.
    pub fn queue_input_byte(&mut self, byte: u8) -> bool {
        self.console.queue_byte(byte)
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn console(&self) -> &HostConsole<W> {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut HostConsole<W> {
        &mut self.console
    }

    /// Run one scheduler entry.
    pub fn run_slice(&mut self) -> SliceOutcome {
        if self.machine.console_can_write() {
            let mut buf = [0u8; CONSOLE_CHUNK];
            let want = self.machine.console_write_len().min(CONSOLE_CHUNK);
            let got = self.console.read_bytes(&mut buf[..want]);
            if got > 0 {
                self.machine.console_write_data(&buf[..got]);
            }
            if self.resize_pending {
                self.machine.console_resize_event(CONSOLE_COLS, CONSOLE_ROWS);
                self.resize_pending = false;
            }
        }

        // Burst until the machine wants a timed wait or the entry budget is
        // spent. The budget keeps one re-entry from monopolising the host's
        // scheduling slice; the wait branch keeps an idle guest from spinning.
        let mut bursts = 0u32;
        let delay = loop {
            let delay = self.machine.time_until_next_event(MAX_EVENT_WAIT);
            if !delay.is_zero() || bursts >= BURST_CEILING {
                break delay;
            }
            self.machine.interpret(&mut self.console, CYCLES_PER_BURST);
            bursts += 1;
        };

        if delay.is_zero() {
            SliceOutcome::Continue
        } else {
            if !self.idle_signal_sent {
                self.idle_signal_sent = true;
                self.console.queue_bytes(IDLE_SIGNAL);
                debug!(bytes = IDLE_SIGNAL.len(), "queued one-shot idle signal");
            }
            SliceOutcome::Sleep(delay)
        }
    }

    /// Drive the session forever on a tokio host: zero-delay re-entries
    /// yield to the executor, idle waits sleep. Stop by dropping the future.
    pub async fn drive(&mut self) {
        loop {
            match self.run_slice() {
                SliceOutcome::Continue => tokio::task::yield_now().await,
                SliceOutcome::Sleep(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}
