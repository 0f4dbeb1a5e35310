//! Contract to the machine instance.
//!
//! The interpreter, the virtio transports and the device models live outside
//! this crate; the driver only touches them through the narrow surface
//! below. A host constructs its machine from a loaded
//! [`BootConfig`](crate::boot::BootConfig), attaching
//! [`BlockStorage`](crate::storage::BlockStorage) backends and a console
//! device of its choosing, then hands the result to a
//! [`Session`](crate::scheduler::Session).

use std::time::Duration;

use crate::console::CharDevice;

/// The machine instance as seen by the scheduler.
pub trait Machine {
    /// Whether the guest console transport can accept input right now.
    fn console_can_write(&self) -> bool;

    /// How many input bytes the transport will currently accept.
    fn console_write_len(&self) -> usize;

    /// Deliver host input bytes to the guest console device.
    fn console_write_data(&mut self, bytes: &[u8]);

    /// Announce a terminal geometry change to the guest console device.
    fn console_resize_event(&mut self, cols: u16, rows: u16);

    /// Run at most `max_cycles` guest cycles. Guest console output is
    /// streamed through `console` as it is produced.
    fn interpret(&mut self, console: &mut dyn CharDevice, max_cycles: u32);

    /// Time until the next timed guest event, capped at `cap`. Zero means
    /// work is pending now.
    fn time_until_next_event(&mut self, cap: Duration) -> Duration;
}

/// Known machine classes. Each entry is a comma-separated alias list; a
/// descriptor's `machine` field must match one alias exactly.
const MACHINE_CLASSES: &[&str] = &["riscv32", "riscv64", "pc"];

pub fn is_known_machine(name: &str) -> bool {
    MACHINE_CLASSES
        .iter()
        .any(|aliases| aliases.split(',').any(|alias| alias == name))
}
