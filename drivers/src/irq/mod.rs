//! Interrupt plumbing shared by every driver object.
//!
//! - [`vector`]: the run-time vector table
//! - [`install`] / [`uninstall`]: bind a driver's entry point to every line
//!   of a hardware binding and configure those lines on the controller

pub mod vector;

pub use vector::{
    TABLE_ALIGN, Vector, VectorBase, VectorController, VectorTable, default_handler,
    spurious_count,
};

use crate::platform::Platform;
use crate::registry::HardwareBinding;

/// Route every interrupt line of `binding` to `handler` and enable them.
pub fn install<P: Platform>(binding: &HardwareBinding, handler: Vector) {
    let vectors = P::vectors();
    for (_, line) in binding.irq_lines() {
        vectors.register(line.number, handler);
        P::set_irq_priority(line.number, line.priority);
        P::clear_pending_irq(line.number);
        P::enable_irq(line.number);
    }
}

/// Disable every interrupt line of `binding` and restore default handlers.
pub fn uninstall<P: Platform>(binding: &HardwareBinding) {
    let vectors = P::vectors();
    for (_, line) in binding.irq_lines() {
        P::disable_irq(line.number);
        vectors.unregister(line.number);
    }
}
