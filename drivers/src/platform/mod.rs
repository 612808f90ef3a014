//! Platform Abstraction Layer
//!
//! A platform supplies the process-wide services every driver object needs:
//! the interrupt vector controller, NVIC line control, the number of the
//! interrupt being serviced and a millisecond clock for blocking timeouts.
//!
//! # Usage
//!
//! ```rust
//! use periph_drivers::platform::{CurrentPlatform, Platform};
//!
//! CurrentPlatform::enable_irq(37);
//! let start = CurrentPlatform::now_ms();
//! ```

use crate::hal::interrupt::{IrqNumber, Priority};
use crate::irq::{VectorBase, VectorController};

/// Platform trait - implemented by each supported platform
pub trait Platform: 'static {
    /// Access to the hardware vector table base register.
    type VectorBase: VectorBase + 'static;

    /// Platform name for debugging
    fn name() -> &'static str;

    /// The process-wide vector controller.
    fn vectors() -> &'static VectorController<Self::VectorBase>;

    /// Enable (unmask) an IRQ line
    fn enable_irq(irq: IrqNumber);

    /// Disable (mask) an IRQ line
    fn disable_irq(irq: IrqNumber);

    fn clear_pending_irq(irq: IrqNumber);

    fn set_irq_priority(irq: IrqNumber, priority: Priority);

    /// The interrupt currently being serviced, `None` in thread mode.
    fn active_irq() -> Option<IrqNumber>;

    /// Free-running millisecond counter.
    fn now_ms() -> u32;

    /// Called on every iteration of a blocking wait.
    fn relax() {
        core::hint::spin_loop();
    }
}

#[cfg(feature = "sim")]
pub mod sim;

// Platform selection based on Cargo features
cfg_if::cfg_if! {
    if #[cfg(all(feature = "cortex-m", target_arch = "arm"))] {
        pub mod cortex_m;
        pub use cortex_m::CortexM as CurrentPlatform;
    } else if #[cfg(feature = "sim")] {
        pub use sim::SimPlatform as CurrentPlatform;
    } else {
        compile_error!(
            "No platform selected!\n\
            Use: cargo build --features sim\n\
            Or:  cargo build --no-default-features --features cortex-m --target thumbv7em-none-eabihf"
        );
    }
}
