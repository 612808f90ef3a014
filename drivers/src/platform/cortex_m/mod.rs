//! Cortex-M Platform
//!
//! ARMv7-M cores: NVIC line control, a relocatable vector table behind VTOR
//! and a SysTick millisecond clock.

mod nvic;
mod scb;

pub use nvic::{Nvic, PRIORITY_BITS};
pub use scb::Vtor;

use core::sync::atomic::{AtomicU32, Ordering};

use log::warn;

use super::Platform;
use crate::hal::interrupt::{
    InterruptController, IrqNumber, Priority, PriorityInterruptController,
};
use crate::irq::VectorController;

/// SysTick exception number.
pub const SYSTICK_IRQ: IrqNumber = -1;

// ============================================================================
// Internal Platform State (not exposed)
// ============================================================================

static VECTORS: VectorController<Vtor> = VectorController::new(Vtor);

static NVIC: Nvic = Nvic;

static TICKS: AtomicU32 = AtomicU32::new(0);

extern "C" fn systick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

pub struct CortexM;

impl CortexM {
    /// Start the millisecond clock from a processor clock of `core_hz`.
    ///
    /// Installs the SysTick handler, which relocates the vector table if
    /// nothing did yet.
    pub fn init_tick(core_hz: u32) {
        VECTORS.register(SYSTICK_IRQ, systick);
        Self::set_irq_priority(SYSTICK_IRQ, (1 << PRIORITY_BITS) - 1);
        scb::start_systick(core_hz);
    }

    pub fn nvic() -> &'static Nvic {
        &NVIC
    }
}

impl Platform for CortexM {
    type VectorBase = Vtor;

    fn name() -> &'static str {
        "Cortex-M (ARMv7-M)"
    }

    fn vectors() -> &'static VectorController<Vtor> {
        &VECTORS
    }

    fn enable_irq(irq: IrqNumber) {
        // Core exceptions cannot be masked individually.
        if irq < 0 {
            return;
        }
        if let Err(err) = NVIC.enable(irq) {
            warn!("nvic: {}", err);
        }
    }

    fn disable_irq(irq: IrqNumber) {
        if irq < 0 {
            return;
        }
        if let Err(err) = NVIC.disable(irq) {
            warn!("nvic: {}", err);
        }
    }

    fn clear_pending_irq(irq: IrqNumber) {
        if irq >= 0 {
            NVIC.clear_pending(irq).ok();
        }
    }

    fn set_irq_priority(irq: IrqNumber, priority: Priority) {
        if let Err(err) = NVIC.set_priority(irq, priority) {
            warn!("nvic: {}", err);
        }
    }

    fn active_irq() -> Option<IrqNumber> {
        scb::active_irq()
    }

    fn now_ms() -> u32 {
        TICKS.load(Ordering::Relaxed)
    }
}
