use crate::sync::irq::IrqControl;

const PRIMASK_PM_BIT: u32 = 1;

/// Interrupt control for ARMv6-M/ARMv7-M cores.
///
/// Masks configurable-priority interrupts through PRIMASK.
///
/// # State Management
/// The `State` type is `bool`: whether interrupts were enabled before
/// [`IrqControl::disable`] ran. Nested critical sections therefore only
/// re-enable interrupts when the outermost guard drops.
///
/// # Assembly Details
///
/// - `mrs {0}, PRIMASK`: read the current mask
/// - `cpsid i`: set PRIMASK
/// - `cpsie i`: clear PRIMASK
pub struct CortexMIrq;

impl IrqControl for CortexMIrq {
    type State = bool;

    #[inline(always)]
    fn disable() -> bool {
        let primask: u32;
        // SAFETY: reading and setting PRIMASK has no memory-safety effect. The
        // asm keeps its implicit memory clobber so accesses cannot be hoisted
        // out of the critical section.
        unsafe {
            core::arch::asm!(
                "mrs {0}, PRIMASK",
                "cpsid i",
                out(reg) primask,
                options(nostack, preserves_flags)
            );
        }
        primask & PRIMASK_PM_BIT == 0
    }

    #[inline(always)]
    fn restore(prev_enabled: bool) {
        if prev_enabled {
            // SAFETY: see `disable`.
            unsafe {
                core::arch::asm!("cpsie i", options(nostack, preserves_flags));
            }
        }
    }
}
