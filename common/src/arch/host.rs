use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::irq::IrqControl;

static MASK_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Interrupt control for hosted builds.
///
/// There are no real interrupts to mask off target. The implementation
/// keeps a nesting depth so simulations and tests can still observe that a
/// critical section is active.
pub struct HostIrq;

impl HostIrq {
    /// Whether any critical section is currently open.
    pub fn is_masked() -> bool {
        MASK_DEPTH.load(Ordering::Acquire) > 0
    }
}

impl IrqControl for HostIrq {
    type State = ();

    #[inline]
    fn disable() -> Self::State {
        MASK_DEPTH.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    fn restore(_: Self::State) {
        MASK_DEPTH.fetch_sub(1, Ordering::AcqRel);
    }
}
