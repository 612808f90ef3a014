use core::fmt::Debug;

/// Architecture-specific interrupt masking interface.
///
/// Implemented once per CPU family in [`crate::arch`].
pub trait IrqControl {
    /// Saved interrupt state, handed back to [`IrqControl::restore`].
    type State: Copy + Debug;

    /// Mask interrupts and return the previous state.
    fn disable() -> Self::State;

    /// Restore the masking state captured by a matching [`IrqControl::disable`].
    fn restore(state: Self::State);
}
