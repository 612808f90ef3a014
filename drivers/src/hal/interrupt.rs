//! Interrupt Controller Hardware Abstraction Layer.
//!
//! Line masking, pending state and priorities of a nested vectored interrupt
//! controller. Which handler runs for a line is the vector controller's job
//! (see [`crate::irq`]), not this trait's.

/// Interrupt number.
///
/// Device lines count up from zero. Core exceptions are negative, with
/// SysTick at `-1`, following the usual Cortex-M numbering.
pub type IrqNumber = i16;

/// Interrupt priority level.
///
/// Lower values preempt higher values.
pub type Priority = u8;

/// Interrupt controller trait.
pub trait InterruptController {
    /// Error type for interrupt controller operations.
    type Error: core::fmt::Debug;

    /// Enable (unmask) an interrupt line.
    fn enable(&self, irq: IrqNumber) -> Result<(), Self::Error>;

    /// Disable (mask) an interrupt line.
    fn disable(&self, irq: IrqNumber) -> Result<(), Self::Error>;

    /// Whether the line is currently enabled.
    fn is_enabled(&self, irq: IrqNumber) -> Result<bool, Self::Error>;

    /// Check if an interrupt is currently pending.
    fn is_pending(&self, irq: IrqNumber) -> Result<bool, Self::Error>;

    /// Mark an interrupt pending in software.
    fn set_pending(&self, irq: IrqNumber) -> Result<(), Self::Error>;

    /// Clear a pending interrupt.
    fn clear_pending(&self, irq: IrqNumber) -> Result<(), Self::Error>;

    /// Get the lowest-numbered pending line, if any.
    fn next_pending(&self) -> Option<IrqNumber>;
}

/// Extension trait for interrupt controllers with priority support.
pub trait PriorityInterruptController: InterruptController {
    /// Set the priority of an interrupt line.
    fn set_priority(&self, irq: IrqNumber, priority: Priority) -> Result<(), Self::Error>;

    /// Get the priority of an interrupt line.
    fn get_priority(&self, irq: IrqNumber) -> Result<Priority, Self::Error>;

    /// Split priority bits into preemption and sub-priority fields.
    ///
    /// `group` is the number of bits (0..=4) given to sub-priority.
    fn set_priority_grouping(&self, group: u8) -> Result<(), Self::Error>;

    fn priority_grouping(&self) -> u8;
}

/// Errors reported by interrupt controllers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterruptError {
    /// The line does not exist on this controller.
    #[error("interrupt {0} is not a device line")]
    InvalidLine(IrqNumber),
    /// Priority grouping outside 0..=4.
    #[error("invalid priority grouping {0}")]
    InvalidGrouping(u8),
}
