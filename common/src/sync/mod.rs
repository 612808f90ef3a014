//! Locking primitives for a single core that is preempted by interrupts.
//!
//! [`IrqSpinLock`] is the lock to use for anything an interrupt handler
//! touches: it masks interrupts before spinning, so the owner can never be
//! preempted by a handler that wants the same lock. [`SpinLock`] is the plain
//! variant for state that only task context reaches.

pub mod irq;
pub mod irq_spinlock;
pub mod spinlock;

pub use irq::IrqControl;
pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};

/// [`IrqSpinLock`] bound to the interrupt masking of the current CPU.
pub type IrqMutex<T> = IrqSpinLock<T, crate::arch::CpuIrq>;
