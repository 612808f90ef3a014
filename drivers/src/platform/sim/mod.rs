//! Simulated Platform
//!
//! A host-side stand-in for a Cortex-M core: a RAM boot vector table behind
//! a vector base register, an NVIC made of atomics, a millisecond counter
//! that only moves when told to, and register-level peripheral backends with
//! hooks for injecting bus activity and faults.
//!
//! Interrupts are raised explicitly with [`SimCore::raise`], which runs the
//! handler from whichever vector table is active, exactly as the hardware
//! would pick it.
//!
//! # Usage
//!
//! ```ignore
//! sim_platform! {
//!     /// Platform private to this test binary.
//!     pub struct TestPlatform;
//! }
//!
//! TestPlatform::raise(board::USART1_IRQ);
//! ```

pub mod board;
mod i2c;
mod spi;
mod usart;
mod usb_phy;

pub use i2c::SimI2c;
pub use spi::SimSpi;
pub use usart::{DmaRequest, SimUsart};
pub use usb_phy::SimUsbPhy;

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicUsize, Ordering};

use log::warn;

use crate::config::DEVICE_VECTORS;
use crate::hal::interrupt::{
    InterruptController, InterruptError, IrqNumber, Priority, PriorityInterruptController,
};
use crate::irq::{VectorBase, VectorController, VectorTable, default_handler};

/// Priority bits implemented by the simulated NVIC.
pub const PRIORITY_BITS: u8 = 4;

// ============================================================================
// Vector Base Register
// ============================================================================

/// Vector base register over a RAM boot table.
pub struct SimVectorBase {
    boot: UnsafeCell<VectorTable>,
    /// Address written by software; zero selects the boot table.
    active: AtomicUsize,
    writes: AtomicUsize,
}

// SAFETY: the boot table is only written through `VectorController::set_vector`,
// whose contract makes the caller responsible for exclusive access.
unsafe impl Sync for SimVectorBase {}

impl SimVectorBase {
    pub const fn new() -> Self {
        Self {
            boot: UnsafeCell::new(VectorTable::filled(default_handler)),
            active: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Address of the link-time table.
    pub fn boot_table(&self) -> usize {
        self.boot.get() as usize
    }

    /// Times software rewrote the register.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }
}

impl Default for SimVectorBase {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl VectorBase for SimVectorBase {
    fn read(&self) -> usize {
        match self.active.load(Ordering::Acquire) {
            0 => self.boot_table(),
            address => address,
        }
    }

    unsafe fn write(&self, address: usize) {
        self.writes.fetch_add(1, Ordering::AcqRel);
        self.active.store(address, Ordering::Release);
    }
}

// ============================================================================
// NVIC
// ============================================================================

/// Device-line half of an NVIC.
pub struct SimNvic {
    enabled: [AtomicBool; DEVICE_VECTORS],
    pending: [AtomicBool; DEVICE_VECTORS],
    priority: [AtomicU8; DEVICE_VECTORS],
    grouping: AtomicU8,
}

impl SimNvic {
    pub const fn new() -> Self {
        Self {
            enabled: [const { AtomicBool::new(false) }; DEVICE_VECTORS],
            pending: [const { AtomicBool::new(false) }; DEVICE_VECTORS],
            priority: [const { AtomicU8::new(0) }; DEVICE_VECTORS],
            grouping: AtomicU8::new(0),
        }
    }

    fn line(irq: IrqNumber) -> Result<usize, InterruptError> {
        usize::try_from(irq)
            .ok()
            .filter(|&line| line < DEVICE_VECTORS)
            .ok_or(InterruptError::InvalidLine(irq))
    }
}

impl Default for SimNvic {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for SimNvic {
    type Error = InterruptError;

    fn enable(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        self.enabled[Self::line(irq)?].store(true, Ordering::Release);
        Ok(())
    }

    fn disable(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        self.enabled[Self::line(irq)?].store(false, Ordering::Release);
        Ok(())
    }

    fn is_enabled(&self, irq: IrqNumber) -> Result<bool, Self::Error> {
        Ok(self.enabled[Self::line(irq)?].load(Ordering::Acquire))
    }

    fn is_pending(&self, irq: IrqNumber) -> Result<bool, Self::Error> {
        Ok(self.pending[Self::line(irq)?].load(Ordering::Acquire))
    }

    fn set_pending(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        self.pending[Self::line(irq)?].store(true, Ordering::Release);
        Ok(())
    }

    fn clear_pending(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        self.pending[Self::line(irq)?].store(false, Ordering::Release);
        Ok(())
    }

    fn next_pending(&self) -> Option<IrqNumber> {
        self.pending
            .iter()
            .position(|pending| pending.load(Ordering::Acquire))
            .map(|line| line as IrqNumber)
    }
}

impl PriorityInterruptController for SimNvic {
    fn set_priority(&self, irq: IrqNumber, priority: Priority) -> Result<(), Self::Error> {
        let shift = 8 - PRIORITY_BITS;
        self.priority[Self::line(irq)?].store(priority << shift, Ordering::Release);
        Ok(())
    }

    fn get_priority(&self, irq: IrqNumber) -> Result<Priority, Self::Error> {
        let shift = 8 - PRIORITY_BITS;
        Ok(self.priority[Self::line(irq)?].load(Ordering::Acquire) >> shift)
    }

    fn set_priority_grouping(&self, group: u8) -> Result<(), Self::Error> {
        if group > PRIORITY_BITS {
            return Err(InterruptError::InvalidGrouping(group));
        }
        self.grouping.store(group, Ordering::Release);
        Ok(())
    }

    fn priority_grouping(&self) -> u8 {
        self.grouping.load(Ordering::Acquire)
    }
}

// ============================================================================
// Core
// ============================================================================

const THREAD_MODE: i32 = i32::MIN;

/// Everything a platform provides, in one `static`.
pub struct SimCore {
    vectors: VectorController<SimVectorBase>,
    nvic: SimNvic,
    ticks: AtomicU32,
    active: AtomicI32,
}

impl SimCore {
    pub const fn new() -> Self {
        Self {
            vectors: VectorController::new(SimVectorBase::new()),
            nvic: SimNvic::new(),
            ticks: AtomicU32::new(0),
            active: AtomicI32::new(THREAD_MODE),
        }
    }

    pub fn vectors(&self) -> &VectorController<SimVectorBase> {
        &self.vectors
    }

    pub fn nvic(&self) -> &SimNvic {
        &self.nvic
    }

    pub fn now_ms(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn advance(&self, ms: u32) {
        self.ticks.fetch_add(ms, Ordering::AcqRel);
    }

    pub fn active_irq(&self) -> Option<IrqNumber> {
        match self.active.load(Ordering::Acquire) {
            THREAD_MODE => None,
            irq => Some(irq as IrqNumber),
        }
    }

    /// Signal `irq`. A masked device line is only marked pending; otherwise
    /// the handler in the active vector table runs before this returns.
    ///
    /// Returns whether a handler ran.
    pub fn raise(&self, irq: IrqNumber) -> bool {
        if irq >= 0 && !self.nvic.is_enabled(irq).unwrap_or(false) {
            self.nvic.set_pending(irq).ok();
            return false;
        }
        self.nvic.clear_pending(irq).ok();
        let preempted = self.active.swap(i32::from(irq), Ordering::AcqRel);
        self.vectors.dispatch(irq);
        self.active.store(preempted, Ordering::Release);
        true
    }

    pub fn enable_irq(&self, irq: IrqNumber) {
        if irq < 0 {
            return;
        }
        if let Err(err) = self.nvic.enable(irq) {
            warn!("sim: {}", err);
        }
    }

    pub fn disable_irq(&self, irq: IrqNumber) {
        if irq < 0 {
            return;
        }
        if let Err(err) = self.nvic.disable(irq) {
            warn!("sim: {}", err);
        }
    }

    pub fn clear_pending_irq(&self, irq: IrqNumber) {
        if irq >= 0 {
            self.nvic.clear_pending(irq).ok();
        }
    }

    pub fn set_irq_priority(&self, irq: IrqNumber, priority: Priority) {
        if irq < 0 {
            return;
        }
        if let Err(err) = self.nvic.set_priority(irq, priority) {
            warn!("sim: {}", err);
        }
    }
}

impl Default for SimCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Declare a simulated platform type with its own [`SimCore`].
///
/// Every test binary declares its own platform, so cores never leak state
/// between binaries.
#[macro_export]
macro_rules! sim_platform {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        $vis struct $name;

        impl $name {
            /// The simulated core behind this platform.
            pub fn core() -> &'static $crate::platform::sim::SimCore {
                static CORE: $crate::platform::sim::SimCore = $crate::platform::sim::SimCore::new();
                &CORE
            }

            /// Signal `irq`; returns whether a handler ran.
            pub fn raise(irq: $crate::hal::interrupt::IrqNumber) -> bool {
                Self::core().raise(irq)
            }
        }

        impl $crate::platform::Platform for $name {
            type VectorBase = $crate::platform::sim::SimVectorBase;

            fn name() -> &'static str {
                stringify!($name)
            }

            fn vectors() -> &'static $crate::irq::VectorController<Self::VectorBase> {
                Self::core().vectors()
            }

            fn enable_irq(irq: $crate::hal::interrupt::IrqNumber) {
                Self::core().enable_irq(irq)
            }

            fn disable_irq(irq: $crate::hal::interrupt::IrqNumber) {
                Self::core().disable_irq(irq)
            }

            fn clear_pending_irq(irq: $crate::hal::interrupt::IrqNumber) {
                Self::core().clear_pending_irq(irq)
            }

            fn set_irq_priority(
                irq: $crate::hal::interrupt::IrqNumber,
                priority: $crate::hal::interrupt::Priority,
            ) {
                Self::core().set_irq_priority(irq, priority)
            }

            fn active_irq() -> Option<$crate::hal::interrupt::IrqNumber> {
                Self::core().active_irq()
            }

            fn now_ms() -> u32 {
                Self::core().now_ms()
            }

            fn relax() {
                Self::core().advance(1);
            }
        }
    };
}

sim_platform! {
    /// The default simulated platform.
    pub struct SimPlatform;
}

/// Fixed-capacity record of frames seen by a simulated backend.
#[derive(Copy, Clone)]
pub struct SimLog<const N: usize> {
    frames: [u16; N],
    len: usize,
}

impl<const N: usize> SimLog<N> {
    pub const fn new() -> Self {
        Self {
            frames: [0; N],
            len: 0,
        }
    }

    /// Record `frame`; frames beyond capacity are dropped.
    pub fn push(&mut self, frame: u16) {
        if self.len < N {
            self.frames[self.len] = frame;
            self.len += 1;
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn frames(&self) -> &[u16] {
        &self.frames[..self.len]
    }

    /// Frames truncated to bytes.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.frames().iter().map(|&frame| frame as u8)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for SimLog<N> {
    fn default() -> Self {
        Self::new()
    }
}
