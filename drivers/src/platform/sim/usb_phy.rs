//! Simulated USB PHY.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::BackendError;
use crate::hal::usb_phy::{UsbPhyBackend, UsbPhyConfig};
use crate::registry::HardwareBinding;

pub struct SimUsbPhy {
    powered: AtomicBool,
    running: AtomicBool,
    fail_bring_up: AtomicBool,
    bring_ups: AtomicUsize,
}

impl SimUsbPhy {
    pub const fn new() -> Self {
        Self {
            powered: AtomicBool::new(false),
            running: AtomicBool::new(false),
            fail_bring_up: AtomicBool::new(false),
            bring_ups: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_bring_up(&self) {
        self.fail_bring_up.store(true, Ordering::Release);
    }

    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn bring_up_count(&self) -> usize {
        self.bring_ups.load(Ordering::Acquire)
    }
}

impl Default for SimUsbPhy {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbPhyBackend for SimUsbPhy {
    fn bring_up(&self, _binding: &HardwareBinding, _config: &UsbPhyConfig) -> Result<(), BackendError> {
        self.bring_ups.fetch_add(1, Ordering::AcqRel);
        if self.fail_bring_up.swap(false, Ordering::AcqRel) {
            return Err(BackendError::Hardware);
        }
        self.powered.store(true, Ordering::Release);
        Ok(())
    }

    fn tear_down(&self, _binding: &HardwareBinding) {
        self.running.store(false, Ordering::Release);
        self.powered.store(false, Ordering::Release);
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }
}
