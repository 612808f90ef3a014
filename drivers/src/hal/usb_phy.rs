//! USB PHY Hardware Abstraction Layer.
//!
//! The PHY driver only powers and routes the transceiver. Class stacks sit
//! above it and install their own interrupt handler for the binding's line.

use bitflags::bitflags;

use crate::driver::{DispatchMode, EventCallback};
use crate::error::BackendError;
use crate::registry::HardwareBinding;

#[derive(Debug, Copy, Clone)]
pub struct UsbPhyConfig {
    pub mode: UsbMode,
    pub phy: PhyKind,
    pub speed: UsbSpeed,
    pub event_callback: Option<EventCallback<UsbPhyEvent>>,
    pub dispatch: DispatchMode,
}

impl UsbPhyConfig {
    pub const fn device() -> Self {
        Self {
            mode: UsbMode::Device,
            phy: PhyKind::Internal,
            speed: UsbSpeed::Full,
            event_callback: None,
            dispatch: DispatchMode::Immediate,
        }
    }

    pub const fn with_mode(mut self, mode: UsbMode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn with_callback(mut self, callback: EventCallback<UsbPhyEvent>) -> Self {
        self.event_callback = Some(callback);
        self
    }

    pub const fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }
}

impl Default for UsbPhyConfig {
    fn default() -> Self {
        Self::device()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsbMode {
    Device,
    Host,
    Otg,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PhyKind {
    Internal,
    External,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsbSpeed {
    Low,
    Full,
    High,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct UsbPhyStatus: u32 {
        const INITIALIZED = 1 << 0;
        const STARTED = 1 << 1;
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct UsbPhyEvent: u32 {
        const INITIALIZED = 1 << 0;
    }
}

pub trait UsbPhyBackend: Sync {
    /// Power the PHY, route its pins and select device or host role.
    fn bring_up(&self, binding: &HardwareBinding, config: &UsbPhyConfig) -> Result<(), BackendError>;

    fn tear_down(&self, binding: &HardwareBinding);

    /// Connect (`true`) or disconnect the core from the bus.
    fn set_running(&self, running: bool);
}
