//! USB PHY driver object.
//!
//! Powers the transceiver and exposes the hardware binding so a USB stack
//! can install its own handler for the controller interrupt.

use common::sync::IrqMutex;
use log::{debug, warn};

use crate::driver::{EventDispatcher, Mailbox};
use crate::error::{DriverError, DriverResult};
use crate::hal::PeripheralDriver;
use crate::hal::usb_phy::{UsbPhyBackend, UsbPhyConfig, UsbPhyEvent, UsbPhyStatus};
use crate::registry::{DeviceRegistry, HardwareBinding, PeripheralId, USB_COUNT, UsbId};

struct UsbPhyState {
    binding: Option<&'static HardwareBinding>,
    dispatcher: EventDispatcher<UsbPhyEvent>,
    status: UsbPhyStatus,
}

impl UsbPhyState {
    const fn new() -> Self {
        Self {
            binding: None,
            dispatcher: EventDispatcher::none(),
            status: UsbPhyStatus::empty(),
        }
    }
}

pub struct UsbPhyDriver<B: UsbPhyBackend> {
    registry: &'static DeviceRegistry<USB_COUNT>,
    backends: [B; USB_COUNT],
    slots: [IrqMutex<UsbPhyState>; USB_COUNT],
    mailboxes: [Mailbox<UsbPhyEvent>; USB_COUNT],
}

impl<B: UsbPhyBackend> UsbPhyDriver<B> {
    pub const fn new(registry: &'static DeviceRegistry<USB_COUNT>, backends: [B; USB_COUNT]) -> Self {
        Self {
            registry,
            backends,
            slots: [const { IrqMutex::new(UsbPhyState::new()) }; USB_COUNT],
            mailboxes: [const { Mailbox::new() }; USB_COUNT],
        }
    }

    pub fn backend(&self, id: UsbId) -> &B {
        &self.backends[id.index()]
    }

    /// Binding of an initialized instance, for the USB stack.
    pub fn binding(&self, id: UsbId) -> Option<&'static HardwareBinding> {
        self.slots[id.index()].with(|state| state.binding)
    }

    pub fn dispatch_pending(&self, id: UsbId) -> bool {
        let dispatcher = self.slots[id.index()].with(|state| state.dispatcher);
        dispatcher.drain(&self.mailboxes[id.index()])
    }
}

impl<B: UsbPhyBackend> PeripheralDriver for UsbPhyDriver<B> {
    type Id = UsbId;
    type Config = UsbPhyConfig;
    type Status = UsbPhyStatus;
    type Errors = ();

    fn init(&self, id: UsbId, config: &UsbPhyConfig) -> DriverResult {
        if self.binding(id).is_some() {
            self.deinit(id)?;
        }

        let binding = self.registry.lookup(id);
        if let Err(err) = self.backends[id.index()].bring_up(binding, config) {
            warn!("{}: bring-up rejected: {}", binding.name, err);
            return Err(DriverError::Fail);
        }

        let dispatcher = EventDispatcher::new(config.event_callback, config.dispatch);
        self.slots[id.index()].with(|state| {
            state.binding = Some(binding);
            state.dispatcher = dispatcher;
            state.status = UsbPhyStatus::INITIALIZED;
        });
        debug!("{}: PHY up, {:?} {:?}", binding.name, config.mode, config.speed);

        dispatcher.dispatch(UsbPhyEvent::INITIALIZED, &self.mailboxes[id.index()]);
        Ok(())
    }

    fn deinit(&self, id: UsbId) -> DriverResult {
        let backend = &self.backends[id.index()];
        if let Some(binding) = self.binding(id) {
            backend.set_running(false);
            backend.tear_down(binding);
            debug!("{}: PHY down", binding.name);
        }
        self.slots[id.index()].with(|state| *state = UsbPhyState::new());
        self.mailboxes[id.index()].take();
        Ok(())
    }

    fn start(&self, id: UsbId) {
        if self.binding(id).is_none() {
            warn!("{:?}: not initialized", id);
            return;
        }
        self.backends[id.index()].set_running(true);
        self.slots[id.index()].with(|state| state.status.insert(UsbPhyStatus::STARTED));
    }

    fn stop(&self, id: UsbId) {
        if self.binding(id).is_none() {
            return;
        }
        self.backends[id.index()].set_running(false);
        self.slots[id.index()].with(|state| state.status.remove(UsbPhyStatus::STARTED));
    }

    fn get_status(&self, id: UsbId) -> UsbPhyStatus {
        self.slots[id.index()].with(|state| state.status)
    }

    fn get_error(&self, _id: UsbId) {}
}
