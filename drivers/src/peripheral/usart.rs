//! USART driver object.
//!
//! One [`UsartDriver`] serves every USART instance of a board. Each instance
//! owns a slot holding its configuration, status, sticky errors and the
//! transmit and receive descriptors. Task context and the interrupt handler
//! both mutate the slot, always inside its interrupt-masking lock; events are
//! delivered after the lock is released.
//!
//! Transmit and receive are independent directions with their own busy flag,
//! so a `send` and a `receive` can be in flight at the same time.
//!
//! # Usage
//!
//! ```ignore
//! declare_driver! {
//!     static USART: UsartDriver<SimPlatform, SimUsart> =
//!         (&board::USARTS, [SimUsart::new(), SimUsart::new(), SimUsart::new()]);
//! }
//!
//! USART.init(UsartId::Usart1, &UsartConfig::new_8n1(115_200).with_callback(on_event))?;
//! USART.start(UsartId::Usart1);
//! USART.send(UsartId::Usart1, b"Hello")?;
//! ```

use core::marker::PhantomData;

use common::sync::IrqMutex;
use log::{debug, trace, warn};

use crate::driver::{
    EventDispatcher, FrameFormat, Mailbox, Received, RxTransfer, TxTransfer, wait_for,
};
use crate::error::{DriverError, DriverResult};
use crate::hal::dma::{Direction, DmaEvents};
use crate::hal::usart::{
    UsartBackend, UsartConfig, UsartErrors, UsartEvent, UsartFlags, UsartStatus,
};
use crate::hal::{AsyncTransfer, BlockingTransfer, PeripheralDriver};
use crate::irq::{self, Vector};
use crate::platform::Platform;
use crate::registry::{
    DeviceRegistry, HardwareBinding, IrqSource, PeripheralId, USART_COUNT, UsartId,
};

/// Interrupt sources owned by in-flight transfers.
const TRANSFER_SOURCES: UsartFlags = UsartFlags::TX_EMPTY
    .union(UsartFlags::TX_COMPLETE)
    .union(UsartFlags::RX_NOT_EMPTY)
    .union(UsartFlags::IDLE);

struct UsartState {
    binding: Option<&'static HardwareBinding>,
    dispatcher: EventDispatcher<UsartEvent>,
    format: FrameFormat,
    status: UsartStatus,
    errors: UsartErrors,
    /// Last transmission; kept after completion so progress stays readable.
    tx: Option<TxTransfer>,
    tx_dma: bool,
    /// Reception in flight.
    rx: Option<RxTransfer>,
    rx_dma: bool,
    rx_circular: bool,
    /// Progress of the last finished reception.
    rx_last: (usize, usize),
    received: Option<Received>,
}

impl UsartState {
    const fn new() -> Self {
        Self {
            binding: None,
            dispatcher: EventDispatcher::none(),
            format: FrameFormat::BYTE,
            status: UsartStatus::empty(),
            errors: UsartErrors::empty(),
            tx: None,
            tx_dma: false,
            rx: None,
            rx_dma: false,
            rx_circular: false,
            rx_last: (0, 0),
            received: None,
        }
    }

    /// End the reception in flight and park its buffer for the caller.
    fn finish_rx(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.rx_last = rx.progress();
            self.received = Some(rx.finish());
        }
        self.rx_dma = false;
        self.rx_circular = false;
        self.status.remove(UsartStatus::RX_BUSY);
    }

    /// Abort both directions without raising events. Sticky errors survive.
    fn abort(&mut self, backend: &impl UsartBackend) {
        backend.disable_sources(TRANSFER_SOURCES);
        if self.tx_dma {
            backend.stop_dma(Direction::Tx);
            self.tx_dma = false;
        }
        if self.rx_dma {
            backend.stop_dma(Direction::Rx);
        }
        self.finish_rx();
        self.status.remove(UsartStatus::TX_BUSY);
    }
}

struct UsartSlot {
    state: IrqMutex<UsartState>,
    mailbox: Mailbox<UsartEvent>,
}

impl UsartSlot {
    const fn new() -> Self {
        Self {
            state: IrqMutex::new(UsartState::new()),
            mailbox: Mailbox::new(),
        }
    }
}

/// Driver object for every USART instance of a board.
///
/// Create it with [`crate::declare_driver!`] so the interrupt entry point is
/// generated alongside the `static`.
pub struct UsartDriver<P: Platform, B: UsartBackend> {
    registry: &'static DeviceRegistry<USART_COUNT>,
    backends: [B; USART_COUNT],
    slots: [UsartSlot; USART_COUNT],
    entry: Vector,
    _platform: PhantomData<fn() -> P>,
}

impl<P: Platform, B: UsartBackend> UsartDriver<P, B> {
    pub const fn new(
        registry: &'static DeviceRegistry<USART_COUNT>,
        backends: [B; USART_COUNT],
        entry: Vector,
    ) -> Self {
        Self {
            registry,
            backends,
            slots: [const { UsartSlot::new() }; USART_COUNT],
            entry,
            _platform: PhantomData,
        }
    }

    pub fn backend(&self, id: UsartId) -> &B {
        &self.backends[id.index()]
    }

    /// Hardware binding of an initialized instance.
    fn binding(&self, id: UsartId) -> DriverResult<&'static HardwareBinding> {
        match self.slots[id.index()].state.with(|state| state.binding) {
            Some(binding) => Ok(binding),
            None => {
                warn!("{:?}: not initialized", id);
                Err(DriverError::Fail)
            }
        }
    }

    fn format(&self, id: UsartId) -> FrameFormat {
        self.slots[id.index()].state.with(|state| state.format)
    }

    /// Deliver events parked by [`crate::driver::DispatchMode::Deferred`].
    ///
    /// Returns whether the callback ran.
    pub fn dispatch_pending(&self, id: UsartId) -> bool {
        let slot = &self.slots[id.index()];
        let dispatcher = slot.state.with(|state| state.dispatcher);
        dispatcher.drain(&slot.mailbox)
    }

    /// Frames moved and frames requested by the current or last transfer in
    /// `direction`.
    pub fn progress(&self, id: UsartId, direction: Direction) -> (usize, usize) {
        self.slots[id.index()].state.with(|state| match direction {
            Direction::Tx => state.tx.map(|tx| tx.progress()).unwrap_or((0, 0)),
            Direction::Rx => state
                .rx
                .as_ref()
                .map(|rx| rx.progress())
                .unwrap_or(state.rx_last),
        })
    }

    /// Look at the bytes received so far by the reception in flight.
    ///
    /// `f` runs with the instance locked and interrupts masked; it must not
    /// log or block.
    pub fn inspect_rx<R>(&self, id: UsartId, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.slots[id.index()]
            .state
            .with(|state| state.rx.as_ref().map(|rx| f(rx.data())))
    }

    /// Interrupt entry for every line of every instance.
    pub fn on_interrupt(&self) {
        let Some(irq) = P::active_irq() else {
            return;
        };
        let Some((index, source)) = self.registry.route(irq) else {
            trace!("usart: stray interrupt {}", irq);
            return;
        };
        let slot = &self.slots[index];
        let backend = &self.backends[index];

        let (dispatcher, events) = slot.state.with(|state| {
            if state.binding.is_none() {
                return (state.dispatcher, UsartEvent::empty());
            }
            let events = match source {
                IrqSource::Peripheral | IrqSource::Error => Self::service(backend, state),
                IrqSource::DmaTx => Self::service_dma_tx(backend, state),
                IrqSource::DmaRx => Self::service_dma_rx(backend, state),
            };
            (state.dispatcher, events)
        });

        if !events.is_empty() {
            trace!("usart{}: irq {} {:?}", index + 1, irq, events);
        }
        dispatcher.dispatch(events, &slot.mailbox);
    }

    fn service(backend: &B, state: &mut UsartState) -> UsartEvent {
        let flags = backend.flags();
        let sources = backend.sources();
        let mut events = UsartEvent::empty();

        let faults = flags & UsartFlags::FAULTS;
        if !faults.is_empty() {
            backend.clear_flags(faults);
            let (errors, fault_events) = faults.faults();
            state.errors |= errors;
            events |= fault_events;
            if state.rx.is_some() {
                backend.disable_sources(UsartFlags::RX_NOT_EMPTY | UsartFlags::IDLE);
                if state.rx_dma {
                    backend.stop_dma(Direction::Rx);
                }
                state.finish_rx();
                events |= UsartEvent::RECEIVE_COMPLETE | UsartEvent::RECEIVE_INCOMPLETE;
            }
        }

        if flags.contains(UsartFlags::RX_NOT_EMPTY) && sources.contains(UsartFlags::RX_NOT_EMPTY)
        {
            let frame = backend.read_frame();
            let stored = match state.rx.as_mut() {
                Some(rx) if !state.rx_dma => Some(rx.store(frame)),
                _ => None,
            };
            match stored {
                Some(true) => {
                    backend.disable_sources(UsartFlags::IDLE);
                    state.finish_rx();
                    events |= UsartEvent::RECEIVE_COMPLETE;
                }
                Some(false) => {}
                None => {
                    // Nobody asked for this frame.
                    backend.disable_sources(UsartFlags::RX_NOT_EMPTY);
                    state.errors |= UsartErrors::RX_OVERFLOW;
                    events |= UsartEvent::RX_OVERFLOW;
                }
            }
        }

        if flags.contains(UsartFlags::IDLE) && sources.contains(UsartFlags::IDLE) {
            backend.clear_flags(UsartFlags::IDLE);
            if !flags.contains(UsartFlags::RX_NOT_EMPTY) {
                events |= UsartEvent::RX_TIMEOUT;
            }
        }

        if flags.contains(UsartFlags::TX_EMPTY) && sources.contains(UsartFlags::TX_EMPTY) {
            match state.tx.as_mut() {
                Some(tx) if !state.tx_dma => {
                    if let Some(frame) = tx.next_frame() {
                        backend.write_frame(frame);
                    }
                    if tx.is_done() {
                        backend.disable_sources(UsartFlags::TX_EMPTY);
                        backend.enable_sources(UsartFlags::TX_COMPLETE);
                        state.status.remove(UsartStatus::TX_BUSY);
                        events |= UsartEvent::SEND_COMPLETE;
                    }
                }
                _ => backend.disable_sources(UsartFlags::TX_EMPTY),
            }
        }

        if flags.contains(UsartFlags::TX_COMPLETE) && sources.contains(UsartFlags::TX_COMPLETE) {
            backend.disable_sources(UsartFlags::TX_COMPLETE);
            backend.clear_flags(UsartFlags::TX_COMPLETE);
            events |= UsartEvent::TX_COMPLETE;
        }

        if flags.contains(UsartFlags::CTS) && sources.contains(UsartFlags::CTS) {
            backend.clear_flags(UsartFlags::CTS);
            events |= UsartEvent::CTS;
        }

        events
    }

    fn service_dma_tx(backend: &B, state: &mut UsartState) -> UsartEvent {
        let dma = backend.take_dma_events(Direction::Tx);
        if !state.tx_dma {
            return UsartEvent::empty();
        }

        if dma.contains(DmaEvents::ERROR) {
            backend.stop_dma(Direction::Tx);
            state.tx_dma = false;
            state.status.remove(UsartStatus::TX_BUSY);
            state.errors |= UsartErrors::DMA_FAULT;
            return UsartEvent::DMA_FAULT;
        }

        if dma.contains(DmaEvents::COMPLETE) {
            if let Some(tx) = state.tx.as_mut() {
                tx.complete();
            }
            state.tx_dma = false;
            state.status.remove(UsartStatus::TX_BUSY);
            backend.enable_sources(UsartFlags::TX_COMPLETE);
            return UsartEvent::SEND_COMPLETE;
        }

        UsartEvent::empty()
    }

    fn service_dma_rx(backend: &B, state: &mut UsartState) -> UsartEvent {
        let dma = backend.take_dma_events(Direction::Rx);
        if !state.rx_dma {
            return UsartEvent::empty();
        }

        if dma.contains(DmaEvents::ERROR) {
            backend.stop_dma(Direction::Rx);
            backend.disable_sources(UsartFlags::IDLE);
            state.finish_rx();
            state.errors |= UsartErrors::DMA_FAULT;
            return UsartEvent::DMA_FAULT
                | UsartEvent::RECEIVE_COMPLETE
                | UsartEvent::RECEIVE_INCOMPLETE;
        }

        let mut events = UsartEvent::empty();
        let circular = state.rx_circular;
        if let Some(rx) = state.rx.as_mut() {
            let frames = rx.frames();
            if dma.contains(DmaEvents::HALF_COMPLETE) {
                rx.advance_to(frames / 2);
                events |= UsartEvent::RECEIVE_HALF_COMPLETE;
            }
            if dma.contains(DmaEvents::COMPLETE) {
                rx.advance_to(frames);
                events |= UsartEvent::RECEIVE_COMPLETE;
            }
        }

        // A circular stream keeps filling the same buffer.
        if events.contains(UsartEvent::RECEIVE_COMPLETE) && !circular {
            backend.disable_sources(UsartFlags::IDLE);
            state.finish_rx();
        }
        events
    }
}

impl<P: Platform, B: UsartBackend> PeripheralDriver for UsartDriver<P, B> {
    type Id = UsartId;
    type Config = UsartConfig;
    type Status = UsartStatus;
    type Errors = UsartErrors;

    fn init(&self, id: UsartId, config: &UsartConfig) -> DriverResult {
        if self.get_status(id).contains(UsartStatus::INITIALIZED) {
            self.deinit(id)?;
        }

        let binding = self.registry.lookup(id);
        let backend = &self.backends[id.index()];
        let slot = &self.slots[id.index()];
        let dispatcher = EventDispatcher::new(config.event_callback, config.dispatch);

        slot.mailbox.take();
        slot.state.with(|state| {
            *state = UsartState::new();
            state.dispatcher = dispatcher;
            state.format = config.frame_format();
        });

        irq::install::<P>(binding, self.entry);
        if let Err(err) = backend.bring_up(binding, &config.programmed()) {
            warn!("{}: bring-up rejected: {}", binding.name, err);
            irq::uninstall::<P>(binding);
            slot.state.with(|state| *state = UsartState::new());
            return Err(DriverError::Fail);
        }
        if config.flow_control.uses_cts() {
            backend.enable_sources(UsartFlags::CTS);
        }

        slot.state.with(|state| {
            state.binding = Some(binding);
            state.status = UsartStatus::INITIALIZED;
        });
        debug!(
            "{}: initialized, {} baud {:?} {:?} {:?}",
            binding.name, config.baud_rate, config.data_bits, config.parity, config.stop_bits
        );

        dispatcher.dispatch(UsartEvent::INITIALIZED, &slot.mailbox);
        Ok(())
    }

    fn deinit(&self, id: UsartId) -> DriverResult {
        let backend = &self.backends[id.index()];
        let slot = &self.slots[id.index()];

        let binding = slot.state.with(|state| {
            let binding = state.binding;
            if binding.is_some() {
                state.abort(backend);
            }
            binding
        });

        if let Some(binding) = binding {
            backend.set_enabled(false);
            backend.tear_down(binding);
            irq::uninstall::<P>(binding);
            debug!("{}: deinitialized", binding.name);
        }

        slot.state.with(|state| *state = UsartState::new());
        slot.mailbox.take();
        Ok(())
    }

    fn start(&self, id: UsartId) {
        if self.binding(id).is_ok() {
            self.backends[id.index()].set_enabled(true);
        }
    }

    fn stop(&self, id: UsartId) {
        if self.binding(id).is_err() {
            return;
        }
        let backend = &self.backends[id.index()];
        backend.set_enabled(false);
        self.slots[id.index()].state.with(|state| state.abort(backend));
    }

    fn get_status(&self, id: UsartId) -> UsartStatus {
        self.slots[id.index()].state.with(|state| state.status)
    }

    fn get_error(&self, id: UsartId) -> UsartErrors {
        self.slots[id.index()].state.with(|state| state.errors)
    }
}

impl<P: Platform, B: UsartBackend> BlockingTransfer for UsartDriver<P, B> {
    fn poll_send(&self, id: UsartId, data: &[u8], timeout_ms: u32) -> DriverResult {
        self.binding(id)?;
        if data.is_empty() {
            return Ok(());
        }
        let format = self.format(id);
        if format.frames(data.len()).is_none() {
            return Err(DriverError::Fail);
        }

        let backend = &self.backends[id.index()];
        let start = P::now_ms();
        for frame in data.chunks(format.width) {
            wait_for::<P, _>(start, timeout_ms, || backend.flags(), UsartFlags::TX_EMPTY)?;
            backend.write_frame(format.load(frame));
        }
        wait_for::<P, _>(start, timeout_ms, || backend.flags(), UsartFlags::TX_COMPLETE)?;
        Ok(())
    }

    fn poll_receive(&self, id: UsartId, buffer: &mut [u8], timeout_ms: u32) -> DriverResult {
        self.binding(id)?;
        if buffer.is_empty() {
            return Ok(());
        }
        let format = self.format(id);
        if format.frames(buffer.len()).is_none() {
            return Err(DriverError::Fail);
        }

        let backend = &self.backends[id.index()];
        let start = P::now_ms();
        for frame in buffer.chunks_mut(format.width) {
            let flags = wait_for::<P, _>(
                start,
                timeout_ms,
                || backend.flags(),
                UsartFlags::RX_NOT_EMPTY | UsartFlags::FAULTS,
            )?;
            let faults = flags & UsartFlags::FAULTS;
            if !faults.is_empty() {
                backend.clear_flags(faults);
                let (errors, _) = faults.faults();
                self.slots[id.index()]
                    .state
                    .with(|state| state.errors |= errors);
                return Err(DriverError::Fail);
            }
            format.place(backend.read_frame(), frame);
        }
        Ok(())
    }
}

impl<P: Platform, B: UsartBackend> AsyncTransfer for UsartDriver<P, B> {
    fn send(&self, id: UsartId, data: &'static [u8]) -> DriverResult {
        self.binding(id)?;
        let backend = &self.backends[id.index()];

        self.slots[id.index()].state.with(|state| {
            let binding = state.binding.ok_or(DriverError::Fail)?;
            if state.status.contains(UsartStatus::TX_BUSY) {
                return Err(DriverError::Busy);
            }
            let tx = TxTransfer::new(data, state.format).ok_or(DriverError::Fail)?;

            if binding.dma_tx.is_some() {
                let (address, len) = tx.region();
                backend.start_dma(Direction::Tx, address, len, false)?;
                state.tx_dma = true;
            } else {
                backend.enable_sources(UsartFlags::TX_EMPTY);
            }
            state.tx = Some(tx);
            state.status.insert(UsartStatus::TX_BUSY);
            Ok(())
        })
    }

    fn receive(&self, id: UsartId, buffer: &'static mut [u8]) -> DriverResult {
        self.binding(id)?;
        let backend = &self.backends[id.index()];

        self.slots[id.index()].state.with(|state| {
            let binding = state.binding.ok_or(DriverError::Fail)?;
            if state.status.contains(UsartStatus::RX_BUSY) {
                return Err(DriverError::Busy);
            }
            let mut rx = RxTransfer::new(buffer, state.format).ok_or(DriverError::Fail)?;

            if let Some(dma) = binding.dma_rx {
                let (address, len) = rx.region();
                backend.start_dma(Direction::Rx, address, len, dma.circular)?;
                state.rx_dma = true;
                state.rx_circular = dma.circular;
                backend.enable_sources(UsartFlags::IDLE);
            } else {
                backend.enable_sources(UsartFlags::RX_NOT_EMPTY | UsartFlags::IDLE);
            }
            state.errors = UsartErrors::empty();
            state.rx_last = (0, rx.frames());
            state.rx = Some(rx);
            state.status.insert(UsartStatus::RX_BUSY);
            Ok(())
        })
    }

    fn take_received(&self, id: UsartId) -> Option<Received> {
        self.slots[id.index()]
            .state
            .with(|state| state.received.take())
    }
}
