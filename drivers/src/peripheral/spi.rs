//! SPI driver object.
//!
//! Every SPI transfer is full duplex at the wire: each frame clocked out
//! clocks one in. `send` discards what comes back, `receive` clocks out
//! [`DUMMY_FRAME`]s, and `transfer` keeps both sides.

use core::marker::PhantomData;

use common::sync::IrqMutex;
use log::{debug, trace, warn};

use crate::driver::{
    EventDispatcher, FrameFormat, Mailbox, Received, RxTransfer, TxTransfer, wait_for,
};
use crate::error::{DriverError, DriverResult};
use crate::hal::{AsyncTransfer, BlockingTransfer, PeripheralDriver};
use crate::hal::spi::{
    DUMMY_FRAME, SpiBackend, SpiConfig, SpiErrors, SpiEvent, SpiFlags, SpiStatus,
};
use crate::irq::{self, Vector};
use crate::platform::Platform;
use crate::registry::{DeviceRegistry, HardwareBinding, PeripheralId, SPI_COUNT, SpiId};

const TRANSFER_SOURCES: SpiFlags = SpiFlags::TX_EMPTY.union(SpiFlags::RX_NOT_EMPTY);

struct SpiOp {
    tx: Option<TxTransfer>,
    rx: Option<RxTransfer>,
    frames: usize,
    sent: usize,
    received: usize,
}

struct SpiState {
    binding: Option<&'static HardwareBinding>,
    dispatcher: EventDispatcher<SpiEvent>,
    format: FrameFormat,
    status: SpiStatus,
    errors: SpiErrors,
    op: Option<SpiOp>,
    last: (usize, usize),
    received: Option<Received>,
}

impl SpiState {
    const fn new() -> Self {
        Self {
            binding: None,
            dispatcher: EventDispatcher::none(),
            format: FrameFormat::BYTE,
            status: SpiStatus::empty(),
            errors: SpiErrors::empty(),
            op: None,
            last: (0, 0),
            received: None,
        }
    }

    fn finish(&mut self, backend: &impl SpiBackend) {
        backend.disable_sources(TRANSFER_SOURCES);
        if let Some(op) = self.op.take() {
            self.last = (op.received, op.frames);
            if let Some(rx) = op.rx {
                self.received = Some(rx.finish());
            }
        }
        self.status.remove(SpiStatus::BUSY);
    }
}

struct SpiSlot {
    state: IrqMutex<SpiState>,
    mailbox: Mailbox<SpiEvent>,
}

impl SpiSlot {
    const fn new() -> Self {
        Self {
            state: IrqMutex::new(SpiState::new()),
            mailbox: Mailbox::new(),
        }
    }
}

/// Driver object for every SPI instance of a board.
pub struct SpiDriver<P: Platform, B: SpiBackend> {
    registry: &'static DeviceRegistry<SPI_COUNT>,
    backends: [B; SPI_COUNT],
    slots: [SpiSlot; SPI_COUNT],
    entry: Vector,
    _platform: PhantomData<fn() -> P>,
}

impl<P: Platform, B: SpiBackend> SpiDriver<P, B> {
    pub const fn new(
        registry: &'static DeviceRegistry<SPI_COUNT>,
        backends: [B; SPI_COUNT],
        entry: Vector,
    ) -> Self {
        Self {
            registry,
            backends,
            slots: [const { SpiSlot::new() }; SPI_COUNT],
            entry,
            _platform: PhantomData,
        }
    }

    pub fn backend(&self, id: SpiId) -> &B {
        &self.backends[id.index()]
    }

    fn binding(&self, id: SpiId) -> DriverResult<&'static HardwareBinding> {
        match self.slots[id.index()].state.with(|state| state.binding) {
            Some(binding) => Ok(binding),
            None => {
                warn!("{:?}: not initialized", id);
                Err(DriverError::Fail)
            }
        }
    }

    fn format(&self, id: SpiId) -> FrameFormat {
        self.slots[id.index()].state.with(|state| state.format)
    }

    fn arm(&self, id: SpiId, tx: Option<TxTransfer>, rx: Option<RxTransfer>) -> DriverResult {
        self.binding(id)?;
        let backend = &self.backends[id.index()];
        let frames = match (&tx, &rx) {
            (Some(tx), _) => tx.frames(),
            (_, Some(rx)) => rx.frames(),
            _ => return Err(DriverError::Fail),
        };

        self.slots[id.index()].state.with(|state| {
            if state.binding.is_none() {
                return Err(DriverError::Fail);
            }
            if state.status.contains(SpiStatus::BUSY) {
                return Err(DriverError::Busy);
            }
            state.errors = SpiErrors::empty();
            state.last = (0, frames);
            state.op = Some(SpiOp {
                tx,
                rx,
                frames,
                sent: 0,
                received: 0,
            });
            state.status.insert(SpiStatus::BUSY);
            backend.enable_sources(TRANSFER_SOURCES);
            Ok(())
        })
    }

    /// Clock out `data` while filling `buffer`; both must be the same length.
    pub fn transfer(
        &self,
        id: SpiId,
        data: &'static [u8],
        buffer: &'static mut [u8],
    ) -> DriverResult {
        if data.len() != buffer.len() {
            return Err(DriverError::Fail);
        }
        let format = self.format(id);
        let tx = TxTransfer::new(data, format).ok_or(DriverError::Fail)?;
        let rx = RxTransfer::new(buffer, format).ok_or(DriverError::Fail)?;
        self.arm(id, Some(tx), Some(rx))
    }

    /// Blocking [`SpiDriver::transfer`]. Bypasses the busy flag like the other
    /// `poll_*` calls.
    pub fn poll_transfer(
        &self,
        id: SpiId,
        data: &[u8],
        buffer: &mut [u8],
        timeout_ms: u32,
    ) -> DriverResult {
        if data.len() != buffer.len() {
            return Err(DriverError::Fail);
        }
        self.poll(id, Some(data), Some(buffer), timeout_ms)
    }

    fn poll(
        &self,
        id: SpiId,
        data: Option<&[u8]>,
        mut buffer: Option<&mut [u8]>,
        timeout_ms: u32,
    ) -> DriverResult {
        self.binding(id)?;
        let format = self.format(id);
        let len = data.map_or(0, <[u8]>::len).max(buffer.as_deref().map_or(0, <[u8]>::len));
        if len == 0 {
            return Ok(());
        }
        let frames = format.frames(len).ok_or(DriverError::Fail)?;

        let backend = &self.backends[id.index()];
        let start = P::now_ms();
        for index in 0..frames {
            let offset = index * format.width;
            let frame = data.map_or(DUMMY_FRAME & format.mask, |data| {
                format.load(&data[offset..offset + format.width])
            });

            wait_for::<P, _>(start, timeout_ms, || backend.flags(), SpiFlags::TX_EMPTY)?;
            backend.write_frame(frame);

            let any = SpiFlags::RX_NOT_EMPTY | SpiFlags::FAULTS;
            let flags = wait_for::<P, _>(start, timeout_ms, || backend.flags(), any)?;
            let faults = flags & SpiFlags::FAULTS;
            if !faults.is_empty() {
                backend.clear_flags(faults);
                let (errors, _) = Self::map_faults(faults);
                self.slots[id.index()]
                    .state
                    .with(|state| state.errors |= errors);
                return Err(DriverError::Fail);
            }

            let received = backend.read_frame();
            if let Some(buffer) = buffer.as_deref_mut() {
                format.place(received, &mut buffer[offset..offset + format.width]);
            }
        }
        Ok(())
    }

    fn map_faults(faults: SpiFlags) -> (SpiErrors, SpiEvent) {
        let mut errors = SpiErrors::empty();
        let mut events = SpiEvent::empty();
        if faults.contains(SpiFlags::OVERRUN) {
            errors |= SpiErrors::DATA_LOST;
            events |= SpiEvent::DATA_LOST;
        }
        if faults.contains(SpiFlags::MODE_FAULT) {
            errors |= SpiErrors::MODE_FAULT;
            events |= SpiEvent::MODE_FAULT;
        }
        (errors, events)
    }

    pub fn dispatch_pending(&self, id: SpiId) -> bool {
        let slot = &self.slots[id.index()];
        let dispatcher = slot.state.with(|state| state.dispatcher);
        dispatcher.drain(&slot.mailbox)
    }

    /// Frames exchanged and frames requested by the current or last transfer.
    pub fn progress(&self, id: SpiId) -> (usize, usize) {
        self.slots[id.index()].state.with(|state| {
            state
                .op
                .as_ref()
                .map(|op| (op.received, op.frames))
                .unwrap_or(state.last)
        })
    }

    /// Interrupt entry for every instance.
    pub fn on_interrupt(&self) {
        let Some(irq) = P::active_irq() else {
            return;
        };
        let Some((index, _)) = self.registry.route(irq) else {
            trace!("spi: stray interrupt {}", irq);
            return;
        };
        let slot = &self.slots[index];
        let backend = &self.backends[index];

        let (dispatcher, events) = slot.state.with(|state| {
            let events = if state.binding.is_some() {
                Self::service(backend, state)
            } else {
                SpiEvent::empty()
            };
            (state.dispatcher, events)
        });

        if !events.is_empty() {
            trace!("spi{}: irq {} {:?}", index + 1, irq, events);
        }
        dispatcher.dispatch(events, &slot.mailbox);
    }

    fn service(backend: &B, state: &mut SpiState) -> SpiEvent {
        let flags = backend.flags();
        let sources = backend.sources();

        let faults = flags & SpiFlags::FAULTS;
        if !faults.is_empty() {
            backend.clear_flags(faults);
            let (errors, events) = Self::map_faults(faults);
            state.errors |= errors;
            if state.op.is_some() {
                state.finish(backend);
            }
            return events;
        }

        let mut events = SpiEvent::empty();
        let mask = state.format.mask;

        if flags.contains(SpiFlags::RX_NOT_EMPTY) && sources.contains(SpiFlags::RX_NOT_EMPTY) {
            let frame = backend.read_frame();
            let done = match state.op.as_mut() {
                Some(op) => {
                    if let Some(rx) = op.rx.as_mut() {
                        rx.store(frame);
                    }
                    op.received += 1;
                    op.received == op.frames
                }
                None => false,
            };
            if done {
                state.finish(backend);
                events |= SpiEvent::TRANSFER_COMPLETE;
            }
        }

        if flags.contains(SpiFlags::TX_EMPTY) && sources.contains(SpiFlags::TX_EMPTY) {
            match state.op.as_mut() {
                Some(op) if op.sent < op.frames => {
                    let frame = op
                        .tx
                        .as_mut()
                        .and_then(TxTransfer::next_frame)
                        .unwrap_or(DUMMY_FRAME & mask);
                    backend.write_frame(frame);
                    op.sent += 1;
                    if op.sent == op.frames {
                        backend.disable_sources(SpiFlags::TX_EMPTY);
                    }
                }
                _ => backend.disable_sources(SpiFlags::TX_EMPTY),
            }
        }

        events
    }
}

impl<P: Platform, B: SpiBackend> PeripheralDriver for SpiDriver<P, B> {
    type Id = SpiId;
    type Config = SpiConfig;
    type Status = SpiStatus;
    type Errors = SpiErrors;

    fn init(&self, id: SpiId, config: &SpiConfig) -> DriverResult {
        if self.get_status(id).contains(SpiStatus::INITIALIZED) {
            self.deinit(id)?;
        }
        if !config.is_valid() {
            warn!(
                "{:?}: unsupported frame size {} or frequency {}",
                id, config.data_size, config.frequency
            );
            return Err(DriverError::Fail);
        }

        let binding = self.registry.lookup(id);
        let backend = &self.backends[id.index()];
        let slot = &self.slots[id.index()];
        let dispatcher = EventDispatcher::new(config.event_callback, config.dispatch);

        slot.mailbox.take();
        slot.state.with(|state| {
            *state = SpiState::new();
            state.dispatcher = dispatcher;
            state.format = config.frame_format();
        });

        irq::install::<P>(binding, self.entry);
        if let Err(err) = backend.bring_up(binding, config) {
            warn!("{}: bring-up rejected: {}", binding.name, err);
            irq::uninstall::<P>(binding);
            slot.state.with(|state| *state = SpiState::new());
            return Err(DriverError::Fail);
        }

        slot.state.with(|state| {
            state.binding = Some(binding);
            state.status = SpiStatus::INITIALIZED;
        });
        debug!(
            "{}: initialized, {:?} {} bits at {} Hz",
            binding.name, config.role, config.data_size, config.frequency
        );

        dispatcher.dispatch(SpiEvent::INITIALIZED, &slot.mailbox);
        Ok(())
    }

    fn deinit(&self, id: SpiId) -> DriverResult {
        let backend = &self.backends[id.index()];
        let slot = &self.slots[id.index()];

        let binding = slot.state.with(|state| {
            if state.binding.is_some() {
                state.finish(backend);
            }
            state.binding
        });
        if let Some(binding) = binding {
            backend.set_enabled(false);
            backend.tear_down(binding);
            irq::uninstall::<P>(binding);
            debug!("{}: deinitialized", binding.name);
        }

        slot.state.with(|state| *state = SpiState::new());
        slot.mailbox.take();
        Ok(())
    }

    fn start(&self, id: SpiId) {
        if self.binding(id).is_ok() {
            self.backends[id.index()].set_enabled(true);
        }
    }

    fn stop(&self, id: SpiId) {
        if self.binding(id).is_err() {
            return;
        }
        let backend = &self.backends[id.index()];
        self.slots[id.index()]
            .state
            .with(|state| state.finish(backend));
        backend.set_enabled(false);
    }

    fn get_status(&self, id: SpiId) -> SpiStatus {
        self.slots[id.index()].state.with(|state| state.status)
    }

    fn get_error(&self, id: SpiId) -> SpiErrors {
        self.slots[id.index()].state.with(|state| state.errors)
    }
}

impl<P: Platform, B: SpiBackend> BlockingTransfer for SpiDriver<P, B> {
    fn poll_send(&self, id: SpiId, data: &[u8], timeout_ms: u32) -> DriverResult {
        self.poll(id, Some(data), None, timeout_ms)
    }

    fn poll_receive(&self, id: SpiId, buffer: &mut [u8], timeout_ms: u32) -> DriverResult {
        self.poll(id, None, Some(buffer), timeout_ms)
    }
}

impl<P: Platform, B: SpiBackend> AsyncTransfer for SpiDriver<P, B> {
    /// Clock out `data`, discarding what comes back.
    fn send(&self, id: SpiId, data: &'static [u8]) -> DriverResult {
        let tx = TxTransfer::new(data, self.format(id)).ok_or(DriverError::Fail)?;
        self.arm(id, Some(tx), None)
    }

    /// Fill `buffer`, clocking out dummy frames.
    fn receive(&self, id: SpiId, buffer: &'static mut [u8]) -> DriverResult {
        let rx = RxTransfer::new(buffer, self.format(id)).ok_or(DriverError::Fail)?;
        self.arm(id, None, Some(rx))
    }

    fn take_received(&self, id: SpiId) -> Option<Received> {
        self.slots[id.index()]
            .state
            .with(|state| state.received.take())
    }
}
