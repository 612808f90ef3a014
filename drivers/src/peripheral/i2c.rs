//! I2C driver object.
//!
//! Master transfers walk the bus phases from the event interrupt: START,
//! address, optional register address, optional repeated START, then data.
//! Slave transfers are armed ahead of time and served when a remote master
//! addresses us; when it does so with nothing armed, the callback is told
//! which direction the master wants so it can arm a transfer from there.
//!
//! One busy flag covers the whole bus. Sticky errors are cleared when the
//! next transfer starts.

use core::marker::PhantomData;

use common::sync::IrqMutex;
use log::{debug, trace, warn};

use crate::config::I2C_DEVICE_READY_TIMEOUT_MS;
use crate::driver::{
    EventDispatcher, FrameFormat, Mailbox, Received, RxTransfer, TxTransfer, wait_for,
};
use crate::error::{DriverError, DriverResult};
use crate::hal::PeripheralDriver;
use crate::hal::i2c::{
    I2cBackend, I2cConfig, I2cErrors, I2cEvent, I2cFlags, I2cStatus, MemAddressSize,
    is_valid_address,
};
use crate::irq::{self, Vector};
use crate::platform::Platform;
use crate::registry::{DeviceRegistry, HardwareBinding, I2C_COUNT, I2cId, PeripheralId};

/// Filler clocked out when a master reads more than the armed slave data.
const SLAVE_FILL_BYTE: u8 = 0xFF;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OpKind {
    MasterTransmit,
    MasterReceive,
    MemWrite,
    MemRead,
    SlaveTransmit,
    SlaveReceive,
}

impl OpKind {
    fn is_master(self) -> bool {
        !matches!(self, Self::SlaveTransmit | Self::SlaveReceive)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    /// Waiting for the START condition.
    Start,
    /// Address sent, waiting for the acknowledge.
    Address,
    /// Sending the register address of a memory access.
    MemAddress,
    /// Repeated START issued, the read address goes next.
    Restart,
    Data,
}

struct I2cOp {
    kind: OpKind,
    phase: Phase,
    address: u16,
    /// Whether the address phase in progress is a read.
    reading: bool,
    mem: [u8; 2],
    mem_len: usize,
    mem_sent: usize,
    tx: Option<TxTransfer>,
    rx: Option<RxTransfer>,
    /// Leave the bus claimed at the end for a following transfer.
    pending: bool,
}

impl I2cOp {
    fn master(kind: OpKind, address: u16, pending: bool) -> Self {
        Self {
            kind,
            phase: Phase::Start,
            address,
            reading: false,
            mem: [0; 2],
            mem_len: 0,
            mem_sent: 0,
            tx: None,
            rx: None,
            pending,
        }
    }

    fn slave(kind: OpKind) -> Self {
        Self {
            phase: Phase::Data,
            ..Self::master(kind, 0, false)
        }
    }

    fn with_mem(mut self, mem_addr: u16, size: MemAddressSize) -> Self {
        (self.mem, self.mem_len) = size.encode(mem_addr);
        self
    }

    /// Bytes moved and bytes requested.
    fn progress(&self) -> (usize, usize) {
        match (&self.tx, &self.rx) {
            (Some(tx), _) => tx.progress(),
            (_, Some(rx)) => rx.progress(),
            _ => (0, 0),
        }
    }

    fn moved_data(&self) -> bool {
        self.progress().0 > 0
    }
}

struct I2cState {
    binding: Option<&'static HardwareBinding>,
    dispatcher: EventDispatcher<I2cEvent>,
    status: I2cStatus,
    errors: I2cErrors,
    listening: bool,
    /// The last master transfer left the bus claimed.
    bus_claimed: bool,
    op: Option<I2cOp>,
    last: (usize, usize),
    received: Option<Received>,
}

impl I2cState {
    const fn new() -> Self {
        Self {
            binding: None,
            dispatcher: EventDispatcher::none(),
            status: I2cStatus::empty(),
            errors: I2cErrors::empty(),
            listening: false,
            bus_claimed: false,
            op: None,
            last: (0, 0),
            received: None,
        }
    }

    /// Retire the transfer in flight, parking any receive buffer.
    fn finish(&mut self, backend: &impl I2cBackend) {
        if let Some(op) = self.op.take() {
            self.last = op.progress();
            if let Some(rx) = op.rx {
                self.received = Some(rx.finish());
            }
        }
        self.status.remove(I2cStatus::BUSY);
        backend.set_ack(true);
        if !self.listening {
            backend.set_interrupts(false);
        }
    }

    /// Claim the bus for `op`. Caller holds the lock.
    fn arm(&mut self, op: I2cOp) -> DriverResult {
        if self.binding.is_none() {
            return Err(DriverError::Fail);
        }
        if self.status.contains(I2cStatus::BUSY) {
            return Err(DriverError::Busy);
        }
        self.errors = I2cErrors::empty();
        self.last = (0, op.progress().1);
        self.op = Some(op);
        self.status.insert(I2cStatus::BUSY);
        Ok(())
    }
}

struct I2cSlot {
    state: IrqMutex<I2cState>,
    mailbox: Mailbox<I2cEvent>,
}

impl I2cSlot {
    const fn new() -> Self {
        Self {
            state: IrqMutex::new(I2cState::new()),
            mailbox: Mailbox::new(),
        }
    }
}

/// Driver object for every I2C instance of a board.
pub struct I2cDriver<P: Platform, B: I2cBackend> {
    registry: &'static DeviceRegistry<I2C_COUNT>,
    backends: [B; I2C_COUNT],
    slots: [I2cSlot; I2C_COUNT],
    entry: Vector,
    _platform: PhantomData<fn() -> P>,
}

impl<P: Platform, B: I2cBackend> I2cDriver<P, B> {
    pub const fn new(
        registry: &'static DeviceRegistry<I2C_COUNT>,
        backends: [B; I2C_COUNT],
        entry: Vector,
    ) -> Self {
        Self {
            registry,
            backends,
            slots: [const { I2cSlot::new() }; I2C_COUNT],
            entry,
            _platform: PhantomData,
        }
    }

    pub fn backend(&self, id: I2cId) -> &B {
        &self.backends[id.index()]
    }

    fn binding(&self, id: I2cId) -> DriverResult<&'static HardwareBinding> {
        match self.slots[id.index()].state.with(|state| state.binding) {
            Some(binding) => Ok(binding),
            None => {
                warn!("{:?}: not initialized", id);
                Err(DriverError::Fail)
            }
        }
    }

    fn check_address(addr: u16) -> DriverResult {
        if is_valid_address(addr) {
            Ok(())
        } else {
            warn!("i2c: invalid address {:#06x}", addr);
            Err(DriverError::Fail)
        }
    }

    /// Arm a master transfer and generate the START condition.
    fn start_master(&self, id: I2cId, op: I2cOp) -> DriverResult {
        self.binding(id)?;
        let backend = &self.backends[id.index()];
        self.slots[id.index()].state.with(|state| {
            state.arm(op)?;
            state.bus_claimed = false;
            backend.set_ack(true);
            backend.set_interrupts(true);
            backend.generate_start();
            Ok(())
        })
    }

    fn start_slave(&self, id: I2cId, op: I2cOp) -> DriverResult {
        self.binding(id)?;
        let backend = &self.backends[id.index()];
        self.slots[id.index()].state.with(|state| {
            state.arm(op)?;
            state.listening = true;
            backend.set_listen(true);
            backend.set_ack(true);
            backend.set_interrupts(true);
            Ok(())
        })
    }

    /// Write `data` to the device at `addr`.
    ///
    /// With `pending` set the bus is not released at the end, so the next
    /// transfer begins with a repeated START.
    pub fn master_transmit(
        &self,
        id: I2cId,
        addr: u16,
        data: &'static [u8],
        pending: bool,
    ) -> DriverResult {
        Self::check_address(addr)?;
        let mut op = I2cOp::master(OpKind::MasterTransmit, addr, pending);
        op.tx = Some(TxTransfer::new(data, FrameFormat::BYTE).ok_or(DriverError::Fail)?);
        self.start_master(id, op)
    }

    /// Read `buffer.len()` bytes from the device at `addr`.
    pub fn master_receive(
        &self,
        id: I2cId,
        addr: u16,
        buffer: &'static mut [u8],
        pending: bool,
    ) -> DriverResult {
        Self::check_address(addr)?;
        let mut op = I2cOp::master(OpKind::MasterReceive, addr, pending);
        op.rx = Some(RxTransfer::new(buffer, FrameFormat::BYTE).ok_or(DriverError::Fail)?);
        self.start_master(id, op)
    }

    /// Write `data` to register `mem_addr` of the device at `addr`.
    pub fn mem_write(
        &self,
        id: I2cId,
        addr: u16,
        mem_addr: u16,
        size: MemAddressSize,
        data: &'static [u8],
    ) -> DriverResult {
        Self::check_address(addr)?;
        let mut op = I2cOp::master(OpKind::MemWrite, addr, false).with_mem(mem_addr, size);
        op.tx = Some(TxTransfer::new(data, FrameFormat::BYTE).ok_or(DriverError::Fail)?);
        self.start_master(id, op)
    }

    /// Read from register `mem_addr` of the device at `addr`, using a
    /// repeated START between the register address and the data.
    pub fn mem_read(
        &self,
        id: I2cId,
        addr: u16,
        mem_addr: u16,
        size: MemAddressSize,
        buffer: &'static mut [u8],
    ) -> DriverResult {
        Self::check_address(addr)?;
        let mut op = I2cOp::master(OpKind::MemRead, addr, false).with_mem(mem_addr, size);
        op.rx = Some(RxTransfer::new(buffer, FrameFormat::BYTE).ok_or(DriverError::Fail)?);
        self.start_master(id, op)
    }

    /// Answer the next read from a remote master with `data`.
    pub fn slave_transmit(&self, id: I2cId, data: &'static [u8]) -> DriverResult {
        let mut op = I2cOp::slave(OpKind::SlaveTransmit);
        op.tx = Some(TxTransfer::new(data, FrameFormat::BYTE).ok_or(DriverError::Fail)?);
        self.start_slave(id, op)
    }

    /// Accept the next write from a remote master into `buffer`.
    pub fn slave_receive(&self, id: I2cId, buffer: &'static mut [u8]) -> DriverResult {
        let mut op = I2cOp::slave(OpKind::SlaveReceive);
        op.rx = Some(RxTransfer::new(buffer, FrameFormat::BYTE).ok_or(DriverError::Fail)?);
        self.start_slave(id, op)
    }

    /// Probe `addr` up to `trials` times, waiting for an address acknowledge.
    ///
    /// Blocks. The bus is marked busy meanwhile so non-blocking transfers
    /// are refused.
    pub fn is_device_ready(&self, id: I2cId, addr: u16, trials: u32) -> DriverResult {
        Self::check_address(addr)?;
        self.binding(id)?;
        let backend = &self.backends[id.index()];
        let slot = &self.slots[id.index()];

        slot.state.with(|state| {
            if state.status.contains(I2cStatus::BUSY) {
                return Err(DriverError::Busy);
            }
            state.status.insert(I2cStatus::BUSY);
            backend.set_interrupts(false);
            Ok(())
        })?;

        let mut result = Err(DriverError::Fail);
        for _ in 0..trials {
            match self.probe(backend, addr) {
                Ok(()) => {
                    result = Ok(());
                    break;
                }
                Err(err) => result = Err(err),
            }
        }

        slot.state.with(|state| {
            state.status.remove(I2cStatus::BUSY);
            if state.listening {
                backend.set_interrupts(true);
            }
        });
        result
    }

    /// One addressing trial. The bus is released whatever the outcome.
    fn probe(&self, backend: &B, addr: u16) -> DriverResult {
        let start = P::now_ms();
        let timeout = I2C_DEVICE_READY_TIMEOUT_MS;
        backend.generate_start();
        let answer = wait_for::<P, _>(start, timeout, || backend.flags(), I2cFlags::START_SENT)
            .and_then(|_| {
                backend.send_address(addr, false);
                wait_for::<P, _>(
                    start,
                    timeout,
                    || backend.flags(),
                    I2cFlags::ADDRESS_SENT | I2cFlags::ACK_FAILURE,
                )
            });
        backend.generate_stop();
        let flags = answer?;
        if flags.contains(I2cFlags::ACK_FAILURE) {
            backend.clear_flags(I2cFlags::ACK_FAILURE);
            return Err(DriverError::Fail);
        }
        backend.clear_flags(I2cFlags::ADDRESS_SENT);
        Ok(())
    }

    /// Blocking master write. Bypasses the busy flag.
    pub fn poll_send(&self, id: I2cId, addr: u16, data: &[u8], timeout_ms: u32) -> DriverResult {
        Self::check_address(addr)?;
        self.binding(id)?;
        let backend = &self.backends[id.index()];
        let start = P::now_ms();

        self.poll_address(backend, start, timeout_ms, addr, false)?;
        for &byte in data {
            self.poll_wait(backend, start, timeout_ms, I2cFlags::TX_EMPTY)?;
            backend.write_byte(byte);
        }
        self.poll_wait(backend, start, timeout_ms, I2cFlags::TX_EMPTY)?;
        backend.generate_stop();
        Ok(())
    }

    /// Blocking master read. Bypasses the busy flag.
    pub fn poll_receive(
        &self,
        id: I2cId,
        addr: u16,
        buffer: &mut [u8],
        timeout_ms: u32,
    ) -> DriverResult {
        Self::check_address(addr)?;
        self.binding(id)?;
        if buffer.is_empty() {
            return Ok(());
        }
        let backend = &self.backends[id.index()];
        let start = P::now_ms();
        let len = buffer.len();

        // NACK the last byte so the device releases the bus.
        backend.set_ack(len > 1);
        self.poll_address(backend, start, timeout_ms, addr, true)?;
        for (index, byte) in buffer.iter_mut().enumerate() {
            self.poll_wait(backend, start, timeout_ms, I2cFlags::RX_NOT_EMPTY)?;
            *byte = backend.read_byte();
            if index + 2 == len {
                backend.set_ack(false);
            }
        }
        backend.generate_stop();
        backend.set_ack(true);
        Ok(())
    }

    fn poll_address(
        &self,
        backend: &B,
        start: u32,
        timeout_ms: u32,
        addr: u16,
        read: bool,
    ) -> DriverResult {
        backend.generate_start();
        self.poll_wait(backend, start, timeout_ms, I2cFlags::START_SENT)?;
        backend.send_address(addr, read);
        self.poll_wait(backend, start, timeout_ms, I2cFlags::ADDRESS_SENT)?;
        backend.clear_flags(I2cFlags::ADDRESS_SENT);
        Ok(())
    }

    /// Wait for `flag`, turning any bus fault into `Fail` after releasing
    /// the bus.
    fn poll_wait(&self, backend: &B, start: u32, timeout_ms: u32, flag: I2cFlags) -> DriverResult {
        let any = flag | I2cFlags::FAULTS;
        let flags = match wait_for::<P, _>(start, timeout_ms, || backend.flags(), any) {
            Ok(flags) => flags,
            Err(err) => {
                backend.generate_stop();
                return Err(err);
            }
        };
        let faults = flags & I2cFlags::FAULTS;
        if !faults.is_empty() {
            backend.clear_flags(faults);
            backend.generate_stop();
            backend.set_ack(true);
            return Err(DriverError::Fail);
        }
        Ok(())
    }

    /// Deliver events parked by [`crate::driver::DispatchMode::Deferred`].
    pub fn dispatch_pending(&self, id: I2cId) -> bool {
        let slot = &self.slots[id.index()];
        let dispatcher = slot.state.with(|state| state.dispatcher);
        dispatcher.drain(&slot.mailbox)
    }

    /// Bytes moved and bytes requested by the current or last transfer.
    pub fn progress(&self, id: I2cId) -> (usize, usize) {
        self.slots[id.index()]
            .state
            .with(|state| state.op.as_ref().map(I2cOp::progress).unwrap_or(state.last))
    }

    /// Whether the last master transfer kept the bus claimed.
    pub fn is_bus_claimed(&self, id: I2cId) -> bool {
        self.slots[id.index()].state.with(|state| state.bus_claimed)
    }

    pub fn take_received(&self, id: I2cId) -> Option<Received> {
        self.slots[id.index()]
            .state
            .with(|state| state.received.take())
    }

    /// Interrupt entry for the event and error lines of every instance.
    pub fn on_interrupt(&self) {
        let Some(irq) = P::active_irq() else {
            return;
        };
        let Some((index, _)) = self.registry.route(irq) else {
            trace!("i2c: stray interrupt {}", irq);
            return;
        };
        let slot = &self.slots[index];
        let backend = &self.backends[index];

        let (dispatcher, events) = slot.state.with(|state| {
            let events = if state.binding.is_some() {
                Self::service(backend, state)
            } else {
                I2cEvent::empty()
            };
            (state.dispatcher, events)
        });

        if !events.is_empty() {
            trace!("i2c{}: irq {} {:?}", index + 1, irq, events);
        }
        dispatcher.dispatch(events, &slot.mailbox);
    }

    fn service(backend: &B, state: &mut I2cState) -> I2cEvent {
        let flags = backend.flags();
        let faults = flags & I2cFlags::FAULTS;
        if !faults.is_empty() {
            return Self::service_faults(backend, state, flags, faults);
        }

        match state.op.as_ref().map(|op| op.kind) {
            Some(kind) if kind.is_master() => Self::service_master(backend, state, flags),
            _ => Self::service_slave(backend, state, flags),
        }
    }

    fn service_faults(
        backend: &B,
        state: &mut I2cState,
        flags: I2cFlags,
        faults: I2cFlags,
    ) -> I2cEvent {
        backend.clear_flags(faults);

        // The remote master NACKs the last byte it wants from us.
        if faults == I2cFlags::ACK_FAILURE
            && state.op.as_ref().map(|op| op.kind) == Some(OpKind::SlaveTransmit)
        {
            return Self::finish_slave(backend, state);
        }

        let mut events = I2cEvent::empty();
        if faults.intersects(I2cFlags::BUS_ERROR | I2cFlags::OVERRUN) {
            state.errors |= I2cErrors::BUS_ERROR;
            events |= I2cEvent::BUS_ERROR;
        }
        if faults.contains(I2cFlags::ARBITRATION_LOST) {
            state.errors |= I2cErrors::ARBITRATION_LOST;
            events |= I2cEvent::ARBITRATION_LOST;
        }

        let Some(op) = state.op.as_ref() else {
            return events;
        };
        // Any NACK before the first data byte, register address included.
        if faults.contains(I2cFlags::ACK_FAILURE) && op.kind.is_master() && !op.moved_data() {
            events |= I2cEvent::ADDRESS_NACK;
        }
        if op.kind.is_master() && !flags.contains(I2cFlags::ARBITRATION_LOST) {
            backend.generate_stop();
        }
        state.bus_claimed = false;
        state.finish(backend);
        events | I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
    }

    fn service_master(backend: &B, state: &mut I2cState, flags: I2cFlags) -> I2cEvent {
        let Some(op) = state.op.as_mut() else {
            return I2cEvent::empty();
        };

        if flags.contains(I2cFlags::START_SENT) {
            let read = match op.phase {
                Phase::Restart => true,
                _ => op.kind == OpKind::MasterReceive,
            };
            backend.send_address(op.address, read);
            op.reading = read;
            op.phase = Phase::Address;
            return I2cEvent::empty();
        }

        if flags.contains(I2cFlags::ADDRESS_SENT) && op.phase == Phase::Address {
            backend.clear_flags(I2cFlags::ADDRESS_SENT);
            if op.reading {
                op.phase = Phase::Data;
                if op.rx.as_ref().map(RxTransfer::frames) == Some(1) {
                    backend.set_ack(false);
                }
            } else if op.mem_len > 0 {
                op.phase = Phase::MemAddress;
            } else {
                op.phase = Phase::Data;
            }
            return I2cEvent::empty();
        }

        if flags.contains(I2cFlags::TX_EMPTY) && !op.reading {
            if op.phase == Phase::MemAddress {
                if op.mem_sent < op.mem_len {
                    backend.write_byte(op.mem[op.mem_sent]);
                    op.mem_sent += 1;
                    return I2cEvent::empty();
                }
                if op.kind == OpKind::MemRead {
                    backend.generate_start();
                    op.phase = Phase::Restart;
                    return I2cEvent::empty();
                }
                op.phase = Phase::Data;
            }
            if op.phase == Phase::Data {
                let next = op.tx.as_mut().and_then(TxTransfer::next_frame);
                match next {
                    Some(byte) => backend.write_byte(byte as u8),
                    None => return Self::finish_master(backend, state),
                }
            }
            return I2cEvent::empty();
        }

        if flags.contains(I2cFlags::RX_NOT_EMPTY) && op.reading && op.phase == Phase::Data {
            let byte = backend.read_byte();
            let Some(rx) = op.rx.as_mut() else {
                return I2cEvent::empty();
            };
            let done = rx.store(u16::from(byte));
            if rx.frames() - rx.count() == 1 {
                backend.set_ack(false);
            }
            if done {
                return Self::finish_master(backend, state);
            }
        }

        I2cEvent::empty()
    }

    fn finish_master(backend: &B, state: &mut I2cState) -> I2cEvent {
        let pending = state.op.as_ref().is_some_and(|op| op.pending);
        if !pending {
            backend.generate_stop();
        }
        state.bus_claimed = pending;
        state.finish(backend);
        I2cEvent::TRANSFER_COMPLETE
    }

    fn service_slave(backend: &B, state: &mut I2cState, flags: I2cFlags) -> I2cEvent {
        let mut events = I2cEvent::empty();

        if flags.contains(I2cFlags::ADDRESS_MATCHED) {
            backend.clear_flags(I2cFlags::ADDRESS_MATCHED | I2cFlags::GENERAL_CALL);
            let general_call = flags.contains(I2cFlags::GENERAL_CALL);
            state.status.set(I2cStatus::GENERAL_CALL, general_call);

            let master_reads = flags.contains(I2cFlags::TRANSMITTER);
            let wanted = if master_reads {
                OpKind::SlaveTransmit
            } else {
                OpKind::SlaveReceive
            };
            if state.op.as_ref().map(|op| op.kind) != Some(wanted) {
                events |= if master_reads {
                    I2cEvent::SLAVE_TRANSMIT
                } else {
                    I2cEvent::SLAVE_RECEIVE
                };
                if general_call {
                    events |= I2cEvent::GENERAL_CALL;
                }
            }
        }

        if flags.contains(I2cFlags::TX_EMPTY) && flags.contains(I2cFlags::TRANSMITTER) {
            let next = state
                .op
                .as_mut()
                .filter(|op| op.kind == OpKind::SlaveTransmit)
                .and_then(|op| op.tx.as_mut())
                .and_then(TxTransfer::next_frame);
            backend.write_byte(next.map_or(SLAVE_FILL_BYTE, |byte| byte as u8));
        }

        if flags.contains(I2cFlags::RX_NOT_EMPTY) {
            let byte = backend.read_byte();
            if let Some(rx) = state
                .op
                .as_mut()
                .filter(|op| op.kind == OpKind::SlaveReceive)
                .and_then(|op| op.rx.as_mut())
            {
                rx.store(u16::from(byte));
            }
        }

        if flags.contains(I2cFlags::STOP_DETECTED) {
            backend.clear_flags(I2cFlags::STOP_DETECTED);
            if state.op.is_some() {
                events |= Self::finish_slave(backend, state);
            }
        }

        events
    }

    fn finish_slave(backend: &B, state: &mut I2cState) -> I2cEvent {
        let (count, requested) = state.op.as_ref().map(I2cOp::progress).unwrap_or((0, 0));
        state.finish(backend);
        if count < requested {
            I2cEvent::TRANSFER_COMPLETE | I2cEvent::TRANSFER_INCOMPLETE
        } else {
            I2cEvent::TRANSFER_COMPLETE
        }
    }
}

impl<P: Platform, B: I2cBackend> PeripheralDriver for I2cDriver<P, B> {
    type Id = I2cId;
    type Config = I2cConfig;
    type Status = I2cStatus;
    type Errors = I2cErrors;

    fn init(&self, id: I2cId, config: &I2cConfig) -> DriverResult {
        if self.get_status(id).contains(I2cStatus::INITIALIZED) {
            self.deinit(id)?;
        }
        if config.own_address != 0 && !is_valid_address(config.own_address) {
            warn!("{:?}: invalid own address {:#06x}", id, config.own_address);
            return Err(DriverError::Fail);
        }

        let binding = self.registry.lookup(id);
        let backend = &self.backends[id.index()];
        let slot = &self.slots[id.index()];
        let dispatcher = EventDispatcher::new(config.event_callback, config.dispatch);

        slot.mailbox.take();
        slot.state.with(|state| {
            *state = I2cState::new();
            state.dispatcher = dispatcher;
        });

        irq::install::<P>(binding, self.entry);
        if let Err(err) = backend.bring_up(binding, config) {
            warn!("{}: bring-up rejected: {}", binding.name, err);
            irq::uninstall::<P>(binding);
            slot.state.with(|state| *state = I2cState::new());
            return Err(DriverError::Fail);
        }

        let listening = config.own_address != 0;
        slot.state.with(|state| {
            state.binding = Some(binding);
            state.status = I2cStatus::INITIALIZED;
            state.listening = listening;
            if listening {
                backend.set_listen(true);
                backend.set_interrupts(true);
            }
        });
        debug!(
            "{}: initialized at {} Hz, own address {:#x}",
            binding.name,
            config.bus_speed.hz(),
            config.own_address
        );

        dispatcher.dispatch(I2cEvent::INITIALIZED, &slot.mailbox);
        Ok(())
    }

    fn deinit(&self, id: I2cId) -> DriverResult {
        let backend = &self.backends[id.index()];
        let slot = &self.slots[id.index()];

        let binding = slot.state.with(|state| state.binding);
        if let Some(binding) = binding {
            backend.set_interrupts(false);
            backend.set_listen(false);
            backend.set_enabled(false);
            backend.tear_down(binding);
            irq::uninstall::<P>(binding);
            debug!("{}: deinitialized", binding.name);
        }

        slot.state.with(|state| *state = I2cState::new());
        slot.mailbox.take();
        Ok(())
    }

    fn start(&self, id: I2cId) {
        if self.binding(id).is_ok() {
            self.backends[id.index()].set_enabled(true);
        }
    }

    fn stop(&self, id: I2cId) {
        if self.binding(id).is_err() {
            return;
        }
        let backend = &self.backends[id.index()];
        self.slots[id.index()].state.with(|state| {
            if state.op.as_ref().is_some_and(|op| op.kind.is_master()) || state.bus_claimed {
                backend.generate_stop();
            }
            state.bus_claimed = false;
            state.listening = false;
            backend.set_listen(false);
            state.finish(backend);
        });
        backend.set_enabled(false);
    }

    fn get_status(&self, id: I2cId) -> I2cStatus {
        self.slots[id.index()].state.with(|state| state.status)
    }

    fn get_error(&self, id: I2cId) -> I2cErrors {
        self.slots[id.index()].state.with(|state| state.errors)
    }
}
