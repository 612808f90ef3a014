//! Simulated I2C bus.
//!
//! Holds a few memory-style target devices that a master transfer can
//! address: written bytes first load the register pointer, then land in
//! memory; reads stream memory out from the pointer. A test can also play a
//! remote master addressing us in slave mode.

use common::RingBuffer;
use common::sync::SpinLock;

use super::SimLog;
use crate::error::BackendError;
use crate::hal::i2c::{I2cBackend, I2cConfig, I2cFlags};
use crate::registry::HardwareBinding;

const MAX_TARGETS: usize = 4;
const MEMORY_SIZE: usize = 256;
const LOG_SIZE: usize = 256;

#[derive(Copy, Clone)]
struct Target {
    address: u16,
    /// Register address width in bytes.
    pointer_bytes: usize,
    pointer: usize,
    memory: [u8; MEMORY_SIZE],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Bus {
    Idle,
    Start,
    MasterWrite { target: usize, pointer_bytes: usize },
    MasterRead { target: usize },
    SlaveTransmit,
    SlaveReceive,
}

struct State {
    config: Option<I2cConfig>,
    bring_ups: usize,
    fail_bring_up: bool,
    enabled: bool,
    interrupts: bool,
    listening: bool,
    ack: bool,
    flags: I2cFlags,
    bus: Bus,
    targets: [Option<Target>; MAX_TARGETS],
    /// Every data byte the master put on the bus.
    written: SimLog<LOG_SIZE>,
    /// Bytes the remote master will write to us.
    slave_rx: RingBuffer<LOG_SIZE>,
    /// Bytes the remote master still wants to read from us.
    slave_tx_wanted: usize,
    slave_sent: SimLog<LOG_SIZE>,
    stops: usize,
    /// START conditions never complete, as with a slave holding SCL low.
    start_stalled: bool,
}

pub struct SimI2c {
    state: SpinLock<State>,
}

impl SimI2c {
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(State {
                config: None,
                bring_ups: 0,
                fail_bring_up: false,
                enabled: false,
                interrupts: false,
                listening: false,
                ack: true,
                flags: I2cFlags::empty(),
                bus: Bus::Idle,
                targets: [None; MAX_TARGETS],
                written: SimLog::new(),
                slave_rx: RingBuffer::new(),
                slave_tx_wanted: 0,
                slave_sent: SimLog::new(),
                stops: 0,
                start_stalled: false,
            }),
        }
    }

    /// Put a memory device at `address` on the bus, with a register address
    /// of `pointer_bytes` bytes. Returns `false` when the bus is full.
    pub fn attach(&self, address: u16, pointer_bytes: usize) -> bool {
        let mut state = self.state.lock();
        let Some(slot) = state.targets.iter_mut().find(|slot| {
            slot.is_none_or(|target| target.address == address)
        }) else {
            return false;
        };
        *slot = Some(Target {
            address,
            pointer_bytes,
            pointer: 0,
            memory: [0; MEMORY_SIZE],
        });
        true
    }

    /// Copy of the memory of the device at `address`.
    pub fn memory(&self, address: u16) -> Option<[u8; MEMORY_SIZE]> {
        let state = self.state.lock();
        state
            .targets
            .iter()
            .flatten()
            .find(|target| target.address == address)
            .map(|target| target.memory)
    }

    /// Preload memory of the device at `address`.
    pub fn write_memory(&self, address: u16, offset: usize, bytes: &[u8]) {
        let mut state = self.state.lock();
        if let Some(target) = state
            .targets
            .iter_mut()
            .flatten()
            .find(|target| target.address == address)
        {
            for (index, &byte) in bytes.iter().enumerate() {
                target.memory[(offset + index) % MEMORY_SIZE] = byte;
            }
        }
    }

    pub fn fail_next_bring_up(&self) {
        self.state.lock().fail_bring_up = true;
    }

    pub fn set_start_stalled(&self, stalled: bool) {
        self.state.lock().start_stalled = stalled;
    }

    pub fn inject_flags(&self, flags: I2cFlags) {
        self.state.lock().flags |= flags;
    }

    /// A remote master addresses us and writes `bytes`.
    pub fn remote_write(&self, bytes: &[u8], general_call: bool) {
        let mut state = self.state.lock();
        state.bus = Bus::SlaveReceive;
        for &byte in bytes {
            state.slave_rx.enqueue(byte).ok();
        }
        state.flags.remove(I2cFlags::TRANSMITTER);
        state.flags |= I2cFlags::ADDRESS_MATCHED;
        state.flags.set(I2cFlags::GENERAL_CALL, general_call);
        state.flags.set(I2cFlags::RX_NOT_EMPTY, !bytes.is_empty());
    }

    /// A remote master addresses us and reads `count` bytes.
    pub fn remote_read(&self, count: usize) {
        let mut state = self.state.lock();
        state.bus = Bus::SlaveTransmit;
        state.slave_tx_wanted = count;
        state.flags |= I2cFlags::ADDRESS_MATCHED | I2cFlags::TRANSMITTER | I2cFlags::TX_EMPTY;
    }

    /// The remote master ends its transfer with STOP.
    pub fn remote_stop(&self) {
        let mut state = self.state.lock();
        state.bus = Bus::Idle;
        state.flags.remove(I2cFlags::TX_EMPTY | I2cFlags::RX_NOT_EMPTY | I2cFlags::TRANSMITTER);
        state.flags |= I2cFlags::STOP_DETECTED;
    }

    pub fn written(&self) -> SimLog<LOG_SIZE> {
        self.state.lock().written
    }

    pub fn slave_sent(&self) -> SimLog<LOG_SIZE> {
        self.state.lock().slave_sent
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().listening
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.state.lock().interrupts
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn config(&self) -> Option<I2cConfig> {
        self.state.lock().config
    }

    pub fn bring_up_count(&self) -> usize {
        self.state.lock().bring_ups
    }
}

impl Default for SimI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cBackend for SimI2c {
    fn bring_up(&self, _binding: &HardwareBinding, config: &I2cConfig) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.bring_ups += 1;
        if core::mem::take(&mut state.fail_bring_up) {
            return Err(BackendError::Rejected);
        }
        state.config = Some(*config);
        state.flags = I2cFlags::empty();
        state.bus = Bus::Idle;
        state.ack = true;
        state.written.clear();
        state.slave_rx.reset();
        state.slave_tx_wanted = 0;
        state.slave_sent.clear();
        state.start_stalled = false;
        Ok(())
    }

    fn tear_down(&self, _binding: &HardwareBinding) {
        let mut state = self.state.lock();
        state.config = None;
        state.enabled = false;
        state.interrupts = false;
        state.listening = false;
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    fn set_interrupts(&self, enabled: bool) {
        self.state.lock().interrupts = enabled;
    }

    fn set_listen(&self, enabled: bool) {
        self.state.lock().listening = enabled;
    }

    fn flags(&self) -> I2cFlags {
        self.state.lock().flags
    }

    fn clear_flags(&self, flags: I2cFlags) {
        self.state.lock().flags.remove(flags);
    }

    fn generate_start(&self) {
        let mut state = self.state.lock();
        state.bus = Bus::Start;
        state.flags.remove(I2cFlags::ADDRESS_SENT | I2cFlags::TX_EMPTY | I2cFlags::RX_NOT_EMPTY);
        if !state.start_stalled {
            state.flags |= I2cFlags::START_SENT;
        }
    }

    fn generate_stop(&self) {
        let mut state = self.state.lock();
        state.bus = Bus::Idle;
        state.stops += 1;
        state.flags.remove(
            I2cFlags::START_SENT
                | I2cFlags::ADDRESS_SENT
                | I2cFlags::TX_EMPTY
                | I2cFlags::RX_NOT_EMPTY,
        );
    }

    fn send_address(&self, address: u16, read: bool) {
        let mut state = self.state.lock();
        state.flags.remove(I2cFlags::START_SENT);
        if state.bus != Bus::Start {
            state.flags |= I2cFlags::BUS_ERROR;
            return;
        }
        let address = address & 0x03FF;
        let found = state
            .targets
            .iter()
            .position(|slot| slot.is_some_and(|target| target.address == address));
        match found {
            Some(target) => {
                state.flags |= I2cFlags::ADDRESS_SENT;
                if read {
                    state.bus = Bus::MasterRead { target };
                    state.flags |= I2cFlags::RX_NOT_EMPTY;
                } else {
                    state.bus = Bus::MasterWrite {
                        target,
                        pointer_bytes: 0,
                    };
                    state.flags |= I2cFlags::TX_EMPTY;
                }
            }
            None => {
                state.bus = Bus::Idle;
                state.flags |= I2cFlags::ACK_FAILURE;
            }
        }
    }

    fn write_byte(&self, byte: u8) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.bus {
            Bus::MasterWrite {
                target,
                pointer_bytes,
            } => {
                state.written.push(u16::from(byte));
                let Some(device) = state.targets[target].as_mut() else {
                    return;
                };
                if pointer_bytes < device.pointer_bytes {
                    device.pointer = ((device.pointer << 8) | usize::from(byte)) % MEMORY_SIZE;
                    state.bus = Bus::MasterWrite {
                        target,
                        pointer_bytes: pointer_bytes + 1,
                    };
                } else {
                    device.memory[device.pointer] = byte;
                    device.pointer = (device.pointer + 1) % MEMORY_SIZE;
                }
            }
            Bus::SlaveTransmit => {
                state.slave_sent.push(u16::from(byte));
                state.slave_tx_wanted = state.slave_tx_wanted.saturating_sub(1);
                if state.slave_tx_wanted == 0 {
                    // The master NACKs the last byte it wants.
                    state.flags.remove(I2cFlags::TX_EMPTY);
                    state.flags |= I2cFlags::ACK_FAILURE;
                }
            }
            _ => {}
        }
    }

    fn read_byte(&self) -> u8 {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.bus {
            Bus::MasterRead { target } => {
                let Some(device) = state.targets[target].as_mut() else {
                    return 0;
                };
                let byte = device.memory[device.pointer];
                device.pointer = (device.pointer + 1) % MEMORY_SIZE;
                if !state.ack {
                    state.flags.remove(I2cFlags::RX_NOT_EMPTY);
                }
                byte
            }
            Bus::SlaveReceive => {
                let byte = state.slave_rx.dequeue().unwrap_or(0);
                if state.slave_rx.is_empty() {
                    state.flags.remove(I2cFlags::RX_NOT_EMPTY);
                }
                byte
            }
            _ => 0,
        }
    }

    fn set_ack(&self, ack: bool) {
        self.state.lock().ack = ack;
    }
}
