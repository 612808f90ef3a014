//! I2C Hardware Abstraction Layer.
//!
//! Configuration, status, error and event types of the I2C driver object,
//! plus [`I2cBackend`], the bus-phase level interface it drives.

use bitflags::bitflags;

use crate::driver::{DispatchMode, EventCallback};
use crate::error::BackendError;
use crate::registry::HardwareBinding;

/// Marks a 10-bit address in the `addr` argument of master operations.
pub const TEN_BIT_ADDRESS_FLAG: u16 = 0x0400;
/// Marks the general call address.
pub const GENERAL_CALL_FLAG: u16 = 0x8000;
/// Largest plain address value; anything above it is not an address.
pub const MAX_ADDRESS: u16 = 0x03FF;

/// Whether `addr` carries only address bits and the two marker flags.
pub const fn is_valid_address(addr: u16) -> bool {
    addr & !(TEN_BIT_ADDRESS_FLAG | GENERAL_CALL_FLAG) <= MAX_ADDRESS
}

#[derive(Debug, Copy, Clone)]
pub struct I2cConfig {
    pub bus_speed: BusSpeed,
    /// Address answered in slave mode.
    pub own_address: u16,
    pub own_address_bits: AddressBits,
    pub event_callback: Option<EventCallback<I2cEvent>>,
    pub dispatch: DispatchMode,
}

impl I2cConfig {
    pub const fn new(bus_speed: BusSpeed) -> Self {
        Self {
            bus_speed,
            own_address: 0,
            own_address_bits: AddressBits::Seven,
            event_callback: None,
            dispatch: DispatchMode::Immediate,
        }
    }

    pub const fn with_own_address(mut self, address: u16, bits: AddressBits) -> Self {
        self.own_address = address;
        self.own_address_bits = bits;
        self
    }

    pub const fn with_callback(mut self, callback: EventCallback<I2cEvent>) -> Self {
        self.event_callback = Some(callback);
        self
    }

    pub const fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self::new(BusSpeed::Standard)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusSpeed {
    /// 100 kHz.
    Standard,
    /// 400 kHz.
    Fast,
    /// 1 MHz.
    FastPlus,
    /// 3.4 MHz.
    High,
}

impl BusSpeed {
    pub const fn hz(self) -> u32 {
        match self {
            Self::Standard => 100_000,
            Self::Fast => 400_000,
            Self::FastPlus => 1_000_000,
            Self::High => 3_400_000,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressBits {
    Seven,
    Ten,
}

/// Width of the register address sent before memory reads and writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemAddressSize {
    Bits8,
    Bits16,
}

impl MemAddressSize {
    /// Address bytes in transmission order.
    pub fn encode(self, mem_addr: u16) -> ([u8; 2], usize) {
        match self {
            Self::Bits8 => ([mem_addr as u8, 0], 1),
            Self::Bits16 => (mem_addr.to_be_bytes(), 2),
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct I2cStatus: u32 {
        const INITIALIZED = 1 << 0;
        /// A transfer owns the bus.
        const BUSY = 1 << 1;
        /// The last slave addressing was a general call.
        const GENERAL_CALL = 1 << 2;
    }

    /// Sticky error bits, cleared when the next transfer starts.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct I2cErrors: u32 {
        const BUS_ERROR = 1 << 0;
        const ARBITRATION_LOST = 1 << 1;
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct I2cEvent: u32 {
        const INITIALIZED = 1 << 0;
        const TRANSFER_COMPLETE = 1 << 1;
        /// The transfer ended before all bytes moved.
        const TRANSFER_INCOMPLETE = 1 << 2;
        const GENERAL_CALL = 1 << 3;
        /// A master wants to read from us and no slave transfer is armed.
        const SLAVE_TRANSMIT = 1 << 4;
        /// A master wants to write to us and no slave transfer is armed.
        const SLAVE_RECEIVE = 1 << 5;
        const BUS_ERROR = 1 << 6;
        const ARBITRATION_LOST = 1 << 7;
        /// The addressed device did not acknowledge its address.
        const ADDRESS_NACK = 1 << 8;
    }

    /// Bus conditions reported by the backend.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct I2cFlags: u32 {
        /// START (or repeated START) generated, address expected.
        const START_SENT = 1 << 0;
        /// Our address phase was acknowledged.
        const ADDRESS_SENT = 1 << 1;
        /// Slave mode: our own address was matched.
        const ADDRESS_MATCHED = 1 << 2;
        const TX_EMPTY = 1 << 3;
        const RX_NOT_EMPTY = 1 << 4;
        /// Slave mode: the master ended the transfer with STOP.
        const STOP_DETECTED = 1 << 5;
        /// Slave mode: the master is reading.
        const TRANSMITTER = 1 << 6;
        /// Slave mode: the match was on the general call address.
        const GENERAL_CALL = 1 << 7;
        const BUS_ERROR = 1 << 8;
        const ARBITRATION_LOST = 1 << 9;
        const ACK_FAILURE = 1 << 10;
        const OVERRUN = 1 << 11;

        const FAULTS = Self::BUS_ERROR.bits()
            | Self::ARBITRATION_LOST.bits()
            | Self::ACK_FAILURE.bits()
            | Self::OVERRUN.bits();
    }
}

/// Bus-phase level I2C operations.
///
/// The backend owns START/address/STOP signalling and acknowledgment; the
/// driver object decides when each happens and moves the data bytes.
pub trait I2cBackend: Sync {
    fn bring_up(&self, binding: &HardwareBinding, config: &I2cConfig) -> Result<(), BackendError>;

    fn tear_down(&self, binding: &HardwareBinding);

    fn set_enabled(&self, enabled: bool);

    /// Enable or disable event, buffer and error interrupts together.
    fn set_interrupts(&self, enabled: bool);

    /// Answer our own address (and the general call address) in slave mode.
    fn set_listen(&self, enabled: bool);

    fn flags(&self) -> I2cFlags;

    fn clear_flags(&self, flags: I2cFlags);

    fn generate_start(&self);

    fn generate_stop(&self);

    /// Send the address phase after a START.
    fn send_address(&self, address: u16, read: bool);

    fn write_byte(&self, byte: u8);

    fn read_byte(&self) -> u8;

    /// Acknowledge (`true`) or NACK (`false`) the next received byte.
    fn set_ack(&self, ack: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(0x50));
        assert!(is_valid_address(0x3FF | TEN_BIT_ADDRESS_FLAG));
        assert!(is_valid_address(GENERAL_CALL_FLAG));
        assert!(!is_valid_address(0x0800));
        assert!(!is_valid_address(0x1000 | 0x50));
    }

    #[test]
    fn test_mem_address_encoding() {
        assert_eq!(MemAddressSize::Bits8.encode(0x1234), ([0x34, 0], 1));
        assert_eq!(MemAddressSize::Bits16.encode(0x1234), ([0x12, 0x34], 2));
    }
}
