//! SPI Hardware Abstraction Layer.

use bitflags::bitflags;

use crate::driver::{DispatchMode, EventCallback, FrameFormat};
use crate::error::BackendError;
use crate::registry::HardwareBinding;

/// Frame clocked out by `receive`, which has no transmit data of its own.
pub const DUMMY_FRAME: u16 = 0xFFFF;

#[derive(Debug, Copy, Clone)]
pub struct SpiConfig {
    pub role: Role,
    pub lines: BusLines,
    pub polarity: Polarity,
    pub phase: Phase,
    /// Bits per frame, 4..=16.
    pub data_size: u8,
    pub bit_order: BitOrder,
    pub slave_select: SlaveSelect,
    pub frame_format: FrameProtocol,
    /// Requested SCK frequency; the backend picks the closest divider below.
    pub frequency: u32,
    pub event_callback: Option<EventCallback<SpiEvent>>,
    pub dispatch: DispatchMode,
}

impl SpiConfig {
    /// Master, mode 0, 8-bit frames, MSB first, software slave select.
    pub const fn master(frequency: u32) -> Self {
        Self {
            role: Role::Master,
            lines: BusLines::FullDuplex,
            polarity: Polarity::IdleLow,
            phase: Phase::CaptureOnFirstTransition,
            data_size: 8,
            bit_order: BitOrder::MsbFirst,
            slave_select: SlaveSelect::Software,
            frame_format: FrameProtocol::Motorola,
            frequency,
            event_callback: None,
            dispatch: DispatchMode::Immediate,
        }
    }

    pub const fn with_mode(mut self, polarity: Polarity, phase: Phase) -> Self {
        self.polarity = polarity;
        self.phase = phase;
        self
    }

    pub const fn with_data_size(mut self, bits: u8) -> Self {
        self.data_size = bits;
        self
    }

    pub const fn with_callback(mut self, callback: EventCallback<SpiEvent>) -> Self {
        self.event_callback = Some(callback);
        self
    }

    pub const fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub const fn is_valid(&self) -> bool {
        self.data_size >= 4 && self.data_size <= 16 && self.frequency > 0
    }

    /// Frames wider than eight bits take two bytes of the caller's buffer.
    pub fn frame_format(&self) -> FrameFormat {
        let mask = ((1u32 << self.data_size) - 1) as u16;
        if self.data_size > 8 {
            FrameFormat::new(2, mask)
        } else {
            FrameFormat::new(1, mask)
        }
    }
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self::master(1_000_000)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusLines {
    /// Separate MOSI and MISO.
    FullDuplex,
    /// One bidirectional data line.
    HalfDuplex,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Polarity {
    IdleLow,
    IdleHigh,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    CaptureOnFirstTransition,
    CaptureOnSecondTransition,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlaveSelect {
    None,
    Software,
    HardwareInput,
    HardwareOutput,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameProtocol {
    Motorola,
    Ti,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SpiStatus: u32 {
        const INITIALIZED = 1 << 0;
        const BUSY = 1 << 1;
    }

    /// Sticky error bits, cleared when the next transfer starts.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SpiErrors: u32 {
        const DATA_LOST = 1 << 0;
        const MODE_FAULT = 1 << 1;
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SpiEvent: u32 {
        const INITIALIZED = 1 << 0;
        const TRANSFER_COMPLETE = 1 << 1;
        /// Received data was overwritten before it was read.
        const DATA_LOST = 1 << 2;
        /// Another master drove slave select.
        const MODE_FAULT = 1 << 3;
    }

    /// Hardware status flags, also used as interrupt source enables.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SpiFlags: u32 {
        const RX_NOT_EMPTY = 1 << 0;
        const TX_EMPTY = 1 << 1;
        const OVERRUN = 1 << 2;
        const MODE_FAULT = 1 << 3;
        /// Shift register active.
        const BUSY = 1 << 4;

        const FAULTS = Self::OVERRUN.bits() | Self::MODE_FAULT.bits();
    }
}

/// Register-level SPI operations.
pub trait SpiBackend: Sync {
    fn bring_up(&self, binding: &HardwareBinding, config: &SpiConfig) -> Result<(), BackendError>;

    fn tear_down(&self, binding: &HardwareBinding);

    fn set_enabled(&self, enabled: bool);

    fn flags(&self) -> SpiFlags;

    fn clear_flags(&self, flags: SpiFlags);

    fn sources(&self) -> SpiFlags;

    fn enable_sources(&self, sources: SpiFlags);

    fn disable_sources(&self, sources: SpiFlags);

    fn read_frame(&self) -> u16;

    fn write_frame(&self, frame: u16);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(SpiConfig::default().is_valid());
        assert!(!SpiConfig::default().with_data_size(3).is_valid());
        assert!(!SpiConfig::default().with_data_size(17).is_valid());
        assert!(!SpiConfig::master(0).is_valid());
    }

    #[test]
    fn test_wide_frames_take_two_bytes() {
        assert_eq!(SpiConfig::default().frame_format(), FrameFormat::new(1, 0xFF));
        assert_eq!(
            SpiConfig::default().with_data_size(12).frame_format(),
            FrameFormat::new(2, 0x0FFF)
        );
    }
}
