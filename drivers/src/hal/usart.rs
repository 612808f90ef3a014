//! USART Hardware Abstraction Layer.
//!
//! Configuration, status, error and event types of the USART driver object,
//! plus [`UsartBackend`], the register-level interface it drives.

use bitflags::bitflags;

use super::dma::{DmaEvents, Direction};
use crate::driver::{DispatchMode, EventCallback, FrameFormat};
use crate::error::BackendError;
use crate::registry::HardwareBinding;

/// USART configuration.
#[derive(Debug, Copy, Clone)]
pub struct UsartConfig {
    pub mode: UsartMode,
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Number of data bits per frame, parity bit included.
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Consumer of [`UsartEvent`]s. Runs in interrupt context unless
    /// `dispatch` is [`DispatchMode::Deferred`].
    pub event_callback: Option<EventCallback<UsartEvent>>,
    pub dispatch: DispatchMode,
}

impl UsartConfig {
    /// Create a standard 8N1 configuration at the specified baud rate.
    ///
    /// 8N1 means: 8 data bits, no parity, 1 stop bit.
    pub const fn new_8n1(baud_rate: u32) -> Self {
        Self {
            mode: UsartMode::Uart,
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            event_callback: None,
            dispatch: DispatchMode::Immediate,
        }
    }

    pub const fn with_callback(mut self, callback: EventCallback<UsartEvent>) -> Self {
        self.event_callback = Some(callback);
        self
    }

    pub const fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// The configuration actually programmed into hardware.
    ///
    /// Half stop bits are not supported by the backends and fall back to one.
    pub fn programmed(&self) -> Self {
        let stop_bits = match self.stop_bits {
            StopBits::Half | StopBits::OneAndHalf => StopBits::One,
            other => other,
        };
        Self { stop_bits, ..*self }
    }

    /// How a frame maps onto caller buffers.
    ///
    /// Nine data bits without parity need two bytes per frame. A parity bit
    /// takes the top data bit and is masked off on reception.
    pub fn frame_format(&self) -> FrameFormat {
        match (self.data_bits, self.parity) {
            (DataBits::Nine, Parity::None) => FrameFormat::new(2, 0x01FF),
            (DataBits::Nine, _) => FrameFormat::new(1, 0x00FF),
            (DataBits::Eight, Parity::None) => FrameFormat::new(1, 0x00FF),
            (DataBits::Eight, _) => FrameFormat::new(1, 0x007F),
        }
    }
}

impl Default for UsartConfig {
    /// Default configuration: 115200 baud, 8N1.
    fn default() -> Self {
        Self::new_8n1(115_200)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsartMode {
    /// Asynchronous full-duplex UART.
    Uart,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataBits {
    Eight,
    Nine,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopBits {
    Half,
    One,
    OneAndHalf,
    Two,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Rts,
    Cts,
    RtsCts,
}

impl FlowControl {
    pub const fn uses_cts(self) -> bool {
        matches!(self, Self::Cts | Self::RtsCts)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct UsartStatus: u32 {
        const INITIALIZED = 1 << 0;
        const TX_BUSY = 1 << 1;
        const RX_BUSY = 1 << 2;
    }

    /// Sticky error bits, cleared when the next reception starts.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct UsartErrors: u32 {
        const RX_OVERFLOW = 1 << 0;
        const RX_BREAK = 1 << 1;
        const RX_FRAMING_ERROR = 1 << 2;
        const RX_PARITY_ERROR = 1 << 3;
        const DMA_FAULT = 1 << 4;
    }

    /// Conditions delivered to the event callback.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct UsartEvent: u32 {
        const INITIALIZED = 1 << 0;
        /// Last frame of a `send` handed to the transmitter.
        const SEND_COMPLETE = 1 << 1;
        /// Requested number of frames received.
        const RECEIVE_COMPLETE = 1 << 2;
        /// Transmitter shift register drained.
        const TX_COMPLETE = 1 << 3;
        const RX_OVERFLOW = 1 << 4;
        /// Receive line went idle.
        const RX_TIMEOUT = 1 << 5;
        const RX_BREAK = 1 << 6;
        const RX_FRAMING_ERROR = 1 << 7;
        const RX_PARITY_ERROR = 1 << 8;
        const CTS = 1 << 9;
        /// Reception ended by an error before all frames arrived.
        const RECEIVE_INCOMPLETE = 1 << 10;
        /// First half of a circular DMA reception filled.
        const RECEIVE_HALF_COMPLETE = 1 << 11;
        const DMA_FAULT = 1 << 12;
    }

    /// Hardware status flags, also used as interrupt source enables.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct UsartFlags: u32 {
        const RX_NOT_EMPTY = 1 << 0;
        const TX_EMPTY = 1 << 1;
        const TX_COMPLETE = 1 << 2;
        const IDLE = 1 << 3;
        const OVERRUN = 1 << 4;
        const FRAMING_ERROR = 1 << 5;
        const PARITY_ERROR = 1 << 6;
        const BREAK = 1 << 7;
        const CTS = 1 << 8;

        const FAULTS = Self::OVERRUN.bits()
            | Self::FRAMING_ERROR.bits()
            | Self::PARITY_ERROR.bits()
            | Self::BREAK.bits();
    }
}

impl UsartFlags {
    /// Sticky error and event bits for the fault flags present in `self`.
    pub fn faults(self) -> (UsartErrors, UsartEvent) {
        let mut errors = UsartErrors::empty();
        let mut events = UsartEvent::empty();
        if self.contains(Self::OVERRUN) {
            errors |= UsartErrors::RX_OVERFLOW;
            events |= UsartEvent::RX_OVERFLOW;
        }
        if self.contains(Self::FRAMING_ERROR) {
            errors |= UsartErrors::RX_FRAMING_ERROR;
            events |= UsartEvent::RX_FRAMING_ERROR;
        }
        if self.contains(Self::PARITY_ERROR) {
            errors |= UsartErrors::RX_PARITY_ERROR;
            events |= UsartEvent::RX_PARITY_ERROR;
        }
        if self.contains(Self::BREAK) {
            errors |= UsartErrors::RX_BREAK;
            events |= UsartEvent::RX_BREAK;
        }
        (errors, events)
    }
}

/// Register-level USART operations.
///
/// One backend value drives one peripheral instance. Methods take `&self`
/// because they are called from both task and interrupt context; they must
/// be short and must not block.
pub trait UsartBackend: Sync {
    /// Enable clocks, route pins, program the frame format and enable the
    /// error interrupts.
    fn bring_up(&self, binding: &HardwareBinding, config: &UsartConfig) -> Result<(), BackendError>;

    /// Undo [`UsartBackend::bring_up`].
    fn tear_down(&self, binding: &HardwareBinding);

    fn set_enabled(&self, enabled: bool);

    fn flags(&self) -> UsartFlags;

    fn clear_flags(&self, flags: UsartFlags);

    /// Interrupt sources currently enabled.
    fn sources(&self) -> UsartFlags;

    fn enable_sources(&self, sources: UsartFlags);

    fn disable_sources(&self, sources: UsartFlags);

    /// Read the received frame, clearing `RX_NOT_EMPTY`.
    fn read_frame(&self) -> u16;

    /// Hand a frame to the transmitter.
    fn write_frame(&self, frame: u16);

    /// Arm the DMA stream bound to `direction` for `len` bytes at `address`.
    fn start_dma(
        &self,
        direction: Direction,
        address: usize,
        len: usize,
        circular: bool,
    ) -> Result<(), BackendError>;

    fn stop_dma(&self, direction: Direction);

    /// Read and clear the latched DMA events of `direction`.
    fn take_dma_events(&self, direction: Direction) -> DmaEvents;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_stop_bits_fall_back_to_one() {
        let mut config = UsartConfig::new_8n1(9600);
        config.stop_bits = StopBits::Half;
        assert_eq!(config.programmed().stop_bits, StopBits::One);
        config.stop_bits = StopBits::OneAndHalf;
        assert_eq!(config.programmed().stop_bits, StopBits::One);
        config.stop_bits = StopBits::Two;
        assert_eq!(config.programmed().stop_bits, StopBits::Two);
    }

    #[test]
    fn test_frame_format() {
        let mut config = UsartConfig::default();
        assert_eq!(config.frame_format(), FrameFormat::new(1, 0xFF));
        config.parity = Parity::Even;
        assert_eq!(config.frame_format(), FrameFormat::new(1, 0x7F));
        config.data_bits = DataBits::Nine;
        config.parity = Parity::None;
        assert_eq!(config.frame_format(), FrameFormat::new(2, 0x1FF));
    }

    #[test]
    fn test_fault_mapping() {
        let (errors, events) = (UsartFlags::FRAMING_ERROR | UsartFlags::OVERRUN).faults();
        assert_eq!(errors, UsartErrors::RX_FRAMING_ERROR | UsartErrors::RX_OVERFLOW);
        assert_eq!(events, UsartEvent::RX_FRAMING_ERROR | UsartEvent::RX_OVERFLOW);
    }
}
