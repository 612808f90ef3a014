//! Device Registry
//!
//! Maps peripheral identifiers to the immutable description of the hardware
//! behind them: register block, interrupt lines, DMA streams and pins.
//! Board support code builds one [`DeviceRegistry`] per peripheral kind in a
//! `static`; nothing in it changes after link time.

use core::fmt;

use crate::hal::interrupt::{IrqNumber, Priority};

/// Stable handle naming one configured peripheral instance.
pub trait PeripheralId: Copy + Eq + fmt::Debug + 'static {
    /// Number of configured instances of this kind.
    const COUNT: usize;

    /// Slot of this instance in per-kind arrays.
    fn index(self) -> usize;

    fn from_index(index: usize) -> Option<Self>;
}

macro_rules! peripheral_ids {
    ($($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? })+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
            #[repr(u8)]
            pub enum $name {
                $($variant),+
            }

            impl $name {
                pub const ALL: &'static [Self] = &[$(Self::$variant),+];
            }

            impl PeripheralId for $name {
                const COUNT: usize = Self::ALL.len();

                fn index(self) -> usize {
                    self as usize
                }

                fn from_index(index: usize) -> Option<Self> {
                    Self::ALL.get(index).copied()
                }
            }
        )+
    };
}

peripheral_ids! {
    /// USART instances.
    UsartId { Usart1, Usart2, Usart3 }
    /// I2C instances.
    I2cId { I2c1, I2c2, I2c3 }
    /// SPI instances.
    SpiId { Spi1, Spi2, Spi3 }
    /// USB PHY instances.
    UsbId { OtgFs, OtgHs }
}

pub const USART_COUNT: usize = UsartId::COUNT;
pub const I2C_COUNT: usize = I2cId::COUNT;
pub const SPI_COUNT: usize = SpiId::COUNT;
pub const USB_COUNT: usize = UsbId::COUNT;

/// An interrupt line and the priority it is installed with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IrqLine {
    pub number: IrqNumber,
    pub priority: Priority,
}

impl IrqLine {
    pub const fn new(number: IrqNumber, priority: Priority) -> Self {
        Self { number, priority }
    }
}

/// A DMA stream serving one direction of a peripheral.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmaBinding {
    pub controller: u8,
    pub stream: u8,
    pub channel: u8,
    pub irq: IrqLine,
    /// Restart automatically at the end of the buffer.
    pub circular: bool,
}

/// A pin routed to the peripheral.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PinBinding {
    /// GPIO port letter.
    pub port: char,
    pub pin: u8,
    /// Alternate function number.
    pub alternate: u8,
}

impl PinBinding {
    pub const fn new(port: char, pin: u8, alternate: u8) -> Self {
        Self {
            port,
            pin,
            alternate,
        }
    }
}

/// Which part of a peripheral an interrupt line belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IrqSource {
    Peripheral,
    Error,
    DmaTx,
    DmaRx,
}

/// Immutable description of one peripheral instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HardwareBinding {
    pub name: &'static str,
    /// Register block base address.
    pub base: usize,
    pub irq: IrqLine,
    /// Separate error line, for peripherals that have one.
    pub error_irq: Option<IrqLine>,
    pub dma_tx: Option<DmaBinding>,
    pub dma_rx: Option<DmaBinding>,
    pub pins: &'static [PinBinding],
}

impl HardwareBinding {
    pub const fn new(name: &'static str, base: usize, irq: IrqLine) -> Self {
        Self {
            name,
            base,
            irq,
            error_irq: None,
            dma_tx: None,
            dma_rx: None,
            pins: &[],
        }
    }

    pub const fn with_error_irq(mut self, irq: IrqLine) -> Self {
        self.error_irq = Some(irq);
        self
    }

    pub const fn with_dma_tx(mut self, dma: DmaBinding) -> Self {
        self.dma_tx = Some(dma);
        self
    }

    pub const fn with_dma_rx(mut self, dma: DmaBinding) -> Self {
        self.dma_rx = Some(dma);
        self
    }

    pub const fn with_pins(mut self, pins: &'static [PinBinding]) -> Self {
        self.pins = pins;
        self
    }

    /// Every interrupt line the instance uses, tagged with its source.
    pub fn irq_lines(&self) -> impl Iterator<Item = (IrqSource, IrqLine)> + '_ {
        [
            Some((IrqSource::Peripheral, self.irq)),
            self.error_irq.map(|line| (IrqSource::Error, line)),
            self.dma_tx.map(|dma| (IrqSource::DmaTx, dma.irq)),
            self.dma_rx.map(|dma| (IrqSource::DmaRx, dma.irq)),
        ]
        .into_iter()
        .flatten()
    }

    pub fn source_of(&self, irq: IrqNumber) -> Option<IrqSource> {
        self.irq_lines()
            .find(|(_, line)| line.number == irq)
            .map(|(source, _)| source)
    }
}

/// Lookup table from identifier to hardware binding for one peripheral kind.
pub struct DeviceRegistry<const N: usize> {
    bindings: [HardwareBinding; N],
}

impl<const N: usize> DeviceRegistry<N> {
    pub const fn new(bindings: [HardwareBinding; N]) -> Self {
        Self { bindings }
    }

    /// Binding of `id`.
    ///
    /// # Panics
    ///
    /// If `id` has no entry, which means the registry was built for a
    /// different peripheral kind.
    pub fn lookup<I: PeripheralId>(&self, id: I) -> &HardwareBinding {
        match self.bindings.get(id.index()) {
            Some(binding) => binding,
            None => panic!("{:?} has no hardware binding", id),
        }
    }

    /// Find the instance and source an interrupt line belongs to.
    pub fn route(&self, irq: IrqNumber) -> Option<(usize, IrqSource)> {
        self.bindings
            .iter()
            .enumerate()
            .find_map(|(index, binding)| binding.source_of(irq).map(|source| (index, source)))
    }
}
