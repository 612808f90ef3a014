//! Reference board: the peripheral map of an STM32F4-class part.
//!
//! USART1 moves both directions by DMA, USART2 is interrupt driven and
//! USART3 receives into a circular DMA buffer.

use crate::hal::interrupt::IrqNumber;
use crate::registry::{
    DeviceRegistry, DmaBinding, HardwareBinding, I2C_COUNT, IrqLine, PinBinding, SPI_COUNT,
    USART_COUNT, USB_COUNT,
};

pub const USART1_IRQ: IrqNumber = 37;
pub const USART2_IRQ: IrqNumber = 38;
pub const USART3_IRQ: IrqNumber = 39;
pub const DMA1_STREAM1_IRQ: IrqNumber = 12;
pub const DMA2_STREAM2_IRQ: IrqNumber = 58;
pub const DMA2_STREAM7_IRQ: IrqNumber = 70;

pub const I2C1_EV_IRQ: IrqNumber = 31;
pub const I2C1_ER_IRQ: IrqNumber = 32;
pub const I2C2_EV_IRQ: IrqNumber = 33;
pub const I2C2_ER_IRQ: IrqNumber = 34;
pub const I2C3_EV_IRQ: IrqNumber = 72;
pub const I2C3_ER_IRQ: IrqNumber = 73;

pub const SPI1_IRQ: IrqNumber = 35;
pub const SPI2_IRQ: IrqNumber = 36;
pub const SPI3_IRQ: IrqNumber = 51;

pub const OTG_FS_IRQ: IrqNumber = 67;
pub const OTG_HS_IRQ: IrqNumber = 77;

const SERIAL_PRIORITY: u8 = 5;
const DMA_PRIORITY: u8 = 6;
const BUS_PRIORITY: u8 = 4;

const USART1_PINS: [PinBinding; 2] = [PinBinding::new('A', 9, 7), PinBinding::new('A', 10, 7)];
const USART2_PINS: [PinBinding; 2] = [PinBinding::new('A', 2, 7), PinBinding::new('A', 3, 7)];
const USART3_PINS: [PinBinding; 2] = [PinBinding::new('B', 10, 7), PinBinding::new('B', 11, 7)];
const I2C1_PINS: [PinBinding; 2] = [PinBinding::new('B', 6, 4), PinBinding::new('B', 7, 4)];
const I2C2_PINS: [PinBinding; 2] = [PinBinding::new('F', 1, 4), PinBinding::new('F', 0, 4)];
const I2C3_PINS: [PinBinding; 2] = [PinBinding::new('A', 8, 4), PinBinding::new('C', 9, 4)];
const SPI1_PINS: [PinBinding; 3] = [PinBinding::new('A', 5, 5), PinBinding::new('A', 6, 5), PinBinding::new('A', 7, 5)];
const SPI2_PINS: [PinBinding; 3] = [PinBinding::new('B', 13, 5), PinBinding::new('B', 14, 5), PinBinding::new('B', 15, 5)];
const SPI3_PINS: [PinBinding; 3] = [PinBinding::new('C', 10, 6), PinBinding::new('C', 11, 6), PinBinding::new('C', 12, 6)];
const OTG_FS_PINS: [PinBinding; 2] = [PinBinding::new('A', 11, 10), PinBinding::new('A', 12, 10)];
const OTG_HS_PINS: [PinBinding; 2] = [PinBinding::new('B', 14, 12), PinBinding::new('B', 15, 12)];

pub static USARTS: DeviceRegistry<USART_COUNT> = DeviceRegistry::new([
    HardwareBinding::new("usart1", 0x4001_1000, IrqLine::new(USART1_IRQ, SERIAL_PRIORITY))
        .with_dma_tx(DmaBinding {
            controller: 2,
            stream: 7,
            channel: 4,
            irq: IrqLine::new(DMA2_STREAM7_IRQ, DMA_PRIORITY),
            circular: false,
        })
        .with_dma_rx(DmaBinding {
            controller: 2,
            stream: 2,
            channel: 4,
            irq: IrqLine::new(DMA2_STREAM2_IRQ, DMA_PRIORITY),
            circular: false,
        })
        .with_pins(&USART1_PINS),
    HardwareBinding::new("usart2", 0x4000_4400, IrqLine::new(USART2_IRQ, SERIAL_PRIORITY))
        .with_pins(&USART2_PINS),
    HardwareBinding::new("usart3", 0x4000_4800, IrqLine::new(USART3_IRQ, SERIAL_PRIORITY))
        .with_dma_rx(DmaBinding {
            controller: 1,
            stream: 1,
            channel: 4,
            irq: IrqLine::new(DMA1_STREAM1_IRQ, DMA_PRIORITY),
            circular: true,
        })
        .with_pins(&USART3_PINS),
]);

pub static I2CS: DeviceRegistry<I2C_COUNT> = DeviceRegistry::new([
    HardwareBinding::new("i2c1", 0x4000_5400, IrqLine::new(I2C1_EV_IRQ, BUS_PRIORITY))
        .with_error_irq(IrqLine::new(I2C1_ER_IRQ, BUS_PRIORITY))
        .with_pins(&I2C1_PINS),
    HardwareBinding::new("i2c2", 0x4000_5800, IrqLine::new(I2C2_EV_IRQ, BUS_PRIORITY))
        .with_error_irq(IrqLine::new(I2C2_ER_IRQ, BUS_PRIORITY))
        .with_pins(&I2C2_PINS),
    HardwareBinding::new("i2c3", 0x4000_5C00, IrqLine::new(I2C3_EV_IRQ, BUS_PRIORITY))
        .with_error_irq(IrqLine::new(I2C3_ER_IRQ, BUS_PRIORITY))
        .with_pins(&I2C3_PINS),
]);

pub static SPIS: DeviceRegistry<SPI_COUNT> = DeviceRegistry::new([
    HardwareBinding::new("spi1", 0x4001_3000, IrqLine::new(SPI1_IRQ, BUS_PRIORITY)).with_pins(&SPI1_PINS),
    HardwareBinding::new("spi2", 0x4000_3800, IrqLine::new(SPI2_IRQ, BUS_PRIORITY)).with_pins(&SPI2_PINS),
    HardwareBinding::new("spi3", 0x4000_3C00, IrqLine::new(SPI3_IRQ, BUS_PRIORITY)).with_pins(&SPI3_PINS),
]);

pub static USBS: DeviceRegistry<USB_COUNT> = DeviceRegistry::new([
    HardwareBinding::new("otg_fs", 0x5000_0000, IrqLine::new(OTG_FS_IRQ, SERIAL_PRIORITY))
        .with_pins(&OTG_FS_PINS),
    HardwareBinding::new("otg_hs", 0x4004_0000, IrqLine::new(OTG_HS_IRQ, SERIAL_PRIORITY))
        .with_pins(&OTG_HS_PINS),
]);
