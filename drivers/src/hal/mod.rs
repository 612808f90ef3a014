//! Hardware Abstraction Layer (HAL) - Platform-Independent Traits
//!
//! This module defines the capability traits every driver object exposes to
//! application code, and the narrow backend traits the driver objects call
//! into for register-level work. Backends are the only code that knows a
//! silicon family; driver objects only know these traits.
//!
//! # Available Interfaces
//!
//! - [`driver`]: Capability traits shared by every driver object kind
//! - [`interrupt`]: Interrupt controller (NVIC) management
//! - [`usart`]: USART configuration, events and backend
//! - [`i2c`]: I2C configuration, events and backend
//! - [`spi`]: SPI configuration, events and backend
//! - [`usb_phy`]: USB PHY configuration and backend
//! - [`dma`]: DMA completion reporting shared by DMA-capable backends

pub mod dma;
pub mod driver;
pub mod i2c;
pub mod interrupt;
pub mod spi;
pub mod usart;
pub mod usb_phy;

pub use driver::{AsyncTransfer, BlockingTransfer, PeripheralDriver};
