//! Peripheral Drivers
//!
//! Driver objects: one `static` per peripheral kind, holding a slot per
//! configured instance. They implement the [`crate::hal`] capability traits
//! on top of any backend for their kind.
//!
//! # Available Peripherals
//!
//! - [`usart`]: asynchronous serial, interrupt or DMA driven
//! - [`i2c`]: I2C master and slave, including register access
//! - [`spi`]: SPI master and slave
//! - [`usb_phy`]: USB transceiver power and routing

pub mod i2c;
pub mod spi;
pub mod usart;
pub mod usb_phy;

pub use i2c::I2cDriver;
pub use spi::SpiDriver;
pub use usart::UsartDriver;
pub use usb_phy::UsbPhyDriver;
