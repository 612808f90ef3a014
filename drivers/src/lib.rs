//! Peripheral Driver Runtime
//!
//! Interrupt-driven driver objects for microcontroller serial peripherals,
//! with an interrupt vector table that relocates itself to RAM the first
//! time a driver installs a handler.
//!
//! # Module Organization
//!
//! - [`hal`]: Capability traits and per-kind backend traits
//! - [`registry`]: Static map from peripheral identifiers to hardware bindings
//! - [`irq`]: Run-time vector table and handler installation
//! - [`driver`]: Event dispatch and transfer bookkeeping shared by drivers
//! - [`peripheral`]: The USART, I2C, SPI and USB PHY driver objects
//! - [`platform`]: Platform services (NVIC, vector base, clock)
//! - [`logger`]: `log` backend on top of a USART
//!
//! # Design Principles
//!
//! 1. **Static Everything**: Driver objects, registries and the vector table
//!    are `static`s; nothing allocates
//! 2. **Split Ownership**: Task code starts transfers, interrupt handlers
//!    finish them, and both meet only inside a per-instance masking lock
//! 3. **Callbacks Outside Locks**: Events are delivered after the instance
//!    lock is released, so callbacks may start the next transfer
//! 4. **Reusability**: Driver objects are generic over a backend per
//!    peripheral kind and a platform
//!
//! # Usage Example
//!
//! ```ignore
//! use periph_drivers::hal::{AsyncTransfer, PeripheralDriver};
//! use periph_drivers::hal::usart::{UsartConfig, UsartEvent};
//! use periph_drivers::peripheral::UsartDriver;
//! use periph_drivers::platform::sim::{SimPlatform, SimUsart, board};
//! use periph_drivers::{UsartId, declare_driver};
//!
//! declare_driver! {
//!     static USART: UsartDriver<SimPlatform, SimUsart> =
//!         (&board::USARTS, [SimUsart::new(), SimUsart::new(), SimUsart::new()]);
//! }
//!
//! fn on_event(events: UsartEvent) {
//!     if events.contains(UsartEvent::SEND_COMPLETE) {
//!         // queue the next message
//!     }
//! }
//!
//! USART.init(UsartId::Usart2, &UsartConfig::new_8n1(115_200).with_callback(on_event))?;
//! USART.start(UsartId::Usart2);
//! USART.send(UsartId::Usart2, b"Hello, world!\n")?;
//! ```

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod driver;
pub mod error;
pub mod hal;
pub mod irq;
pub mod logger;
pub mod peripheral;
pub mod platform;
pub mod registry;

// Re-export commonly used types
pub use driver::{DispatchMode, Received};
pub use error::{BackendError, DriverError, DriverResult};
pub use hal::{AsyncTransfer, BlockingTransfer, PeripheralDriver};
pub use registry::{DeviceRegistry, HardwareBinding, I2cId, SpiId, UsartId, UsbId};
