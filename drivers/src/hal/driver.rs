//! Capability traits implemented by every driver object kind.
//!
//! Operations address an instance through its peripheral identifier; the
//! driver object owns one slot per identifier.

use crate::driver::Received;
use crate::error::DriverResult;
use crate::registry::PeripheralId;

/// Lifecycle and state inspection shared by every peripheral kind.
pub trait PeripheralDriver {
    /// Identifier naming one configured instance.
    type Id: PeripheralId;
    /// Configuration accepted by [`PeripheralDriver::init`].
    type Config;
    /// Status bits.
    type Status;
    /// Sticky error bits.
    type Errors;

    /// Bind the instance to its hardware, install its interrupt handlers and
    /// bring the hardware up.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DriverError::Fail`] when the backend rejects the
    /// configuration. The instance is left deinitialized.
    fn init(&self, id: Self::Id, config: &Self::Config) -> DriverResult;

    /// Tear the hardware down and return the instance to its zero state.
    fn deinit(&self, id: Self::Id) -> DriverResult;

    /// Enable the peripheral.
    fn start(&self, id: Self::Id);

    /// Disable the peripheral and abort any in-flight non-blocking transfer.
    fn stop(&self, id: Self::Id);

    fn get_status(&self, id: Self::Id) -> Self::Status;

    fn get_error(&self, id: Self::Id) -> Self::Errors;
}

/// Blocking transfers that poll the hardware until done or out of time.
///
/// These bypass the busy flags; the caller owns exclusivity.
pub trait BlockingTransfer: PeripheralDriver {
    fn poll_send(&self, id: Self::Id, data: &[u8], timeout_ms: u32) -> DriverResult;

    fn poll_receive(&self, id: Self::Id, buffer: &mut [u8], timeout_ms: u32) -> DriverResult;
}

/// Non-blocking transfers completed from interrupt context.
///
/// Buffers are borrowed for `'static` because the hardware keeps using them
/// after the call returns. Completion is reported through the event callback.
pub trait AsyncTransfer: PeripheralDriver {
    /// # Errors
    ///
    /// [`crate::DriverError::Busy`] if a transmission is already in flight;
    /// nothing about that transmission changes.
    fn send(&self, id: Self::Id, data: &'static [u8]) -> DriverResult;

    /// # Errors
    ///
    /// [`crate::DriverError::Busy`] if a reception is already in flight;
    /// nothing about that reception changes and `buffer` is dropped.
    fn receive(&self, id: Self::Id, buffer: &'static mut [u8]) -> DriverResult;

    /// Hand back the buffer of the last finished or aborted reception.
    fn take_received(&self, id: Self::Id) -> Option<Received>;
}
