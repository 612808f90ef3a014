//! Build-time configuration.

/// Core exception entries at the start of the vector table.
pub const RESERVED_VECTORS: usize = 16;

/// Device interrupt lines after the core exceptions.
pub const DEVICE_VECTORS: usize = 96;

/// Entries in a vector table.
pub const VECTOR_COUNT: usize = RESERVED_VECTORS + DEVICE_VECTORS;

/// Per-trial timeout of [`crate::peripheral::i2c::I2cDriver::is_device_ready`].
pub const I2C_DEVICE_READY_TIMEOUT_MS: u32 = 1_000;

/// Longest a log record may block its USART.
pub const LOG_WRITE_TIMEOUT_MS: u32 = 100;
