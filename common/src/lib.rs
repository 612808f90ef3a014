//! Shared building blocks for the peripheral runtime.
//!
//! # Module Organization
//!
//! - [`sync`]: Interrupt-masking spinlocks usable from task and interrupt context
//! - [`arch`]: Per-architecture interrupt masking selected at build time
//! - [`ring_buffer`]: Fixed-capacity single-producer/single-consumer byte queue
//!
//! Nothing in this crate allocates. Every type can live in a `static`.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod ring_buffer;
pub mod sync;

pub use ring_buffer::{RingBuffer, RingStatus};
pub use sync::{IrqMutex, IrqSpinLock, SpinLock};
