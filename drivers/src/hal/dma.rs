//! DMA completion reporting.

use bitflags::bitflags;

/// Transfer direction as seen from the peripheral.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Memory to peripheral.
    Tx,
    /// Peripheral to memory.
    Rx,
}

bitflags! {
    /// Conditions latched by a DMA stream since the last time they were read.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DmaEvents: u8 {
        const COMPLETE = 1 << 0;
        const HALF_COMPLETE = 1 << 1;
        const ERROR = 1 << 2;
    }
}
