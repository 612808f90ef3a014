//! Transfer descriptors.
//!
//! A descriptor records the buffer, the requested number of frames and the
//! frames moved so far for one direction of a non-blocking transfer. The
//! driver object keeps it inside its slot lock; interrupt handlers advance it
//! one frame at a time.

use core::fmt;

use bitflags::Flags;

use crate::error::{DriverError, DriverResult};
use crate::platform::Platform;

/// How frames map onto caller bytes.
///
/// Frames wider than eight bits occupy two little-endian bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    /// Bytes of caller buffer per frame, 1 or 2.
    pub width: usize,
    /// Data bits kept from a received frame.
    pub mask: u16,
}

impl FrameFormat {
    pub const BYTE: Self = Self::new(1, 0x00FF);

    pub const fn new(width: usize, mask: u16) -> Self {
        Self { width, mask }
    }

    /// Number of frames in `len` bytes, or `None` if `len` is zero or does
    /// not hold a whole number of frames.
    pub const fn frames(&self, len: usize) -> Option<usize> {
        if len == 0 || len % self.width != 0 {
            None
        } else {
            Some(len / self.width)
        }
    }

    /// Frame held in the first `width` bytes of `bytes`.
    pub fn load(&self, bytes: &[u8]) -> u16 {
        match bytes {
            [low, high] => u16::from_le_bytes([*low, *high]),
            [byte, ..] => u16::from(*byte),
            [] => 0,
        }
    }

    /// Write the data bits of `frame` into `out`.
    pub fn place(&self, frame: u16, out: &mut [u8]) {
        let frame = frame & self.mask;
        match out {
            [low, high] => {
                let [l, h] = frame.to_le_bytes();
                *low = l;
                *high = h;
            }
            [byte, ..] => *byte = frame as u8,
            [] => {}
        }
    }
}

/// Frames still to be handed to the transmitter.
#[derive(Copy, Clone)]
pub struct TxTransfer {
    data: &'static [u8],
    format: FrameFormat,
    count: usize,
}

impl TxTransfer {
    /// `None` if `data` holds no whole frame.
    pub fn new(data: &'static [u8], format: FrameFormat) -> Option<Self> {
        format.frames(data.len())?;
        Some(Self {
            data,
            format,
            count: 0,
        })
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.format.width
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_done(&self) -> bool {
        self.count == self.frames()
    }

    /// The next frame to transmit, advancing the count.
    pub fn next_frame(&mut self) -> Option<u16> {
        if self.is_done() {
            return None;
        }
        let offset = self.count * self.format.width;
        let frame = self.format.load(&self.data[offset..offset + self.format.width]);
        self.count += 1;
        Some(frame)
    }

    /// Mark every frame sent, for transfers the DMA engine carried.
    pub fn complete(&mut self) {
        self.count = self.frames();
    }

    /// Frames sent so far and frames requested.
    pub fn progress(&self) -> (usize, usize) {
        (self.count, self.frames())
    }

    /// Address and length of the source, for DMA.
    pub fn region(&self) -> (usize, usize) {
        (self.data.as_ptr() as usize, self.data.len())
    }
}

impl fmt::Debug for TxTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxTransfer")
            .field("count", &self.count)
            .field("frames", &self.frames())
            .finish()
    }
}

/// A caller buffer being filled by the receiver.
pub struct RxTransfer {
    buffer: &'static mut [u8],
    format: FrameFormat,
    count: usize,
}

impl RxTransfer {
    /// `None` if `buffer` holds no whole frame; the buffer is dropped.
    pub fn new(buffer: &'static mut [u8], format: FrameFormat) -> Option<Self> {
        format.frames(buffer.len())?;
        Some(Self {
            buffer,
            format,
            count: 0,
        })
    }

    pub fn frames(&self) -> usize {
        self.buffer.len() / self.format.width
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_done(&self) -> bool {
        self.count == self.frames()
    }

    /// Store one received frame. Returns `true` once the buffer is full;
    /// frames arriving after that are discarded.
    pub fn store(&mut self, frame: u16) -> bool {
        if !self.is_done() {
            let offset = self.count * self.format.width;
            self.format
                .place(frame, &mut self.buffer[offset..offset + self.format.width]);
            self.count += 1;
        }
        self.is_done()
    }

    /// Set the count after the DMA engine filled the buffer up to `frames`.
    pub fn advance_to(&mut self, frames: usize) {
        self.count = frames.min(self.frames());
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.count, self.frames())
    }

    /// Bytes stored so far.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.count * self.format.width]
    }

    /// Address and length of the destination, for DMA.
    pub fn region(&mut self) -> (usize, usize) {
        (self.buffer.as_mut_ptr() as usize, self.buffer.len())
    }

    /// Hand the buffer back, together with how much of it was filled.
    pub fn finish(self) -> Received {
        let frames = self.frames();
        Received {
            len: self.count * self.format.width,
            frames: self.count,
            requested: frames,
            buffer: self.buffer,
        }
    }
}

impl fmt::Debug for RxTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxTransfer")
            .field("count", &self.count)
            .field("frames", &self.frames())
            .finish()
    }
}

/// The buffer of a finished or aborted reception.
#[derive(Debug)]
pub struct Received {
    buffer: &'static mut [u8],
    len: usize,
    frames: usize,
    requested: usize,
}

impl Received {
    /// The bytes that were actually received.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether every requested frame arrived.
    pub fn is_complete(&self) -> bool {
        self.frames == self.requested
    }

    /// Frames received and frames requested.
    pub fn progress(&self) -> (usize, usize) {
        (self.frames, self.requested)
    }

    /// The whole buffer, ready to be passed to the next `receive`.
    pub fn into_buffer(self) -> &'static mut [u8] {
        self.buffer
    }
}

/// Spin until `read` reports any flag in `any`, or until `timeout_ms` have
/// passed since `start`.
///
/// Returns the flags that ended the wait.
pub fn wait_for<P, F>(
    start: u32,
    timeout_ms: u32,
    mut read: impl FnMut() -> F,
    any: F,
) -> DriverResult<F>
where
    P: Platform,
    F: Flags + Copy,
{
    loop {
        let flags = read();
        if flags.intersects(any) {
            return Ok(flags);
        }
        if P::now_ms().wrapping_sub(start) >= timeout_ms {
            return Err(DriverError::Timeout);
        }
        P::relax();
    }
}
