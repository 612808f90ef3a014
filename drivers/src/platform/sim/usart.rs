//! Simulated USART.
//!
//! Frames written by the driver land in a transmit log; frames injected by a
//! test wait in a receive FIFO. The transmitter is always ready unless a test
//! stalls it. DMA requests are recorded and carried out when the test calls
//! [`SimUsart::complete_dma`].

use common::RingBuffer;
use common::sync::SpinLock;

use super::SimLog;
use crate::error::BackendError;
use crate::hal::dma::{Direction, DmaEvents};
use crate::hal::usart::{UsartBackend, UsartConfig, UsartFlags};
use crate::registry::HardwareBinding;

const FIFO_SIZE: usize = 256;

/// An armed DMA stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmaRequest {
    pub address: usize,
    pub len: usize,
    pub circular: bool,
}

#[derive(Copy, Clone)]
struct DmaStream {
    request: Option<DmaRequest>,
    /// Bytes already moved in the current lap.
    moved: usize,
    events: DmaEvents,
}

impl DmaStream {
    const fn idle() -> Self {
        Self {
            request: None,
            moved: 0,
            events: DmaEvents::empty(),
        }
    }
}

struct State {
    config: Option<UsartConfig>,
    bring_ups: usize,
    fail_bring_up: bool,
    enabled: bool,
    tx_stalled: bool,
    /// Latched flags; RX_NOT_EMPTY and TX_EMPTY are derived.
    flags: UsartFlags,
    sources: UsartFlags,
    rx: RingBuffer<FIFO_SIZE>,
    tx: SimLog<FIFO_SIZE>,
    dma: [DmaStream; 2],
}

pub struct SimUsart {
    state: SpinLock<State>,
}

fn stream(direction: Direction) -> usize {
    match direction {
        Direction::Tx => 0,
        Direction::Rx => 1,
    }
}

impl SimUsart {
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(State {
                config: None,
                bring_ups: 0,
                fail_bring_up: false,
                enabled: false,
                tx_stalled: false,
                flags: UsartFlags::empty(),
                sources: UsartFlags::empty(),
                rx: RingBuffer::new(),
                tx: SimLog::new(),
                dma: [DmaStream::idle(); 2],
            }),
        }
    }

    /// Make the next `bring_up` reject its configuration.
    pub fn fail_next_bring_up(&self) {
        self.state.lock().fail_bring_up = true;
    }

    /// Queue frames as if they had arrived on the line. Returns how many fit.
    pub fn inject_rx(&self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        bytes
            .iter()
            .take_while(|&&byte| state.rx.enqueue(byte).is_ok())
            .count()
    }

    /// Latch `flags`, e.g. a framing error or an idle line.
    pub fn inject_flags(&self, flags: UsartFlags) {
        self.state.lock().flags |= flags;
    }

    /// Hold TX_EMPTY low, as if the line were blocked.
    pub fn set_tx_stalled(&self, stalled: bool) {
        self.state.lock().tx_stalled = stalled;
    }

    pub fn transmitted(&self) -> SimLog<FIFO_SIZE> {
        self.state.lock().tx
    }

    pub fn clear_transmitted(&self) {
        self.state.lock().tx.clear();
    }

    pub fn config(&self) -> Option<UsartConfig> {
        self.state.lock().config
    }

    pub fn bring_up_count(&self) -> usize {
        self.state.lock().bring_ups
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn dma_request(&self, direction: Direction) -> Option<DmaRequest> {
        self.state.lock().dma[stream(direction)].request
    }

    /// Run the armed stream of `direction` to its half-way point
    /// (`half == true`) or to its end, latching the matching DMA event.
    ///
    /// Received bytes come from the injected FIFO. Returns `false` if the
    /// stream is not armed.
    pub fn complete_dma(&self, direction: Direction, half: bool) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let dma = &mut state.dma[stream(direction)];
        let Some(request) = dma.request else {
            return false;
        };
        let target = if half { request.len / 2 } else { request.len };

        for offset in dma.moved..target {
            let address = (request.address + offset) as *mut u8;
            match direction {
                // SAFETY: the driver keeps the buffer alive and untouched
                // while the stream is armed.
                Direction::Tx => state.tx.push(u16::from(unsafe { address.read_volatile() })),
                Direction::Rx => {
                    let byte = state.rx.dequeue().unwrap_or(0);
                    // SAFETY: as above.
                    unsafe { address.write_volatile(byte) };
                }
            }
        }

        if half {
            dma.moved = target;
            dma.events |= DmaEvents::HALF_COMPLETE;
        } else {
            dma.events |= DmaEvents::COMPLETE;
            dma.moved = 0;
            if !request.circular {
                dma.request = None;
            }
            if direction == Direction::Tx {
                state.flags |= UsartFlags::TX_COMPLETE;
            }
        }
        true
    }

    /// Latch a transfer error on the stream of `direction`.
    pub fn fail_dma(&self, direction: Direction) {
        self.state.lock().dma[stream(direction)].events |= DmaEvents::ERROR;
    }
}

impl Default for SimUsart {
    fn default() -> Self {
        Self::new()
    }
}

impl UsartBackend for SimUsart {
    fn bring_up(&self, _binding: &HardwareBinding, config: &UsartConfig) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.bring_ups += 1;
        if core::mem::take(&mut state.fail_bring_up) || config.baud_rate == 0 {
            return Err(BackendError::Rejected);
        }
        state.config = Some(*config);
        state.flags = UsartFlags::empty();
        state.sources = UsartFlags::empty();
        state.rx.reset();
        state.tx.clear();
        state.dma = [DmaStream::idle(); 2];
        Ok(())
    }

    fn tear_down(&self, _binding: &HardwareBinding) {
        let mut state = self.state.lock();
        state.config = None;
        state.enabled = false;
        state.sources = UsartFlags::empty();
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    fn flags(&self) -> UsartFlags {
        let state = self.state.lock();
        let mut flags = state.flags;
        if !state.tx_stalled {
            flags |= UsartFlags::TX_EMPTY;
        }
        if !state.rx.is_empty() {
            flags |= UsartFlags::RX_NOT_EMPTY;
        }
        flags
    }

    fn clear_flags(&self, flags: UsartFlags) {
        self.state.lock().flags.remove(flags);
    }

    fn sources(&self) -> UsartFlags {
        self.state.lock().sources
    }

    fn enable_sources(&self, sources: UsartFlags) {
        self.state.lock().sources.insert(sources);
    }

    fn disable_sources(&self, sources: UsartFlags) {
        self.state.lock().sources.remove(sources);
    }

    fn read_frame(&self) -> u16 {
        self.state.lock().rx.dequeue().map(u16::from).unwrap_or(0)
    }

    fn write_frame(&self, frame: u16) {
        let mut state = self.state.lock();
        state.tx.push(frame);
        state.flags |= UsartFlags::TX_COMPLETE;
    }

    fn start_dma(
        &self,
        direction: Direction,
        address: usize,
        len: usize,
        circular: bool,
    ) -> Result<(), BackendError> {
        if len == 0 {
            return Err(BackendError::Rejected);
        }
        let mut state = self.state.lock();
        state.dma[stream(direction)] = DmaStream {
            request: Some(DmaRequest {
                address,
                len,
                circular,
            }),
            moved: 0,
            events: DmaEvents::empty(),
        };
        Ok(())
    }

    fn stop_dma(&self, direction: Direction) {
        self.state.lock().dma[stream(direction)].request = None;
    }

    fn take_dma_events(&self, direction: Direction) -> DmaEvents {
        core::mem::replace(
            &mut self.state.lock().dma[stream(direction)].events,
            DmaEvents::empty(),
        )
    }
}
