//! Simulated SPI.
//!
//! Each frame written is answered by the next queued response, or looped
//! back when no response is queued. Writing while a received frame is still
//! unread raises an overrun, as on the hardware.

use common::sync::SpinLock;

use super::SimLog;
use crate::error::BackendError;
use crate::hal::spi::{SpiBackend, SpiConfig, SpiFlags};
use crate::registry::HardwareBinding;

const LOG_SIZE: usize = 256;

struct State {
    config: Option<SpiConfig>,
    bring_ups: usize,
    fail_bring_up: bool,
    enabled: bool,
    /// Latched faults.
    flags: SpiFlags,
    sources: SpiFlags,
    /// Frame waiting in the receive register.
    rx: Option<u16>,
    responses: SimLog<LOG_SIZE>,
    next_response: usize,
    sent: SimLog<LOG_SIZE>,
}

pub struct SimSpi {
    state: SpinLock<State>,
}

impl SimSpi {
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(State {
                config: None,
                bring_ups: 0,
                fail_bring_up: false,
                enabled: false,
                flags: SpiFlags::empty(),
                sources: SpiFlags::empty(),
                rx: None,
                responses: SimLog::new(),
                next_response: 0,
                sent: SimLog::new(),
            }),
        }
    }

    pub fn fail_next_bring_up(&self) {
        self.state.lock().fail_bring_up = true;
    }

    /// Queue frames the device answers with, in order.
    pub fn respond_with(&self, frames: &[u16]) {
        let mut state = self.state.lock();
        for &frame in frames {
            state.responses.push(frame);
        }
    }

    pub fn inject_flags(&self, flags: SpiFlags) {
        self.state.lock().flags |= flags & SpiFlags::FAULTS;
    }

    pub fn sent(&self) -> SimLog<LOG_SIZE> {
        self.state.lock().sent
    }

    pub fn config(&self) -> Option<SpiConfig> {
        self.state.lock().config
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn bring_up_count(&self) -> usize {
        self.state.lock().bring_ups
    }
}

impl Default for SimSpi {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiBackend for SimSpi {
    fn bring_up(&self, _binding: &HardwareBinding, config: &SpiConfig) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.bring_ups += 1;
        if core::mem::take(&mut state.fail_bring_up) {
            return Err(BackendError::Rejected);
        }
        state.config = Some(*config);
        state.flags = SpiFlags::empty();
        state.sources = SpiFlags::empty();
        state.rx = None;
        state.sent.clear();
        state.responses.clear();
        state.next_response = 0;
        Ok(())
    }

    fn tear_down(&self, _binding: &HardwareBinding) {
        let mut state = self.state.lock();
        state.config = None;
        state.enabled = false;
        state.sources = SpiFlags::empty();
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    fn flags(&self) -> SpiFlags {
        let state = self.state.lock();
        let mut flags = state.flags | SpiFlags::TX_EMPTY;
        if state.rx.is_some() {
            flags |= SpiFlags::RX_NOT_EMPTY;
        }
        flags
    }

    fn clear_flags(&self, flags: SpiFlags) {
        self.state.lock().flags.remove(flags);
    }

    fn sources(&self) -> SpiFlags {
        self.state.lock().sources
    }

    fn enable_sources(&self, sources: SpiFlags) {
        self.state.lock().sources.insert(sources);
    }

    fn disable_sources(&self, sources: SpiFlags) {
        self.state.lock().sources.remove(sources);
    }

    fn read_frame(&self) -> u16 {
        self.state.lock().rx.take().unwrap_or(0)
    }

    fn write_frame(&self, frame: u16) {
        let mut state = self.state.lock();
        state.sent.push(frame);
        let queued = state.responses.frames().get(state.next_response).copied();
        let answer = match queued {
            Some(answer) => {
                state.next_response += 1;
                answer
            }
            None => frame,
        };
        if state.rx.replace(answer).is_some() {
            state.flags |= SpiFlags::OVERRUN;
        }
    }
}
