//! Event Dispatcher
//!
//! Delivers the event bitmask computed by a driver object to the single
//! consumer registered for that instance. Delivery happens if and only if a
//! callback is registered and the mask is non-empty.
//!
//! In [`DispatchMode::Immediate`] the callback runs on the calling context,
//! which for completions is interrupt context: it must be short and must not
//! block. [`DispatchMode::Deferred`] instead merges events into a lock-free
//! [`Mailbox`] that task context drains later.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::Flags;

/// Consumer of a driver object's events.
pub type EventCallback<E> = fn(E);

/// Where the event callback runs.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Synchronously, on the context that produced the events.
    #[default]
    Immediate,
    /// From task context, when the application drains the mailbox.
    Deferred,
}

/// Single-slot event mailbox. Posting OR-merges into whatever is waiting.
pub struct Mailbox<E> {
    bits: AtomicU32,
    _events: PhantomData<fn() -> E>,
}

impl<E: Flags<Bits = u32>> Mailbox<E> {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            _events: PhantomData,
        }
    }

    pub fn post(&self, events: E) {
        self.bits.fetch_or(events.bits(), Ordering::AcqRel);
    }

    /// Take everything posted so far.
    pub fn take(&self) -> E {
        E::from_bits_retain(self.bits.swap(0, Ordering::AcqRel))
    }

    pub fn peek(&self) -> E {
        E::from_bits_retain(self.bits.load(Ordering::Acquire))
    }
}

impl<E: Flags<Bits = u32>> Default for Mailbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The callback registration of one driver object instance.
pub struct EventDispatcher<E: 'static> {
    callback: Option<EventCallback<E>>,
    mode: DispatchMode,
}

impl<E> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for EventDispatcher<E> {}

impl<E: Flags<Bits = u32>> EventDispatcher<E> {
    /// No callback registered.
    pub const fn none() -> Self {
        Self {
            callback: None,
            mode: DispatchMode::Immediate,
        }
    }

    pub const fn new(callback: Option<EventCallback<E>>, mode: DispatchMode) -> Self {
        Self { callback, mode }
    }

    /// Deliver `events`, or park them in `mailbox` in deferred mode.
    pub fn dispatch(&self, events: E, mailbox: &Mailbox<E>) {
        let Some(callback) = self.callback else {
            return;
        };
        if events.is_empty() {
            return;
        }
        match self.mode {
            DispatchMode::Immediate => callback(events),
            DispatchMode::Deferred => mailbox.post(events),
        }
    }

    /// Deliver whatever is parked in `mailbox`. Returns whether the callback
    /// ran.
    pub fn drain(&self, mailbox: &Mailbox<E>) -> bool {
        let Some(callback) = self.callback else {
            return false;
        };
        let events = mailbox.take();
        if events.is_empty() {
            return false;
        }
        callback(events);
        true
    }
}
