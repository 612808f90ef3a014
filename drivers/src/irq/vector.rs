//! Interrupt Vector Controller
//!
//! Lets drivers bind handlers to interrupt numbers at run time. The first
//! registration copies the link-time vector table into a RAM table owned by
//! the controller and points the hardware at it; from then on every entry
//! can be rewritten. The copy happens exactly once per controller.

use core::sync::atomic::{AtomicUsize, Ordering};

use common::sync::IrqMutex;
use log::info;
use spin::Once;
use static_assertions::{assert_eq_size, const_assert};

use crate::config::{RESERVED_VECTORS, VECTOR_COUNT};
use crate::hal::interrupt::IrqNumber;

/// An interrupt handler as the hardware calls it.
pub type Vector = extern "C" fn();

/// Alignment of a relocated table. Cortex-M requires the table size rounded
/// up to a power of two.
pub const TABLE_ALIGN: usize = 1024;

/// A full vector table: core exceptions followed by device lines.
///
/// Entries are stored exactly as the hardware reads them; `None` is a zero
/// word.
#[derive(Copy, Clone)]
#[repr(C, align(1024))]
pub struct VectorTable {
    entries: [Option<Vector>; VECTOR_COUNT],
}

assert_eq_size!(Option<Vector>, usize);
const_assert!(core::mem::size_of::<VectorTable>() <= TABLE_ALIGN);
const_assert!(core::mem::align_of::<VectorTable>() == TABLE_ALIGN);

impl VectorTable {
    /// A table with every entry set to `handler`.
    pub const fn filled(handler: Vector) -> Self {
        Self {
            entries: [Some(handler); VECTOR_COUNT],
        }
    }

    pub fn get(&self, irq: IrqNumber) -> Option<Vector> {
        self.entries[slot(irq)]
    }

    pub fn set(&mut self, irq: IrqNumber, handler: Option<Vector>) {
        self.entries[slot(irq)] = handler;
    }
}

/// Table index of `irq`.
///
/// # Panics
///
/// If `irq` is outside the table.
pub fn slot(irq: IrqNumber) -> usize {
    let slot = irq as isize + RESERVED_VECTORS as isize;
    assert!(
        (0..VECTOR_COUNT as isize).contains(&slot),
        "interrupt {irq} is outside the vector table"
    );
    slot as usize
}

/// Access to the hardware register holding the active vector table address.
///
/// # Safety
///
/// `read` must always return the address of a readable array of
/// [`VECTOR_COUNT`] words laid out like [`VectorTable`].
pub unsafe trait VectorBase: Sync {
    fn read(&self) -> usize;

    /// Point the hardware at the table at `address`.
    ///
    /// # Safety
    ///
    /// `address` must satisfy the contract of [`VectorBase::read`] for the
    /// rest of the program.
    unsafe fn write(&self, address: usize);
}

static SPURIOUS: AtomicUsize = AtomicUsize::new(0);

/// Handler for every entry nobody registered. Counts and returns.
pub extern "C" fn default_handler() {
    SPURIOUS.fetch_add(1, Ordering::Relaxed);
}

/// Times [`default_handler`] ran.
pub fn spurious_count() -> usize {
    SPURIOUS.load(Ordering::Relaxed)
}

/// Owner of the writable vector table.
///
/// Lives in a `static`; the relocated table is stored inline, so the hardware
/// holds its address for the rest of the program.
pub struct VectorController<B: VectorBase> {
    base: B,
    table: IrqMutex<VectorTable>,
    relocated: Once<usize>,
}

impl<B: VectorBase> VectorController<B> {
    pub const fn new(base: B) -> Self {
        Self {
            base,
            table: IrqMutex::new(VectorTable::filled(default_handler)),
            relocated: Once::new(),
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn is_relocated(&self) -> bool {
        self.relocated.is_completed()
    }

    /// Copy the active table into RAM and switch the hardware to the copy.
    ///
    /// Runs once; later calls return the address chosen by the first.
    pub fn relocate(&'static self) -> usize {
        *self.relocated.call_once(|| {
            let source = self.base.read() as *const Option<Vector>;
            self.table.with(|table| {
                for (index, entry) in table.entries.iter_mut().enumerate() {
                    // SAFETY: `VectorBase::read` guarantees VECTOR_COUNT
                    // readable words at `source`.
                    *entry = unsafe { source.add(index).read_volatile() };
                }
            });

            let address = self.table.as_ptr() as usize;
            // SAFETY: the table lives inside `self`, which is 'static, and is
            // aligned to TABLE_ALIGN.
            unsafe { self.base.write(address) };

            info!(
                "vector table relocated from {:#x} to {:#x}",
                source as usize, address
            );
            address
        })
    }

    /// Install `handler` for `irq`, relocating the table first if needed.
    ///
    /// A second registration for the same line replaces the first.
    pub fn register(&'static self, irq: IrqNumber, handler: Vector) {
        self.relocate();
        self.table.with(|table| table.set(irq, Some(handler)));
    }

    /// Put the default handler back for `irq`. The table stays relocated.
    pub fn unregister(&self, irq: IrqNumber) {
        self.table.with(|table| table.set(irq, Some(default_handler)));
    }

    /// Handler stored in the managed table for `irq`.
    pub fn handler(&self, irq: IrqNumber) -> Option<Vector> {
        self.table.with(|table| table.get(irq))
    }

    /// Raw entry for `irq` in whichever table the hardware currently uses.
    pub fn get_vector(&self, irq: IrqNumber) -> usize {
        let table = self.base.read() as *const usize;
        // SAFETY: `VectorBase::read` guarantees a readable table and `slot`
        // bounds the index.
        unsafe { table.add(slot(irq)).read_volatile() }
    }

    /// Overwrite the raw entry for `irq` in the active table, bypassing the
    /// managed copy.
    ///
    /// # Safety
    ///
    /// The active table must be writable, and `address` must be zero or the
    /// address of an `extern "C" fn()` that is safe to run as this
    /// interrupt's handler.
    pub unsafe fn set_vector(&self, irq: IrqNumber, address: usize) {
        let table = self.base.read() as *mut usize;
        // SAFETY: upheld by the caller; `slot` bounds the index.
        unsafe { table.add(slot(irq)).write_volatile(address) };
    }

    /// Run the handler the hardware would run for `irq`.
    ///
    /// Used for software-triggered interrupts and by simulated platforms.
    pub fn dispatch(&self, irq: IrqNumber) {
        let table = self.base.read() as *const Option<Vector>;
        // SAFETY: as in `get_vector`.
        let entry = unsafe { table.add(slot(irq)).read_volatile() };
        match entry {
            Some(handler) => handler(),
            None => default_handler(),
        }
    }
}
