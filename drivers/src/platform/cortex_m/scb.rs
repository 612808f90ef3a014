//! System control block pieces: the vector table offset register, the
//! interrupt program status register and SysTick.

use core::arch::asm;
use core::ptr::{read_volatile, write_volatile};

use crate::hal::interrupt::IrqNumber;
use crate::irq::VectorBase;

const VTOR: usize = 0xE000_ED08;

const SYST_CSR: usize = 0xE000_E010;
const SYST_RVR: usize = 0xE000_E014;
const SYST_CVR: usize = 0xE000_E018;

const SYST_CSR_ENABLE: u32 = 1 << 0;
const SYST_CSR_TICKINT: u32 = 1 << 1;
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;

/// Vector Table Offset Register.
#[derive(Debug)]
pub struct Vtor;

// SAFETY: out of reset VTOR holds the link-time table, which the linker
// script places where the core boots from, and the controller only ever
// writes the address of a full relocated table.
unsafe impl VectorBase for Vtor {
    fn read(&self) -> usize {
        // SAFETY: reading VTOR has no side effects.
        unsafe { read_volatile(VTOR as *const u32) as usize }
    }

    unsafe fn write(&self, address: usize) {
        // SAFETY: the caller provides a valid table; the barriers make the
        // next exception fetch from it.
        unsafe {
            write_volatile(VTOR as *mut u32, address as u32);
            asm!("dsb", "isb", options(nostack, preserves_flags));
        }
    }
}

/// The exception being serviced, from IPSR.
pub fn active_irq() -> Option<IrqNumber> {
    let ipsr: u32;
    // SAFETY: reading IPSR has no side effects.
    unsafe { asm!("mrs {}, IPSR", out(reg) ipsr, options(nomem, nostack, preserves_flags)) };
    match ipsr & 0x1FF {
        0 => None,
        exception => Some(exception as IrqNumber - 16),
    }
}

/// Run SysTick at 1 kHz from the processor clock.
pub fn start_systick(core_hz: u32) {
    // SAFETY: SysTick registers are always present on ARMv7-M.
    unsafe {
        write_volatile(SYST_CSR as *mut u32, 0);
        write_volatile(SYST_RVR as *mut u32, core_hz / 1_000 - 1);
        write_volatile(SYST_CVR as *mut u32, 0);
        write_volatile(
            SYST_CSR as *mut u32,
            SYST_CSR_ENABLE | SYST_CSR_TICKINT | SYST_CSR_CLKSOURCE,
        );
    }
}
