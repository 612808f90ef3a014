//! Cortex-M Nested Vectored Interrupt Controller

use core::ptr::{read_volatile, write_volatile};

use crate::config::DEVICE_VECTORS;
use crate::hal::interrupt::{
    InterruptController, InterruptError, IrqNumber, Priority, PriorityInterruptController,
};

/// Priority bits implemented by the silicon; the rest of each byte reads as
/// zero.
pub const PRIORITY_BITS: u8 = 4;

const ISER: usize = 0xE000_E100;
const ICER: usize = 0xE000_E180;
const ISPR: usize = 0xE000_E200;
const ICPR: usize = 0xE000_E280;
const IPR: usize = 0xE000_E400;

/// System handler priority bytes, starting at exception 4 (MemManage).
const SHPR: usize = 0xE000_ED18;

const AIRCR: usize = 0xE000_ED0C;
const AIRCR_VECTKEY: u32 = 0x05FA << 16;
const AIRCR_PRIGROUP_SHIFT: u32 = 8;
const AIRCR_PRIGROUP_MASK: u32 = 0x7 << AIRCR_PRIGROUP_SHIFT;

fn line(irq: IrqNumber) -> Result<usize, InterruptError> {
    usize::try_from(irq)
        .ok()
        .filter(|&line| line < DEVICE_VECTORS)
        .ok_or(InterruptError::InvalidLine(irq))
}

/// Word register and bit mask of `line` in a bank starting at `base`.
#[inline(always)]
fn bank(base: usize, line: usize) -> (*mut u32, u32) {
    ((base + (line / 32) * 4) as *mut u32, 1 << (line % 32))
}

/// Priority byte of `irq`, core exceptions included.
fn priority_byte(irq: IrqNumber) -> Result<*mut u8, InterruptError> {
    match irq {
        // MemManage (-12) through SysTick (-1)
        -12..=-1 => Ok((SHPR as isize + irq as isize + 12) as *mut u8),
        _ => line(irq).map(|line| (IPR + line) as *mut u8),
    }
}

// ============================================================================
// HAL Implementation
// ============================================================================

/// The NVIC and the system handler priority registers.
#[derive(Debug)]
pub struct Nvic;

impl InterruptController for Nvic {
    type Error = InterruptError;

    fn enable(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        let (reg, bit) = bank(ISER, line(irq)?);
        // SAFETY: ISER is write-one-to-set; other lines are unaffected.
        unsafe { write_volatile(reg, bit) };
        Ok(())
    }

    fn disable(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        let (reg, bit) = bank(ICER, line(irq)?);
        // SAFETY: ICER is write-one-to-clear.
        unsafe { write_volatile(reg, bit) };
        Ok(())
    }

    fn is_enabled(&self, irq: IrqNumber) -> Result<bool, Self::Error> {
        let (reg, bit) = bank(ISER, line(irq)?);
        // SAFETY: reading ISER has no side effects.
        Ok(unsafe { read_volatile(reg) } & bit != 0)
    }

    fn is_pending(&self, irq: IrqNumber) -> Result<bool, Self::Error> {
        let (reg, bit) = bank(ISPR, line(irq)?);
        // SAFETY: reading ISPR has no side effects.
        Ok(unsafe { read_volatile(reg) } & bit != 0)
    }

    fn set_pending(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        let (reg, bit) = bank(ISPR, line(irq)?);
        // SAFETY: ISPR is write-one-to-set.
        unsafe { write_volatile(reg, bit) };
        Ok(())
    }

    fn clear_pending(&self, irq: IrqNumber) -> Result<(), Self::Error> {
        let (reg, bit) = bank(ICPR, line(irq)?);
        // SAFETY: ICPR is write-one-to-clear.
        unsafe { write_volatile(reg, bit) };
        Ok(())
    }

    fn next_pending(&self) -> Option<IrqNumber> {
        (0..DEVICE_VECTORS.div_ceil(32)).find_map(|word| {
            let (reg, _) = bank(ISPR, word * 32);
            // SAFETY: reading ISPR has no side effects.
            let pending = unsafe { read_volatile(reg) };
            (pending != 0).then(|| (word * 32 + pending.trailing_zeros() as usize) as IrqNumber)
        })
    }
}

impl PriorityInterruptController for Nvic {
    fn set_priority(&self, irq: IrqNumber, priority: Priority) -> Result<(), Self::Error> {
        let reg = priority_byte(irq)?;
        // SAFETY: priority registers are byte accessible.
        unsafe { write_volatile(reg, priority << (8 - PRIORITY_BITS)) };
        Ok(())
    }

    fn get_priority(&self, irq: IrqNumber) -> Result<Priority, Self::Error> {
        let reg = priority_byte(irq)?;
        // SAFETY: as above.
        Ok(unsafe { read_volatile(reg) } >> (8 - PRIORITY_BITS))
    }

    fn set_priority_grouping(&self, group: u8) -> Result<(), Self::Error> {
        if group > PRIORITY_BITS {
            return Err(InterruptError::InvalidGrouping(group));
        }
        let prigroup = u32::from(7 - PRIORITY_BITS + group);
        // SAFETY: AIRCR writes are ignored without VECTKEY; only PRIGROUP
        // changes.
        unsafe {
            let aircr = read_volatile(AIRCR as *const u32) & !(0xFFFF_0000 | AIRCR_PRIGROUP_MASK);
            write_volatile(
                AIRCR as *mut u32,
                aircr | AIRCR_VECTKEY | (prigroup << AIRCR_PRIGROUP_SHIFT),
            );
        }
        Ok(())
    }

    fn priority_grouping(&self) -> u8 {
        // SAFETY: reading AIRCR has no side effects.
        let aircr = unsafe { read_volatile(AIRCR as *const u32) };
        let prigroup = ((aircr & AIRCR_PRIGROUP_MASK) >> AIRCR_PRIGROUP_SHIFT) as u8;
        prigroup.saturating_sub(7 - PRIORITY_BITS)
    }
}
