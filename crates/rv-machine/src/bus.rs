//! Platform address decoder: routes a physical address to RAM, ACLINT,
//! PLIC, or the UART window. Grounded in spec.md §4.9's memory map and in
//! the original's per-device register-offset conventions (`aclint.c`,
//! `plic.c`, `uart.c`) already followed by the crates this dispatches to.

use rv_clock::{HostClock, TickSource};
use rv_devices::Uart;
use rv_hart::SystemBus;
use rv_isa::trap::Exception;
use rv_isa::LoadStoreWidth;
use rv_mmu::PageTableSource;
use rv_ram::Ram;

use rv_aclint::Aclint;
use rv_plic::Plic;

/// Base and size of the ACLINT aperture (spec.md §4.9): `0x0200_0000 ..
/// 0x0201_0000`. The single 64 KiB window is split into three 32 KiB-or-
/// smaller sub-apertures matching the three independent register spaces
/// `aclint.c` exposes (SSWI, MSWI, MTIMER), each addressed starting at its
/// own offset zero exactly as that file's `addr < 0x4000` / `addr < 0x7FF8`
/// checks assume.
pub const ACLINT_BASE: u32 = 0x0200_0000;
pub const ACLINT_SIZE: u32 = 0x0001_0000;
const ACLINT_SSWI_OFFSET: u32 = 0x0000;
const ACLINT_MSWI_OFFSET: u32 = 0x4000;
const ACLINT_MTIMER_OFFSET: u32 = 0x8000;

/// `0x0C00_0000 .. 0x1000_0000`.
pub const PLIC_BASE: u32 = 0x0C00_0000;
pub const PLIC_SIZE: u32 = 0x0400_0000;

/// `0x1000_0000 ..`. One page is more than the stand-in UART ever uses.
pub const UART_BASE: u32 = 0x1000_0000;
pub const UART_SIZE: u32 = 0x1000;

/// Everything reachable over the platform bus except the harts themselves.
/// Kept as a separate struct (rather than folded into `Machine`) so the
/// scheduler can hold `&mut Hart` and `&mut Bus` at once without aliasing
/// `self`.
pub struct Bus<C: TickSource = HostClock> {
    pub ram: Ram,
    pub aclint: Aclint<C>,
    pub plic: Plic,
    pub uart: Uart,
}

impl<C: TickSource> Bus<C> {
    pub fn new(ram: Ram, aclint: Aclint<C>) -> Self {
        Self {
            ram,
            aclint,
            plic: Plic::new(),
            uart: Uart::new(),
        }
    }

    fn ram_contains(&self, paddr: u32) -> bool {
        let Some(off) = paddr.checked_sub(rv_ram::RAM_BASE) else {
            return false;
        };
        (off as usize) < self.ram.len()
    }
}

impl<C: TickSource> PageTableSource for Bus<C> {
    fn page_table_mut(&mut self, ppn: u32) -> Option<&mut [u32; rv_ram::PTES_PER_PAGE]> {
        self.ram.page_table_mut(ppn)
    }
}

impl<C: TickSource> SystemBus for Bus<C> {
    fn fetch(&mut self, paddr: u32) -> Result<u32, Exception> {
        if !self.ram_contains(paddr) {
            return Err(Exception::InstructionAccessFault);
        }
        self.ram.read_u32(paddr).ok_or(Exception::InstructionAccessFault)
    }

    fn load(&mut self, paddr: u32, width: LoadStoreWidth) -> Result<u32, Exception> {
        if self.ram_contains(paddr) {
            return ram_load(&self.ram, paddr, width).ok_or(Exception::LoadAccessFault);
        }
        if let Some(off) = in_window(paddr, ACLINT_BASE, ACLINT_SIZE) {
            return aclint_load(&self.aclint, off, width).ok_or(Exception::LoadAccessFault);
        }
        if let Some(off) = in_window(paddr, PLIC_BASE, PLIC_SIZE) {
            word_aligned(width)?;
            return self.plic.read(off).ok_or(Exception::LoadAccessFault);
        }
        if let Some(off) = in_window(paddr, UART_BASE, UART_SIZE) {
            return self.uart.read(off).ok_or(Exception::LoadAccessFault);
        }
        Err(Exception::LoadAccessFault)
    }

    fn store(&mut self, paddr: u32, width: LoadStoreWidth, value: u32) -> Result<(), Exception> {
        if self.ram_contains(paddr) {
            return ram_store(&mut self.ram, paddr, width, value).ok_or(Exception::StoreOrAmoAccessFault);
        }
        if let Some(off) = in_window(paddr, ACLINT_BASE, ACLINT_SIZE) {
            return aclint_store(&mut self.aclint, off, width, value).ok_or(Exception::StoreOrAmoAccessFault);
        }
        if let Some(off) = in_window(paddr, PLIC_BASE, PLIC_SIZE) {
            word_aligned(width)?;
            return self.plic.write(off, value).ok_or(Exception::StoreOrAmoAccessFault);
        }
        if let Some(off) = in_window(paddr, UART_BASE, UART_SIZE) {
            return self.uart.write(off, value).ok_or(Exception::StoreOrAmoAccessFault);
        }
        Err(Exception::StoreOrAmoAccessFault)
    }
}

fn in_window(paddr: u32, base: u32, size: u32) -> Option<u32> {
    let off = paddr.checked_sub(base)?;
    if off < size {
        Some(off)
    } else {
        None
    }
}

fn word_aligned(width: LoadStoreWidth) -> Result<(), Exception> {
    if matches!(width, LoadStoreWidth::Word) {
        Ok(())
    } else {
        Err(Exception::LoadAccessFault)
    }
}

fn ram_load(ram: &Ram, paddr: u32, width: LoadStoreWidth) -> Option<u32> {
    match width {
        LoadStoreWidth::Byte | LoadStoreWidth::ByteUnsigned => ram.read_u8(paddr).map(u32::from),
        LoadStoreWidth::Half | LoadStoreWidth::HalfUnsigned => ram.read_u16(paddr).map(u32::from),
        LoadStoreWidth::Word => ram.read_u32(paddr),
    }
}

fn ram_store(ram: &mut Ram, paddr: u32, width: LoadStoreWidth, value: u32) -> Option<()> {
    match width {
        LoadStoreWidth::Byte | LoadStoreWidth::ByteUnsigned => ram.write_u8(paddr, value as u8),
        LoadStoreWidth::Half | LoadStoreWidth::HalfUnsigned => ram.write_u16(paddr, value as u16),
        LoadStoreWidth::Word => ram.write_u32(paddr, value),
    }
}

/// ACLINT requires 32-bit-aligned word accesses only (spec.md §4.4); any
/// other width is a load/store-fault, matching `aclint.c`'s reg-read/write
/// wrappers which only ever shift a full word.
fn aclint_load<C: TickSource>(aclint: &Aclint<C>, off: u32, width: LoadStoreWidth) -> Option<u32> {
    word_aligned(width).ok()?;
    match off {
        o if o < ACLINT_MSWI_OFFSET => aclint.sswi_read(o - ACLINT_SSWI_OFFSET),
        o if o < ACLINT_MTIMER_OFFSET => aclint.mswi_read(o - ACLINT_MSWI_OFFSET),
        o => aclint.mtimer_read(o - ACLINT_MTIMER_OFFSET),
    }
}

fn aclint_store<C: TickSource>(aclint: &mut Aclint<C>, off: u32, width: LoadStoreWidth, value: u32) -> Option<()> {
    word_aligned(width).ok()?;
    match off {
        o if o < ACLINT_MSWI_OFFSET => aclint.sswi_write(o - ACLINT_SSWI_OFFSET, value),
        o if o < ACLINT_MTIMER_OFFSET => aclint.mswi_write(o - ACLINT_MSWI_OFFSET, value),
        o => aclint.mtimer_write(o - ACLINT_MTIMER_OFFSET, value),
    }
}
