//! Sv32 virtual-to-physical address translation.
//!
//! The physical address space here is 32 bits wide, same as virtual, so a
//! leaf PTE's page-frame number is 20 bits rather than the standard
//! privileged spec's 22. See [`pte`] for the exact bit layout.

pub mod pte;

use pte::{EntryFlags, PageTableEntry};
use rv_isa::Exception;
use rv_ram::Ram;

/// Anything that can hand back the 1024 PTE-sized words of a physical page
/// by page number. `rv-ram`'s `Ram` is the only real implementor; `Machine`
/// (in `rv-machine`) forwards to it so the walker never needs to know
/// about devices.
pub trait PageTableSource {
    fn page_table_mut(&mut self, ppn: u32) -> Option<&mut [u32; rv_ram::PTES_PER_PAGE]>;
}

impl PageTableSource for Ram {
    fn page_table_mut(&mut self, ppn: u32) -> Option<&mut [u32; rv_ram::PTES_PER_PAGE]> {
        Ram::page_table_mut(self, ppn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Fetch,
    Load,
    Store,
}

/// A translation failure, already carrying the exact exception the hart
/// must trap into. `exc_val` is always the faulting virtual address.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("{exception:?} translating {vaddr:#010x}")]
pub struct TranslateFault {
    pub exception: Exception,
    pub vaddr: u32,
}

/// Translation context: the bits of hart state the walker needs to know
/// about but does not own.
#[derive(Debug, Clone, Copy)]
pub struct TranslateEnv {
    /// `satp.MODE`: `None` means bare (identity) translation.
    pub root_ppn: Option<u32>,
    pub s_mode: bool,
    pub sum: bool,
    pub mxr: bool,
}

/// Walk the (at most) two-level Sv32 page table and translate `vaddr` for
/// the given access kind, returning the physical address or the exact
/// fault to raise.
pub fn translate<S: PageTableSource>(ram: &mut S, env: TranslateEnv, vaddr: u32, kind: AccessKind) -> Result<u32, TranslateFault> {
    let Some(root_ppn) = env.root_ppn else {
        return Ok(vaddr);
    };

    let (access_fault, page_fault) = match kind {
        AccessKind::Fetch => (Exception::InstructionAccessFault, Exception::InstructionPageFault),
        AccessKind::Load => (Exception::LoadAccessFault, Exception::LoadPageFault),
        AccessKind::Store => (Exception::StoreOrAmoAccessFault, Exception::StoreOrAmoPageFault),
    };
    let fault = |exception: Exception| TranslateFault { exception, vaddr };

    let access_bits = match kind {
        AccessKind::Fetch => EntryFlags::EXECUTE,
        AccessKind::Load if env.mxr => EntryFlags::READ | EntryFlags::EXECUTE,
        AccessKind::Load => EntryFlags::READ,
        AccessKind::Store => EntryFlags::WRITE,
    };
    let set_bits = match kind {
        AccessKind::Store => EntryFlags::ACCESSED | EntryFlags::DIRTY,
        _ => EntryFlags::ACCESSED,
    };
    // SUM lets S-mode touch U-pages on loads/stores but never on fetches.
    let skip_privilege_test = env.sum && env.s_mode && kind != AccessKind::Fetch;

    let vpn = vaddr >> 12;
    let vpn1 = (vpn >> 10) & 0x3ff;
    let vpn0 = vpn & 0x3ff;

    let level1 = ram
        .page_table_mut(root_ppn)
        .ok_or_else(|| fault(access_fault))?;
    let pte1 = PageTableEntry(level1[vpn1 as usize]);

    if pte1.is_malformed() {
        return Err(fault(page_fault));
    }

    let (pte_ref_ppn, leaf_pte, entry_loc): (u32, PageTableEntry, EntryLoc) = if pte1.is_leaf() {
        // Superpage: PPN[0] must be zero, and the low 10 bits of the
        // vaddr splice into the physical address directly.
        if pte1.raw_ppn() & 0x3ff != 0 {
            return Err(fault(page_fault));
        }
        (root_ppn, pte1, EntryLoc::Level1 { index: vpn1 as usize })
    } else {
        let next_ppn = pte1.raw_ppn();
        let level0 = ram
            .page_table_mut(next_ppn)
            .ok_or_else(|| fault(access_fault))?;
        let pte0 = PageTableEntry(level0[vpn0 as usize]);
        if pte0.is_malformed() || !pte0.is_leaf() {
            return Err(fault(page_fault));
        }
        (next_ppn, pte0, EntryLoc::Level0 { table_ppn: next_ppn, index: vpn0 as usize })
    };
    let _ = pte_ref_ppn;

    if leaf_pte.raw_ppn() >> 20 != 0 {
        return Err(fault(page_fault));
    }
    if !leaf_pte.flags().intersects(access_bits) {
        return Err(fault(page_fault));
    }
    let is_user_page = leaf_pte.flags().contains(EntryFlags::USER);
    if is_user_page == env.s_mode && !skip_privilege_test {
        return Err(fault(page_fault));
    }

    let updated = leaf_pte.with_flags(set_bits);
    if updated.0 != leaf_pte.0 {
        match entry_loc {
            EntryLoc::Level1 { index } => {
                let level1 = ram.page_table_mut(root_ppn).expect("root validated above");
                level1[index] = updated.0;
            }
            EntryLoc::Level0 { table_ppn, index } => {
                let level0 = ram.page_table_mut(table_ppn).expect("leaf table validated above");
                level0[index] = updated.0;
            }
        }
    }

    let ppn = match entry_loc {
        EntryLoc::Level1 { .. } => leaf_pte.ppn() | vpn0, // superpage: splice low 10 bits
        EntryLoc::Level0 { .. } => leaf_pte.ppn(),
    };
    let page_offset = vaddr & 0xfff;
    Ok((ppn << 12) | page_offset)
}

#[derive(Clone, Copy)]
enum EntryLoc {
    Level1 { index: usize },
    Level0 { table_ppn: u32, index: usize },
}

/// Pre-validate a root page-table pointer at the moment `satp` is written.
/// Returns `Some(ppn)` if the referenced page is reachable within RAM,
/// `None` otherwise — the caller (the CSR-write path in `rv-hart`) stores
/// `None` to leave translation disabled rather than cache a dangling root.
pub fn validate_root<S: PageTableSource>(ram: &mut S, ppn: u32) -> Option<u32> {
    ram.page_table_mut(ppn).map(|_| ppn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_ram::RAM_BASE;

    fn env(root_ppn: Option<u32>) -> TranslateEnv {
        TranslateEnv {
            root_ppn,
            s_mode: true,
            sum: false,
            mxr: false,
        }
    }

    #[test]
    fn bare_mode_is_identity() {
        let mut ram = Ram::new(8192);
        let out = translate(&mut ram, env(None), 0x1234, AccessKind::Load).unwrap();
        assert_eq!(out, 0x1234);
    }

    #[test]
    fn invalid_root_pte_raises_page_fault() {
        let mut ram = Ram::new(8192);
        let root_ppn = RAM_BASE / 4096;
        let fault = translate(&mut ram, env(Some(root_ppn)), 0x1000, AccessKind::Load).unwrap_err();
        assert_eq!(fault.exception, Exception::LoadPageFault);
        assert_eq!(fault.vaddr, 0x1000);
    }

    #[test]
    fn superpage_leaf_translates_with_spliced_offset() {
        let mut ram = Ram::new(4096 * 4);
        let root_ppn = RAM_BASE / 4096;
        // leaf at level 1, vpn1 index 2: vaddr 0x0080_0000 maps vpn1=2
        let vaddr = 2u32 << 22;
        let target_ppn: u32 = 0x100; // arbitrary, PPN0 must be zero
        let pte = EntryFlags::VALID | EntryFlags::READ;
        let level1 = ram.page_table_mut(root_ppn).unwrap();
        level1[2] = (target_ppn << 10) | pte.bits();

        let out = translate(&mut ram, env(Some(root_ppn)), vaddr | 0x234, AccessKind::Load).unwrap();
        assert_eq!(out, (target_ppn << 12) | 0x234);
    }

    #[test]
    fn sets_accessed_and_dirty_on_store() {
        let mut ram = Ram::new(4096 * 4);
        let root_ppn = RAM_BASE / 4096;
        let target_ppn = root_ppn + 1;
        let pte = EntryFlags::VALID | EntryFlags::READ | EntryFlags::WRITE;
        {
            let level1 = ram.page_table_mut(root_ppn).unwrap();
            level1[0] = (target_ppn << 10) | pte.bits();
        }
        translate(&mut ram, env(Some(root_ppn)), 0, AccessKind::Store).unwrap();
        let level1 = ram.page_table_mut(root_ppn).unwrap();
        let updated = PageTableEntry(level1[0]);
        assert!(updated.flags().contains(EntryFlags::ACCESSED));
        assert!(updated.flags().contains(EntryFlags::DIRTY));
    }

    #[test]
    fn supervisor_page_rejects_user_mode() {
        let mut ram = Ram::new(4096 * 4);
        let root_ppn = RAM_BASE / 4096;
        let target_ppn = root_ppn + 1;
        let pte = EntryFlags::VALID | EntryFlags::READ; // no USER bit
        {
            let level1 = ram.page_table_mut(root_ppn).unwrap();
            level1[0] = (target_ppn << 10) | pte.bits();
        }
        let mut e = env(Some(root_ppn));
        e.s_mode = false;
        let fault = translate(&mut ram, e, 0, AccessKind::Load).unwrap_err();
        assert_eq!(fault.exception, Exception::LoadPageFault);
    }
}
