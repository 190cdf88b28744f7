use crate::bus::SystemBus;
use crate::state::Hart;
use rv_isa::csr::{self, sip_bits};
use rv_isa::trap::Exception;

impl Hart {
    /// Read-only view of `sstatus`/`sie`/`sip` plus the counters; returns
    /// `IllegalInstruction` for anything this model doesn't implement.
    pub(crate) fn csr_read<B: SystemBus>(&self, _bus: &mut B, addr: u32) -> Result<u32, Exception> {
        if let Some(value) = self.read_counter(addr) {
            if !self.counter_accessible(addr) {
                return Err(Exception::IllegalInstruction);
            }
            return Ok(value);
        }
        Ok(match addr {
            csr::SSTATUS => self.sstatus,
            csr::SIE => self.sie,
            csr::STVEC => self.stvec_base | u32::from(self.stvec_vectored),
            csr::SCOUNTEREN => self.scounteren,
            csr::SENVCFG => 0,
            csr::SSCRATCH => self.sscratch,
            csr::SEPC => self.sepc,
            csr::SCAUSE => self.scause,
            csr::STVAL => self.stval,
            csr::SIP => self.sip,
            csr::SATP => self.satp,
            _ => return Err(Exception::IllegalInstruction),
        })
    }

    /// Write a CSR. Needs `bus` only for the SATP root-validation path.
    pub(crate) fn csr_write<B: SystemBus>(&mut self, bus: &mut B, addr: u32, value: u32) -> Result<(), Exception> {
        if self.read_counter(addr).is_some() {
            // Counters are read-only to the guest in this model (no
            // performance-counter writes, per the stated non-goal).
            return Err(Exception::IllegalInstruction);
        }
        match addr {
            csr::SSTATUS => {
                const WRITABLE: u32 = csr::sstatus_bits::SIE
                    | csr::sstatus_bits::SPIE
                    | csr::sstatus_bits::SPP
                    | csr::sstatus_bits::SUM
                    | csr::sstatus_bits::MXR;
                self.sstatus = (self.sstatus & !WRITABLE) | (value & WRITABLE);
            }
            csr::SIE => {
                const WRITABLE: u32 = sip_bits::SSI | sip_bits::STI | sip_bits::SEI;
                self.sie = value & WRITABLE;
            }
            csr::STVEC => {
                self.stvec_base = value & !0x3;
                self.stvec_vectored = value & 0x1 != 0;
            }
            csr::SCOUNTEREN => self.scounteren = value,
            csr::SENVCFG => {}
            csr::SSCRATCH => self.sscratch = value,
            csr::SEPC => self.sepc = value & !0x3,
            csr::SCAUSE => self.scause = value,
            csr::STVAL => self.stval = value,
            csr::SIP => {
                // Only SSIP is guest-writable; STI/SEI are device-owned.
                const WRITABLE: u32 = sip_bits::SSI;
                self.sip = (self.sip & !WRITABLE) | (value & WRITABLE);
            }
            csr::SATP => self.write_satp(bus, value),
            _ => return Err(Exception::IllegalInstruction),
        }
        Ok(())
    }

    fn write_satp<B: SystemBus>(&mut self, bus: &mut B, value: u32) {
        use rv_isa::csr::satp_bits;
        let bare = value >> satp_bits::MODE_SHIFT == 0;
        if bare {
            self.root_ppn = None;
            self.satp = 0;
            return;
        }
        let ppn = value & satp_bits::PPN_MASK;
        match rv_mmu::validate_root(bus, ppn) {
            Some(validated) => {
                self.root_ppn = Some(validated);
                self.satp = (1 << satp_bits::MODE_SHIFT) | validated;
            }
            None => {
                // Root unreachable: disable translation but leave the
                // satp register itself at its previous value (an
                // implementation choice documented in DESIGN.md).
                self.root_ppn = None;
            }
        }
    }

    fn read_counter(&self, addr: u32) -> Option<u32> {
        if (csr::COUNTER_LO_BASE..csr::COUNTER_LO_BASE + csr::COUNTER_RANGE_LEN).contains(&addr) {
            Some(self.retired as u32)
        } else if (csr::COUNTER_HI_BASE..csr::COUNTER_HI_BASE + csr::COUNTER_RANGE_LEN).contains(&addr) {
            Some((self.retired >> 32) as u32)
        } else {
            None
        }
    }

    fn counter_accessible(&self, addr: u32) -> bool {
        if self.s_mode {
            return true;
        }
        let idx = addr & 0x1f;
        self.scounteren & (1 << idx) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_ram::Ram;

    struct TestBus(Ram);
    impl rv_mmu::PageTableSource for TestBus {
        fn page_table_mut(&mut self, ppn: u32) -> Option<&mut [u32; rv_ram::PTES_PER_PAGE]> {
            self.0.page_table_mut(ppn)
        }
    }
    impl SystemBus for TestBus {
        fn fetch(&mut self, paddr: u32) -> Result<u32, Exception> {
            self.0.read_u32(paddr).ok_or(Exception::InstructionAccessFault)
        }
        fn load(&mut self, paddr: u32, _w: rv_isa::LoadStoreWidth) -> Result<u32, Exception> {
            self.0.read_u32(paddr).ok_or(Exception::LoadAccessFault)
        }
        fn store(&mut self, paddr: u32, _w: rv_isa::LoadStoreWidth, v: u32) -> Result<(), Exception> {
            self.0.write_u32(paddr, v).ok_or(Exception::StoreOrAmoAccessFault)
        }
    }

    #[test]
    fn csrrs_rs1_zero_is_pure_read() {
        let mut h = Hart::reset(0, 0x8000_0000, 0);
        let mut bus = TestBus(Ram::new(4096 * 4));
        h.sscratch = 0x1234;
        let before = h.csr_read(&mut bus, csr::SSCRATCH).unwrap();
        // CSRRS with rs1=0 never calls csr_write; model that directly.
        assert_eq!(before, 0x1234);
        assert_eq!(h.sscratch, 0x1234);
    }

    #[test]
    fn sip_write_only_affects_ssi() {
        let mut h = Hart::reset(0, 0x8000_0000, 0);
        let mut bus = TestBus(Ram::new(4096 * 4));
        h.sip = sip_bits::STI; // device-set, guest didn't touch it
        h.csr_write(&mut bus, csr::SIP, sip_bits::SSI).unwrap();
        assert_eq!(h.sip, sip_bits::STI | sip_bits::SSI);
        h.csr_write(&mut bus, csr::SIP, 0).unwrap();
        assert_eq!(h.sip, sip_bits::STI);
    }

    #[test]
    fn satp_write_with_unreachable_root_disables_translation() {
        let mut h = Hart::reset(0, 0x8000_0000, 0);
        let mut bus = TestBus(Ram::new(4096));
        h.root_ppn = Some(999);
        h.csr_write(&mut bus, csr::SATP, (1u32 << 31) | 0xffff).unwrap();
        assert_eq!(h.root_ppn, None);
    }

    #[test]
    fn unimplemented_csr_is_illegal_instruction() {
        let h = Hart::reset(0, 0x8000_0000, 0);
        let mut bus = TestBus(Ram::new(4096));
        assert_eq!(h.csr_read(&mut bus, 0x000).unwrap_err(), Exception::IllegalInstruction);
    }
}
