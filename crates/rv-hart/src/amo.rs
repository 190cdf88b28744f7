use crate::bus::SystemBus;
use crate::state::{Hart, StoreRecord};
use rv_isa::decode::RawFields;
use rv_isa::trap::Exception;
use rv_isa::{AmoOp, LoadStoreWidth};

impl Hart {
    /// Execute an `AMO` instruction (`funct3` must be `0b010`, word width).
    /// Returns the store record to report to the scheduler if this
    /// instruction performed a write (every variant except a failing SC
    /// or a plain LR).
    pub(crate) fn execute_amo<B: SystemBus>(
        &mut self,
        bus: &mut B,
        insn: u32,
        fields: RawFields,
    ) -> Option<StoreRecord> {
        if fields.funct3 != 0b010 {
            self.raise(Exception::IllegalInstruction, 0);
            return None;
        }
        let Some(op) = AmoOp::decode(fields.funct5(insn)) else {
            self.raise(Exception::IllegalInstruction, 0);
            return None;
        };
        let addr = self.read_gpr(fields.rs1);

        match op {
            AmoOp::LrW => {
                if fields.rs2 != 0 {
                    self.raise(Exception::IllegalInstruction, 0);
                    return None;
                }
                if addr & 0b11 != 0 {
                    self.raise(Exception::LoadAddressMisaligned, addr);
                    return None;
                }
                let Some(value) = self.mem_load(bus, addr, LoadStoreWidth::Word) else {
                    return None;
                };
                self.reservation = Some(addr);
                self.write_gpr(fields.rd, value);
                None
            }
            AmoOp::ScW => {
                if addr & 0b11 != 0 {
                    self.raise(Exception::StoreOrAmoAddressMisaligned, addr);
                    return None;
                }
                if self.reservation != Some(addr) {
                    self.reservation = None;
                    self.write_gpr(fields.rd, 1);
                    return None;
                }
                self.reservation = None;
                let rs2 = self.read_gpr(fields.rs2);
                let stored = self.mem_store(bus, addr, LoadStoreWidth::Word, rs2)?;
                self.write_gpr(fields.rd, 0);
                Some(stored)
            }
            other => {
                let rs2 = self.read_gpr(fields.rs2);
                let loaded = self.mem_load(bus, addr, LoadStoreWidth::Word)?;
                self.write_gpr(fields.rd, loaded);
                let combined = match other {
                    AmoOp::Swap => rs2,
                    AmoOp::Add => loaded.wrapping_add(rs2),
                    AmoOp::Xor => loaded ^ rs2,
                    AmoOp::And => loaded & rs2,
                    AmoOp::Or => loaded | rs2,
                    AmoOp::Min => {
                        if (loaded as i32) < (rs2 as i32) {
                            loaded
                        } else {
                            rs2
                        }
                    }
                    AmoOp::Max => {
                        if (loaded as i32) > (rs2 as i32) {
                            loaded
                        } else {
                            rs2
                        }
                    }
                    AmoOp::MinU => loaded.min(rs2),
                    AmoOp::MaxU => loaded.max(rs2),
                    AmoOp::LrW | AmoOp::ScW => unreachable!(),
                };
                self.mem_store(bus, addr, LoadStoreWidth::Word, combined)
            }
        }
    }
}
