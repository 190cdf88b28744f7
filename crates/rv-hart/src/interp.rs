use crate::bus::SystemBus;
use crate::state::{Hart, HartError, StepOutcome, StoreRecord};
use rv_isa::decode::{self, RawFields};
use rv_isa::trap::{Exception, Interrupt};
use rv_isa::{LoadStoreWidth, Opcode, Privileged};
use rv_mmu::{self, AccessKind, TranslateEnv};

impl Hart {
    pub(crate) fn raise(&mut self, exc: Exception, val: u32) {
        self.error = HartError::Exception { cause: exc.code(), val };
    }

    fn translate_env(&self) -> TranslateEnv {
        use rv_isa::csr::sstatus_bits;
        TranslateEnv {
            root_ppn: self.root_ppn,
            s_mode: self.s_mode,
            sum: self.sstatus & sstatus_bits::SUM != 0,
            mxr: self.sstatus & sstatus_bits::MXR != 0,
        }
    }

    pub(crate) fn mem_fetch<B: SystemBus>(&mut self, bus: &mut B, vaddr: u32) -> Option<u32> {
        let paddr = match rv_mmu::translate(bus, self.translate_env(), vaddr, AccessKind::Fetch) {
            Ok(p) => p,
            Err(f) => {
                self.raise(f.exception, f.vaddr);
                return None;
            }
        };
        match bus.fetch(paddr) {
            Ok(word) => Some(word),
            Err(e) => {
                self.raise(e, vaddr);
                None
            }
        }
    }

    pub(crate) fn mem_load<B: SystemBus>(&mut self, bus: &mut B, vaddr: u32, width: LoadStoreWidth) -> Option<u32> {
        let paddr = match rv_mmu::translate(bus, self.translate_env(), vaddr, AccessKind::Load) {
            Ok(p) => p,
            Err(f) => {
                self.raise(f.exception, f.vaddr);
                return None;
            }
        };
        match bus.load(paddr, width) {
            Ok(raw) => Some(extend_load(raw, width)),
            Err(e) => {
                self.raise(e, vaddr);
                None
            }
        }
    }

    pub(crate) fn mem_store<B: SystemBus>(
        &mut self,
        bus: &mut B,
        vaddr: u32,
        width: LoadStoreWidth,
        value: u32,
    ) -> Option<StoreRecord> {
        let paddr = match rv_mmu::translate(bus, self.translate_env(), vaddr, AccessKind::Store) {
            Ok(p) => p,
            Err(f) => {
                self.raise(f.exception, f.vaddr);
                return None;
            }
        };
        match bus.store(paddr, width, value) {
            Ok(()) => Some(StoreRecord { word_addr: paddr & !0x3 }),
            Err(e) => {
                self.raise(e, vaddr);
                None
            }
        }
    }

    /// Invalidate this hart's own reservation if a (possibly sibling's)
    /// store overlapped it. Mirrors the original's "walk the hart list on
    /// every store" invalidation; here the scheduler calls this once per
    /// store for every *other* hart while `rv-hart`'s own SC path clears
    /// its own reservation directly.
    pub fn invalidate_reservation_if_overlapping(&mut self, word_addr: u32) {
        if self.reservation == Some(word_addr) {
            self.reservation = None;
        }
    }

    /// Advance exactly one instruction, or take a pending interrupt, or
    /// (if `error` is already set) do nothing. See the crate docs for the
    /// full contract.
    pub fn step<B: SystemBus>(&mut self, bus: &mut B) -> StepOutcome {
        if !matches!(self.error, HartError::None) {
            return StepOutcome::Stepped { store: None };
        }

        if self.has_pending_enabled_interrupt() {
            if let Some(irq) = Interrupt::select_pending(self.sip, self.sie) {
                self.current_pc = self.pc;
                self.trap_enter(irq.scause(), 0);
                return StepOutcome::Stepped { store: None };
            }
        }

        self.current_pc = self.pc;
        let Some(insn) = self.mem_fetch(bus, self.current_pc) else {
            return self.finish_exception();
        };

        let fields = RawFields::extract(insn);
        let Some(opcode) = Opcode::decode(insn) else {
            self.raise(Exception::IllegalInstruction, 0);
            return self.finish_exception();
        };

        let mut next_pc = self.current_pc.wrapping_add(4);
        let mut store = None;
        let mut wfi = false;

        match opcode {
            Opcode::OpImm => self.execute_op_imm(insn, fields),
            Opcode::Op => self.execute_op(fields),
            Opcode::Lui => self.write_gpr(fields.rd, decode::imm_u(insn) as u32),
            Opcode::AuiPc => self.write_gpr(fields.rd, self.current_pc.wrapping_add(decode::imm_u(insn) as u32)),
            Opcode::Jal => {
                let target = self.current_pc.wrapping_add(decode::imm_j(insn) as u32);
                self.write_gpr(fields.rd, next_pc);
                if target & 0x3 != 0 {
                    self.raise(Exception::InstructionAddressMisaligned, target);
                    return self.finish_exception();
                }
                next_pc = target;
            }
            Opcode::Jalr => {
                let target = self.read_gpr(fields.rs1).wrapping_add(decode::imm_i(insn) as u32) & !1;
                self.write_gpr(fields.rd, next_pc);
                if target & 0x3 != 0 {
                    self.raise(Exception::InstructionAddressMisaligned, target);
                    return self.finish_exception();
                }
                next_pc = target;
            }
            Opcode::Branch => {
                if self.branch_taken(insn, fields) {
                    let target = self.current_pc.wrapping_add(decode::imm_b(insn) as u32);
                    if target & 0x3 != 0 {
                        self.raise(Exception::InstructionAddressMisaligned, target);
                        return self.finish_exception();
                    }
                    next_pc = target;
                }
            }
            Opcode::Load => {
                let Some(width) = LoadStoreWidth::decode_load(fields.funct3) else {
                    self.raise(Exception::IllegalInstruction, 0);
                    return self.finish_exception();
                };
                let vaddr = self.read_gpr(fields.rs1).wrapping_add(decode::imm_i(insn) as u32);
                let Some(value) = self.mem_load(bus, vaddr, width) else {
                    return self.finish_exception();
                };
                self.write_gpr(fields.rd, value);
            }
            Opcode::Store => {
                let Some(width) = LoadStoreWidth::decode_store(fields.funct3) else {
                    self.raise(Exception::IllegalInstruction, 0);
                    return self.finish_exception();
                };
                let vaddr = self.read_gpr(fields.rs1).wrapping_add(decode::imm_s(insn) as u32);
                let rs2 = self.read_gpr(fields.rs2);
                let truncated = truncate_store(rs2, width);
                match self.mem_store(bus, vaddr, width, truncated) {
                    Some(rec) => store = Some(rec),
                    None => return self.finish_exception(),
                }
            }
            Opcode::MiscMem => { /* FENCE / FENCE.I: no-op, no TLB kept */ }
            Opcode::System => match self.execute_system(bus, insn, fields, &mut next_pc, &mut wfi) {
                SystemOutcome::Ok => {}
                SystemOutcome::Fault => return self.finish_exception(),
                SystemOutcome::Ecall => {
                    self.pc = next_pc;
                    self.retired = self.retired.wrapping_add(1);
                    return StepOutcome::Ecall;
                }
            },
            Opcode::Amo => {
                store = self.execute_amo(bus, insn, fields);
                if !matches!(self.error, HartError::None) {
                    return self.finish_exception();
                }
            }
        }

        self.pc = next_pc;
        self.retired = self.retired.wrapping_add(1);

        if wfi {
            StepOutcome::WaitForInterrupt
        } else {
            StepOutcome::Stepped { store }
        }
    }

    /// A single exit point for every early-return path: if `error` carries
    /// a freshly raised exception, enter the trap handler now (this also
    /// clears `error`, mirroring a hardware trap). `pc` was never advanced
    /// past `current_pc` on any of these paths, so `sepc` lands correctly.
    fn finish_exception(&mut self) -> StepOutcome {
        if let HartError::Exception { cause, val } = self.error {
            self.trap_enter(cause, val);
        }
        StepOutcome::Stepped { store: None }
    }

    fn branch_taken(&self, insn: u32, fields: RawFields) -> bool {
        let a = self.read_gpr(fields.rs1);
        let b = self.read_gpr(fields.rs2);
        match fields.funct3 {
            0b000 => a == b,             // BEQ
            0b001 => a != b,             // BNE
            0b100 => (a as i32) < (b as i32), // BLT
            0b101 => (a as i32) >= (b as i32), // BGE
            0b110 => a < b,              // BLTU
            0b111 => a >= b,             // BGEU
            _ => {
                let _ = insn;
                false
            }
        }
    }

    fn execute_op_imm(&mut self, insn: u32, fields: RawFields) {
        let rs1 = self.read_gpr(fields.rs1);
        let imm = decode::imm_i(insn);
        let result = match fields.funct3 {
            0b000 => rs1.wrapping_add(imm as u32),             // ADDI
            0b010 => u32::from((rs1 as i32) < imm),             // SLTI
            0b011 => u32::from(rs1 < imm as u32),               // SLTIU
            0b100 => rs1 ^ imm as u32,                          // XORI
            0b110 => rs1 | imm as u32,                          // ORI
            0b111 => rs1 & imm as u32,                          // ANDI
            0b001 => rs1 << (imm as u32 & 0x1f),                // SLLI
            0b101 => {
                if insn & (1 << 30) != 0 {
                    ((rs1 as i32) >> (imm as u32 & 0x1f)) as u32 // SRAI
                } else {
                    rs1 >> (imm as u32 & 0x1f) // SRLI
                }
            }
            _ => unreachable!(),
        };
        self.write_gpr(fields.rd, result);
    }

    fn execute_op(&mut self, fields: RawFields) {
        let a = self.read_gpr(fields.rs1);
        let b = self.read_gpr(fields.rs2);
        let result = if fields.funct7 == 0b0000001 {
            self.execute_m_extension(fields.funct3, a, b)
        } else {
            match (fields.funct3, fields.funct7) {
                (0b000, 0b0100000) => a.wrapping_sub(b), // SUB
                (0b000, _) => a.wrapping_add(b),         // ADD
                (0b001, _) => a << (b & 0x1f),           // SLL
                (0b010, _) => u32::from((a as i32) < (b as i32)), // SLT
                (0b011, _) => u32::from(a < b),          // SLTU
                (0b100, _) => a ^ b,                     // XOR
                (0b101, 0b0100000) => ((a as i32) >> (b & 0x1f)) as u32, // SRA
                (0b101, _) => a >> (b & 0x1f),            // SRL
                (0b110, _) => a | b,                      // OR
                (0b111, _) => a & b,                      // AND
                _ => 0,
            }
        };
        self.write_gpr(fields.rd, result);
    }

    fn execute_m_extension(&self, funct3: u32, a: u32, b: u32) -> u32 {
        let (a_s, b_s) = (a as i32, b as i32);
        match funct3 {
            0b000 => a.wrapping_mul(b), // MUL
            0b001 => ((a_s as i64).wrapping_mul(b_s as i64) >> 32) as u32, // MULH
            0b010 => ((a_s as i64).wrapping_mul(b as i64) >> 32) as u32, // MULHSU
            0b011 => (((a as u64).wrapping_mul(b as u64)) >> 32) as u32, // MULHU
            0b100 => {
                // DIV
                if b == 0 {
                    u32::MAX
                } else if a_s == i32::MIN && b_s == -1 {
                    i32::MIN as u32
                } else {
                    (a_s.wrapping_div(b_s)) as u32
                }
            }
            0b101 => {
                // DIVU
                if b == 0 {
                    u32::MAX
                } else {
                    a / b
                }
            }
            0b110 => {
                // REM
                if b == 0 {
                    a
                } else if a_s == i32::MIN && b_s == -1 {
                    0
                } else {
                    (a_s.wrapping_rem(b_s)) as u32
                }
            }
            0b111 => {
                // REMU
                if b == 0 {
                    a
                } else {
                    a % b
                }
            }
            _ => 0,
        }
    }

    /// `SYSTEM` opcode dispatch: either a CSR instruction or (`funct3==0`)
    /// one of the privileged forms handled by `execute_privileged`.
    fn execute_system<B: SystemBus>(
        &mut self,
        bus: &mut B,
        insn: u32,
        fields: RawFields,
        next_pc: &mut u32,
        wfi: &mut bool,
    ) -> SystemOutcome {
        if fields.funct3 == 0 {
            return self.execute_privileged(insn, fields, next_pc, wfi);
        }

        let addr = decode::csr_addr(insn);
        let (old, write_value, do_write) = match fields.funct3 {
            0b001 => {
                // CSRRW
                let old = if fields.rd != 0 {
                    match self.csr_read(bus, addr) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            self.raise(e, 0);
                            return SystemOutcome::Fault;
                        }
                    }
                } else {
                    None
                };
                (old, self.read_gpr(fields.rs1), true)
            }
            0b010 | 0b011 => {
                // CSRRS / CSRRC
                let old = match self.csr_read(bus, addr) {
                    Ok(v) => v,
                    Err(e) => {
                        self.raise(e, 0);
                        return SystemOutcome::Fault;
                    }
                };
                let mask = self.read_gpr(fields.rs1);
                let new = if fields.funct3 == 0b010 { old | mask } else { old & !mask };
                (Some(old), new, fields.rs1 != 0)
            }
            0b101 => {
                // CSRRWI
                let old = if fields.rd != 0 {
                    match self.csr_read(bus, addr) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            self.raise(e, 0);
                            return SystemOutcome::Fault;
                        }
                    }
                } else {
                    None
                };
                (old, decode::csr_uimm(insn), true)
            }
            0b110 | 0b111 => {
                // CSRRSI / CSRRCI
                let old = match self.csr_read(bus, addr) {
                    Ok(v) => v,
                    Err(e) => {
                        self.raise(e, 0);
                        return SystemOutcome::Fault;
                    }
                };
                let uimm = decode::csr_uimm(insn);
                let new = if fields.funct3 == 0b110 { old | uimm } else { old & !uimm };
                (Some(old), new, uimm != 0)
            }
            _ => {
                self.raise(Exception::IllegalInstruction, 0);
                return SystemOutcome::Fault;
            }
        };

        if do_write {
            if let Err(e) = self.csr_write(bus, addr, write_value) {
                self.raise(e, 0);
                return SystemOutcome::Fault;
            }
        }
        if let Some(old) = old {
            self.write_gpr(fields.rd, old);
        }
        SystemOutcome::Ok
    }

    /// An S-mode `ECALL` is not trapped like a real exception here: this
    /// platform has no M-mode firmware for the guest's `stvec` to ever
    /// catch it, so the scheduler handles it inline (see
    /// [`crate::StepOutcome::Ecall`]). A U-mode `ECALL` is the guest
    /// kernel's own syscall path and must go through the normal trap
    /// pipeline into its own `stvec` handler, exactly like `EBREAK`.
    fn execute_privileged(&mut self, insn: u32, fields: RawFields, next_pc: &mut u32, wfi: &mut bool) -> SystemOutcome {
        let imm = decode::csr_addr(insn); // insn[31:20], needed only to tell ECALL from EBREAK
        let Some(p) = Privileged::decode(fields.funct7, fields.rs2, imm) else {
            self.raise(Exception::IllegalInstruction, 0);
            return SystemOutcome::Fault;
        };
        match p {
            Privileged::Ecall if self.s_mode => SystemOutcome::Ecall,
            Privileged::Ecall => {
                self.raise(Exception::EnvironmentCallFromUMode, 0);
                SystemOutcome::Fault
            }
            Privileged::Ebreak => {
                self.raise(Exception::Breakpoint, self.current_pc);
                SystemOutcome::Fault
            }
            Privileged::Sret => {
                self.sret();
                *next_pc = self.pc;
                SystemOutcome::Ok
            }
            Privileged::Wfi => {
                *wfi = true;
                SystemOutcome::Ok
            }
            Privileged::SfenceVma => SystemOutcome::Ok,
        }
    }
}

/// Outcome of dispatching a `SYSTEM`-opcode instruction.
enum SystemOutcome {
    Ok,
    Fault,
    Ecall,
}

fn extend_load(raw: u32, width: LoadStoreWidth) -> u32 {
    match width {
        LoadStoreWidth::Byte => (raw as u8 as i8) as i32 as u32,
        LoadStoreWidth::Half => (raw as u16 as i16) as i32 as u32,
        LoadStoreWidth::Word => raw,
        LoadStoreWidth::ByteUnsigned => raw as u8 as u32,
        LoadStoreWidth::HalfUnsigned => raw as u16 as u32,
    }
}

fn truncate_store(value: u32, width: LoadStoreWidth) -> u32 {
    match width {
        LoadStoreWidth::Byte | LoadStoreWidth::ByteUnsigned => value & 0xff,
        LoadStoreWidth::Half | LoadStoreWidth::HalfUnsigned => value & 0xffff,
        LoadStoreWidth::Word => value,
    }
}
