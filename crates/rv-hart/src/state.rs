use rv_isa::csr::{sip_bits, sstatus_bits};

/// One RISC-V hardware thread's full architectural state.
///
/// Does not hold a back-pointer to its owning machine: SBI calls (IPI,
/// HSM start/stop, timer, system reset) are recognized here only as an
/// `ecall` exception; the scheduler in `rv-machine` — which already has
/// `&mut` access to every hart — performs the actual cross-hart effects.
/// See the crate-level docs for why.
pub struct Hart {
    pub hart_id: u32,

    pub gpr: [u32; 32],
    pub pc: u32,
    pub current_pc: u32,

    /// `Some(word_aligned_addr)` iff a live LR reservation is held.
    pub reservation: Option<u32>,

    pub retired: u64,

    pub sstatus: u32,
    pub sie: u32,
    pub sip: u32,
    pub sepc: u32,
    pub scause: u32,
    pub stval: u32,
    pub stvec_base: u32,
    pub stvec_vectored: bool,
    pub sscratch: u32,
    pub scounteren: u32,
    pub satp: u32,

    /// MMU cache: the validated root page-table's physical page number, or
    /// `None` when translation is off or the last `satp` write referenced
    /// an unreachable root. Modeled as a page number rather than a raw
    /// pointer since `Ram` is owned elsewhere and re-fetched per
    /// translation; see `rv-mmu`.
    pub root_ppn: Option<u32>,

    pub s_mode: bool,

    pub error: HartError,

    pub hsm: HsmState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HartError {
    #[default]
    None,
    Exception {
        cause: u32,
        val: u32,
    },
    UserStop,
}

/// Hart state management status, driven by the SBI HSM extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsmState {
    Started,
    Stopped,
    StartPending,
    /// Suspended in `wfi` or via `sbi_hart_suspend`; resumes on IPI or
    /// timer, or (for a non-retentive suspend) at `resume_pc`.
    Suspended,
}

/// What happened during one call to [`Hart::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The hart either retired an instruction, took a trap, or handled an
    /// interrupt injection; `hart.error` may now be set and the caller
    /// should inspect it. `store` is set when this step performed a
    /// successful memory write, so the scheduler can invalidate any
    /// sibling hart's overlapping LR reservation.
    Stepped { store: Option<StoreRecord> },
    /// The hart executed `wfi` and is surrendering the rest of its budget.
    WaitForInterrupt,
    /// The hart executed an `ecall` in S-mode. The instruction has already
    /// retired and `pc` already advanced past it — per the platform's SBI
    /// model there is no M-mode to trap into, so the scheduler reads
    /// `a0..a7` off the hart directly, dispatches through `rv-sbi`, and
    /// writes the result back to `a0`/`a1` before the hart's next step.
    Ecall,
}

/// Describes a completed store for cross-hart reservation invalidation.
/// `word_addr` is the store address masked to 4-byte granularity, matching
/// the granularity LR/SC reservations are tracked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRecord {
    pub word_addr: u32,
}

impl Hart {
    /// Machine reset value for hart 0: STARTED, pc at the kernel's load
    /// address, `a0=hart_id`, `a1=dtb_addr`. Other harts reset STOPPED and
    /// are given their start address/args later via `sbi_hart_start`.
    pub fn reset(hart_id: u32, pc: u32, a1: u32) -> Self {
        let mut gpr = [0u32; 32];
        gpr[10] = hart_id; // a0
        gpr[11] = a1; // a1
        Self {
            hart_id,
            gpr,
            pc,
            current_pc: pc,
            reservation: None,
            retired: 0,
            sstatus: 0,
            sie: 0,
            sip: 0,
            sepc: 0,
            scause: 0,
            stval: 0,
            stvec_base: 0,
            stvec_vectored: false,
            sscratch: 0,
            scounteren: 0,
            satp: 0,
            root_ppn: None,
            s_mode: true,
            error: HartError::None,
            hsm: if hart_id == 0 {
                HsmState::Started
            } else {
                HsmState::Stopped
            },
        }
    }

    pub fn read_gpr(&self, idx: u32) -> u32 {
        if idx == 0 {
            0
        } else {
            self.gpr[idx as usize]
        }
    }

    pub fn write_gpr(&mut self, idx: u32, value: u32) {
        if idx != 0 {
            self.gpr[idx as usize] = value;
        }
    }

    pub fn sie_bit(&self, bit: u32) -> bool {
        self.sstatus & bit != 0
    }

    pub fn has_pending_enabled_interrupt(&self) -> bool {
        let globally_enabled = self.sie_bit(sstatus_bits::SIE) || !self.s_mode;
        globally_enabled && (self.sip & self.sie) != 0
    }

    /// ACLINT/PLIC own these bits; the guest may only clear SSI via CSR
    /// writes to `sip`. Used by `rv-aclint`/`rv-plic` to set STI/SEI
    /// without going through the CSR-write path's masking.
    pub fn set_device_interrupt(&mut self, bit: u32, level: bool) {
        debug_assert!(bit == sip_bits::STI || bit == sip_bits::SEI || bit == sip_bits::SSI);
        if level {
            self.sip |= bit;
        } else {
            self.sip &= !bit;
        }
    }
}
