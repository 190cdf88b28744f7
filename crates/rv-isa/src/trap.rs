//! Exception and interrupt cause codes, matching the RISC-V privileged
//! spec's `scause` encoding exactly.

/// A synchronous exception cause. The numeric value is `scause` with the
/// interrupt bit (bit 31) clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    InstructionAddressMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    pub fn code(self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }
}

/// An asynchronous interrupt cause. The numeric value is `scause` with the
/// interrupt bit (bit 31) set; `code()` returns the cause index alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    SupervisorSoftware,
    SupervisorTimer,
    SupervisorExternal,
}

impl Interrupt {
    pub fn code(self) -> u32 {
        match self {
            Self::SupervisorSoftware => 1,
            Self::SupervisorTimer => 5,
            Self::SupervisorExternal => 9,
        }
    }

    /// `scause` value with the interrupt bit set.
    pub fn scause(self) -> u32 {
        (1 << 31) | self.code()
    }

    /// Pick the highest-numbered pending-and-enabled interrupt, per the
    /// fixed priority SEI(9) > STI(5) > SSI(1).
    pub fn select_pending(sip: u32, sie: u32) -> Option<Self> {
        let pending = sip & sie;
        if pending & super::csr::sip_bits::SEI != 0 {
            Some(Self::SupervisorExternal)
        } else if pending & super::csr::sip_bits::STI != 0 {
            Some(Self::SupervisorTimer)
        } else if pending & super::csr::sip_bits::SSI != 0 {
            Some(Self::SupervisorSoftware)
        } else {
            None
        }
    }
}
