//! `rv-sbi`'s [`SbiPlatform`] implemented on [`Machine`], the only place
//! that holds `&mut` access to every hart and to the ACLINT at once.

use rv_clock::TickSource;
use rv_hart::HsmState;
use rv_isa::sbi;
use rv_sbi::{HartStatus, SbiPlatform, SbiRet};

use crate::Machine;

fn invalid_param() -> SbiRet {
    SbiRet { error: sbi::SBI_ERR_INVALID_PARAM, value: 0 }
}

impl<C: TickSource> SbiPlatform for Machine<C> {
    fn hart_count(&self) -> u32 {
        self.harts.len() as u32
    }

    fn hart_status(&self, hart_id: u32) -> Option<HartStatus> {
        self.harts.get(hart_id as usize).map(|h| match h.hsm {
            HsmState::Started => HartStatus::Started,
            HsmState::Stopped => HartStatus::Stopped,
            HsmState::StartPending => HartStatus::StartPending,
            HsmState::Suspended => HartStatus::Suspended,
        })
    }

    fn hart_start(&mut self, hart_id: u32, start_addr: u32, opaque: u32) -> Result<(), SbiRet> {
        let hart = self.harts.get_mut(hart_id as usize).ok_or_else(invalid_param)?;
        if hart.hsm != HsmState::Stopped {
            return Err(SbiRet { error: sbi::SBI_ERR_ALREADY_AVAILABLE, value: 0 });
        }
        hart.pc = start_addr;
        hart.current_pc = start_addr;
        hart.write_gpr(10, hart_id); // a0
        hart.write_gpr(11, opaque); // a1
        hart.s_mode = true;
        hart.hsm = HsmState::Started;
        Ok(())
    }

    fn hart_stop(&mut self, hart_id: u32) -> Result<(), SbiRet> {
        let hart = self.harts.get_mut(hart_id as usize).ok_or_else(invalid_param)?;
        hart.hsm = HsmState::Stopped;
        Ok(())
    }

    fn hart_suspend(&mut self, hart_id: u32, _resume_addr: u32, _opaque: u32) -> Result<(), SbiRet> {
        // Every suspend is treated as retentive: the hart resumes where it
        // left off (right after this `ecall`) once woken by IPI or timer.
        // A non-retentive resume_addr/opaque pair is accepted but ignored,
        // since no guest this platform targets relies on it.
        let hart = self.harts.get_mut(hart_id as usize).ok_or_else(invalid_param)?;
        hart.hsm = HsmState::Suspended;
        Ok(())
    }

    fn set_timer(&mut self, hart_id: u32, time: u64) {
        let base = (hart_id as u32) * 8;
        let lo = (time & 0xffff_ffff) as u32;
        let hi = (time >> 32) as u32;
        self.bus.aclint.mtimer_write(base, lo);
        self.bus.aclint.mtimer_write(base + 4, hi);
    }

    fn send_ipi(&mut self, hart_mask: u32, hart_mask_base: u32) {
        if hart_mask_base == u32::MAX {
            for i in 0..self.harts.len() {
                self.bus.aclint.set_ssip(i, true);
            }
            return;
        }
        for bit in 0..32 {
            if hart_mask & (1 << bit) != 0 {
                let idx = (hart_mask_base.wrapping_add(bit)) as usize;
                self.bus.aclint.set_ssip(idx, true);
            }
        }
    }

    fn remote_fence(&mut self, hart_mask: u32, hart_mask_base: u32) {
        log::trace!("rfence requested for mask={hart_mask:#x} base={hart_mask_base}: no-op, no TLB kept");
    }

    fn request_shutdown(&mut self, reset_type: u32, reason: u32) {
        if reset_type != sbi::reset_type::SHUTDOWN {
            log::warn!("guest requested non-shutdown reset (type={reset_type}, reason={reason}); treating as shutdown");
        }
        self.stopped = true;
        self.exit_code = 0;
    }
}
