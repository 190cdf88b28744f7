//! SBI call dispatch: Base, Timer, IPI, RFENCE, HSM and SRST.
//!
//! The original firmware only implements Base, Timer and (a single-hart)
//! system reset directly in its trap handler (see `handle_sbi_ecall` in the
//! upstream driver). IPI/RFENCE/HSM don't exist there because that machine
//! never has more than one hart; this crate keeps the same "one big match
//! on `a7`, one small match on `a6`" shape and adds the three multi-hart
//! extensions this machine needs, backed by a [`SbiPlatform`] the embedding
//! scheduler implements.

use rv_isa::sbi;

/// `a0`-`a7` at the point of `ecall`, RV32 so every argument is a plain
/// `u32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcallArgs {
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub a4: u32,
    pub a5: u32,
    pub a6: u32,
    pub a7: u32,
}

/// The standard SBI return pair, written back to `a0`/`a1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbiRet {
    pub error: i32,
    pub value: u32,
}

impl SbiRet {
    const fn ok(value: u32) -> Self {
        Self { error: sbi::SBI_SUCCESS, value }
    }
    const fn err(code: i32) -> Self {
        Self { error: code, value: 0 }
    }
}

/// Hart-status values returned by the HSM `hart_get_status` call, distinct
/// from [`rv_hart::HsmState`] because SBI additionally exposes a
/// stop-pending state this model never actually occupies (stop is
/// synchronous here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HartStatus {
    Started,
    Stopped,
    StartPending,
    Suspended,
}

impl HartStatus {
    fn code(self) -> u32 {
        match self {
            Self::Started => sbi::hsm_status::STARTED,
            Self::Stopped => sbi::hsm_status::STOPPED,
            Self::StartPending => sbi::hsm_status::START_PENDING,
            Self::Suspended => sbi::hsm_status::SUSPENDED,
        }
    }
}

/// Everything a `rv-sbi` call needs from the machine it's running in, kept
/// as a trait so the scheduler (the only thing that can see every hart at
/// once) supplies the implementation and this crate stays ignorant of
/// `rv-hart`/`rv-aclint`/`rv-machine`'s concrete types.
pub trait SbiPlatform {
    fn hart_count(&self) -> u32;

    /// Current SBI-visible status of `hart_id`, or `None` if out of range.
    fn hart_status(&self, hart_id: u32) -> Option<HartStatus>;

    /// Request `hart_id` begin executing at `start_addr` with `opaque` in
    /// `a1`. Fails if the hart is already started or out of range.
    fn hart_start(&mut self, hart_id: u32, start_addr: u32, opaque: u32) -> Result<(), SbiRet>;

    /// Stop the *calling* hart (`hart_id`). Always succeeds if the hart
    /// exists and is currently started.
    fn hart_stop(&mut self, hart_id: u32) -> Result<(), SbiRet>;

    /// Suspend the calling hart until its next interrupt.
    fn hart_suspend(&mut self, hart_id: u32, resume_addr: u32, opaque: u32) -> Result<(), SbiRet>;

    /// Program `hart_id`'s next timer interrupt for absolute `mtime` value.
    fn set_timer(&mut self, hart_id: u32, time: u64);

    /// Raise a supervisor software interrupt on every hart named by
    /// `hart_mask` (bit `i` set means `hart_mask_base + i`), or every hart
    /// if `hart_mask_base == u32::MAX`.
    fn send_ipi(&mut self, hart_mask: u32, hart_mask_base: u32);

    /// RFENCE has no real effect here since this machine never caches
    /// translations across a `step()` call; implementations should just
    /// record the request was seen (e.g. for logging) and return `Ok`.
    fn remote_fence(&mut self, hart_mask: u32, hart_mask_base: u32);

    /// The guest asked to shut down or reboot. `reset_type`/`reason` are
    /// passed through verbatim for the embedder to log or act on.
    fn request_shutdown(&mut self, reset_type: u32, reason: u32);
}

/// Dispatch one `ecall` trap taken in S-mode. `hart_id` identifies the
/// calling hart; `args` is that hart's `a0..a7` at the time of the trap.
pub fn handle_ecall<P: SbiPlatform>(platform: &mut P, hart_id: u32, args: EcallArgs) -> SbiRet {
    match args.a7 {
        sbi::EID_BASE => handle_base(platform, args.a6, args.a0),
        sbi::EID_TIMER => handle_timer(platform, hart_id, args.a6, args.a0, args.a1),
        sbi::EID_IPI => handle_ipi(platform, args.a6, args.a0, args.a1),
        sbi::EID_RFENCE => handle_rfence(platform, args.a6, args.a0, args.a1),
        sbi::EID_HSM => handle_hsm(platform, hart_id, args.a6, args.a0, args.a1, args.a2),
        sbi::EID_SRST => handle_srst(platform, args.a6, args.a0, args.a1),
        _ => SbiRet::err(sbi::SBI_ERR_NOT_SUPPORTED),
    }
}

mod hsm_fid {
    pub const HART_START: u32 = 0;
    pub const HART_STOP: u32 = 1;
    pub const HART_GET_STATUS: u32 = 2;
    pub const HART_SUSPEND: u32 = 3;
}

mod base_fid {
    pub const GET_SBI_SPEC_VERSION: u32 = 0;
    pub const GET_SBI_IMPL_ID: u32 = 1;
    pub const GET_SBI_IMPL_VERSION: u32 = 2;
    pub const PROBE_EXTENSION: u32 = 3;
    pub const GET_MVENDORID: u32 = 4;
    pub const GET_MARCHID: u32 = 5;
    pub const GET_MIMPID: u32 = 6;
}

fn handle_base<P: SbiPlatform>(_platform: &mut P, fid: u32, probe_eid: u32) -> SbiRet {
    match fid {
        base_fid::GET_SBI_SPEC_VERSION => SbiRet::ok((sbi::SPEC_VERSION_MAJOR << 24) | sbi::SPEC_VERSION_MINOR),
        base_fid::GET_SBI_IMPL_ID => SbiRet::ok(sbi::IMPL_ID),
        base_fid::GET_SBI_IMPL_VERSION => SbiRet::ok(sbi::IMPL_VERSION),
        base_fid::GET_MVENDORID | base_fid::GET_MARCHID | base_fid::GET_MIMPID => SbiRet::ok(0),
        base_fid::PROBE_EXTENSION => {
            let available = matches!(
                probe_eid,
                sbi::EID_BASE | sbi::EID_TIMER | sbi::EID_IPI | sbi::EID_RFENCE | sbi::EID_HSM | sbi::EID_SRST
            );
            SbiRet::ok(available as u32)
        }
        _ => SbiRet::err(sbi::SBI_ERR_NOT_SUPPORTED),
    }
}

mod timer_fid {
    pub const SET_TIMER: u32 = 0;
}

fn handle_timer<P: SbiPlatform>(platform: &mut P, hart_id: u32, fid: u32, time_lo: u32, time_hi: u32) -> SbiRet {
    match fid {
        timer_fid::SET_TIMER => {
            let time = (time_lo as u64) | ((time_hi as u64) << 32);
            platform.set_timer(hart_id, time);
            SbiRet::ok(0)
        }
        _ => SbiRet::err(sbi::SBI_ERR_NOT_SUPPORTED),
    }
}

mod ipi_fid {
    pub const SEND_IPI: u32 = 0;
}

fn handle_ipi<P: SbiPlatform>(platform: &mut P, fid: u32, hart_mask: u32, hart_mask_base: u32) -> SbiRet {
    match fid {
        ipi_fid::SEND_IPI => {
            platform.send_ipi(hart_mask, hart_mask_base);
            SbiRet::ok(0)
        }
        _ => SbiRet::err(sbi::SBI_ERR_NOT_SUPPORTED),
    }
}

fn handle_rfence<P: SbiPlatform>(platform: &mut P, fid: u32, hart_mask: u32, hart_mask_base: u32) -> SbiRet {
    // Every RFENCE function (remote FENCE.I, remote SFENCE.VMA with or
    // without ASID/address ranges) collapses to the same no-op here: this
    // interpreter never caches a translation past the instruction that
    // used it, so there's nothing to invalidate.
    let _ = fid;
    platform.remote_fence(hart_mask, hart_mask_base);
    SbiRet::ok(0)
}

fn handle_hsm<P: SbiPlatform>(platform: &mut P, hart_id: u32, fid: u32, a0: u32, a1: u32, a2: u32) -> SbiRet {
    match fid {
        hsm_fid::HART_START => match platform.hart_start(a0, a1, a2) {
            Ok(()) => SbiRet::ok(0),
            Err(e) => e,
        },
        hsm_fid::HART_STOP => match platform.hart_stop(hart_id) {
            Ok(()) => SbiRet::ok(0),
            Err(e) => e,
        },
        hsm_fid::HART_GET_STATUS => match platform.hart_status(a0) {
            Some(status) => SbiRet::ok(status.code()),
            None => SbiRet::err(sbi::SBI_ERR_INVALID_PARAM),
        },
        hsm_fid::HART_SUSPEND => match platform.hart_suspend(hart_id, a1, a2) {
            Ok(()) => SbiRet::ok(0),
            Err(e) => e,
        },
        _ => SbiRet::err(sbi::SBI_ERR_NOT_SUPPORTED),
    }
}

mod srst_fid {
    pub const SYSTEM_RESET: u32 = 0;
}

fn handle_srst<P: SbiPlatform>(platform: &mut P, fid: u32, reset_type: u32, reason: u32) -> SbiRet {
    match fid {
        srst_fid::SYSTEM_RESET => {
            platform.request_shutdown(reset_type, reason);
            SbiRet::ok(0)
        }
        _ => SbiRet::err(sbi::SBI_ERR_NOT_SUPPORTED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakePlatform {
        started: RefCell<Vec<(u32, u32, u32)>>,
        ipis: RefCell<Vec<(u32, u32)>>,
        shutdown: RefCell<Option<(u32, u32)>>,
        timers: RefCell<Vec<(u32, u64)>>,
    }

    impl SbiPlatform for FakePlatform {
        fn hart_count(&self) -> u32 {
            4
        }
        fn hart_status(&self, hart_id: u32) -> Option<HartStatus> {
            if hart_id < 4 {
                Some(if hart_id == 0 { HartStatus::Started } else { HartStatus::Stopped })
            } else {
                None
            }
        }
        fn hart_start(&mut self, hart_id: u32, start_addr: u32, opaque: u32) -> Result<(), SbiRet> {
            if hart_id >= 4 {
                return Err(SbiRet::err(sbi::SBI_ERR_INVALID_PARAM));
            }
            self.started.borrow_mut().push((hart_id, start_addr, opaque));
            Ok(())
        }
        fn hart_stop(&mut self, _hart_id: u32) -> Result<(), SbiRet> {
            Ok(())
        }
        fn hart_suspend(&mut self, _hart_id: u32, _resume_addr: u32, _opaque: u32) -> Result<(), SbiRet> {
            Ok(())
        }
        fn set_timer(&mut self, hart_id: u32, time: u64) {
            self.timers.borrow_mut().push((hart_id, time));
        }
        fn send_ipi(&mut self, hart_mask: u32, hart_mask_base: u32) {
            self.ipis.borrow_mut().push((hart_mask, hart_mask_base));
        }
        fn remote_fence(&mut self, _hart_mask: u32, _hart_mask_base: u32) {}
        fn request_shutdown(&mut self, reset_type: u32, reason: u32) {
            *self.shutdown.borrow_mut() = Some((reset_type, reason));
        }
    }

    fn ecall(a7: u32, a6: u32, a0: u32, a1: u32, a2: u32) -> EcallArgs {
        EcallArgs { a0, a1, a2, a7, a6, ..Default::default() }
    }

    #[test]
    fn base_probe_extension_reports_every_implemented_eid() {
        let mut p = FakePlatform::default();
        let ret = handle_ecall(&mut p, 0, ecall(sbi::EID_BASE, base_fid::PROBE_EXTENSION, sbi::EID_HSM, 0, 0));
        assert_eq!(ret, SbiRet::ok(1));
        let ret = handle_ecall(&mut p, 0, ecall(sbi::EID_BASE, base_fid::PROBE_EXTENSION, 0xffff, 0, 0));
        assert_eq!(ret, SbiRet::ok(0));
    }

    #[test]
    fn hsm_start_forwards_to_platform() {
        let mut p = FakePlatform::default();
        let ret = handle_ecall(&mut p, 0, ecall(sbi::EID_HSM, hsm_fid::HART_START, 2, 0x8020_0000, 0x42));
        assert_eq!(ret, SbiRet::ok(0));
        assert_eq!(p.started.borrow()[0], (2, 0x8020_0000, 0x42));
    }

    #[test]
    fn hsm_get_status_rejects_out_of_range_hart() {
        let mut p = FakePlatform::default();
        let ret = handle_ecall(&mut p, 0, ecall(sbi::EID_HSM, hsm_fid::HART_GET_STATUS, 99, 0, 0));
        assert_eq!(ret, SbiRet::err(sbi::SBI_ERR_INVALID_PARAM));
    }

    #[test]
    fn timer_set_timer_combines_hi_lo() {
        let mut p = FakePlatform::default();
        let ret = handle_ecall(&mut p, 1, ecall(sbi::EID_TIMER, timer_fid::SET_TIMER, 0x1, 0x2, 0));
        assert_eq!(ret, SbiRet::ok(0));
        assert_eq!(p.timers.borrow()[0], (1, 0x2_0000_0001));
    }

    #[test]
    fn srst_records_shutdown_request() {
        let mut p = FakePlatform::default();
        handle_ecall(&mut p, 0, ecall(sbi::EID_SRST, srst_fid::SYSTEM_RESET, sbi::reset_type::SHUTDOWN, 0));
        assert_eq!(*p.shutdown.borrow(), Some((sbi::reset_type::SHUTDOWN, 0)));
    }

    #[test]
    fn unknown_extension_is_not_supported() {
        let mut p = FakePlatform::default();
        let ret = handle_ecall(&mut p, 0, ecall(0xbeef, 0, 0, 0, 0));
        assert_eq!(ret, SbiRet::err(sbi::SBI_ERR_NOT_SUPPORTED));
    }
}
