//! ACLINT: the three small MMIO devices that give each hart its timer and
//! inter-processor-interrupt signalling (MTIMER, MSWI, SSWI), grounded in
//! the original `aclint.c` register layout.
//!
//! All three only support 32-bit-aligned word accesses; that covers every
//! real guest (OpenSBI, Linux) and keeps the register-map code a direct
//! translation of the original rather than a general byte-granular MMIO
//! model.

use rv_clock::{HostClock, MonotonicClock, TickSource};
use rv_hart::Hart;
use rv_isa::csr::sip_bits;

/// mtimecmp/mtime window: 8 bytes per hart, mtime itself at the end.
const MTIMECMP_END: u32 = 0x7ff8;
const MTIME_END: u32 = 0x8000;

pub struct Aclint<C: TickSource = HostClock> {
    mtime: MonotonicClock<C>,
    mtimecmp: Vec<u64>,
    msip: Vec<bool>,
    ssip: Vec<bool>,
    /// Lowest pending `mtimecmp`, recalculated whenever one is written —
    /// lets the scheduler sleep until the next timer event instead of
    /// polling every hart's comparator on every idle tick.
    next_interrupt_at: u64,
}

impl Aclint<HostClock> {
    pub fn new(n_harts: usize, freq_hz: u64) -> Self {
        Self::with_clock(n_harts, HostClock::new(freq_hz))
    }
}

impl<C: TickSource> Aclint<C> {
    pub fn with_clock(n_harts: usize, source: C) -> Self {
        Self {
            mtime: MonotonicClock::new(source),
            mtimecmp: vec![u64::MAX; n_harts],
            msip: vec![false; n_harts],
            ssip: vec![false; n_harts],
            next_interrupt_at: u64::MAX,
        }
    }

    pub fn mtime(&self) -> u64 {
        self.mtime.get()
    }

    pub fn next_interrupt_at(&self) -> u64 {
        self.next_interrupt_at
    }

    fn recalc_next_interrupt(&mut self) {
        self.next_interrupt_at = self.mtimecmp.iter().copied().min().unwrap_or(u64::MAX);
    }

    /// Recompute `STI`/`SSI` in every hart's `sip` from current device
    /// state. The scheduler calls this once per round, not per MMIO
    /// access, matching `aclint_*_update_interrupts` being called from the
    /// step loop rather than from the register handlers themselves.
    pub fn update_interrupts(&self, harts: &mut [Hart]) {
        let mtime = self.mtime.get();
        for (i, hart) in harts.iter_mut().enumerate() {
            hart.set_device_interrupt(sip_bits::STI, mtime >= self.mtimecmp[i]);
            let ssi = self.msip.get(i).copied().unwrap_or(false) || self.ssip.get(i).copied().unwrap_or(false);
            hart.set_device_interrupt(sip_bits::SSI, ssi);
        }
    }

    /// `addr` is a word-aligned byte offset within the MTIMER window.
    pub fn mtimer_read(&self, addr: u32) -> Option<u32> {
        if addr < MTIMECMP_END {
            let idx = (addr >> 3) as usize;
            let cmp = *self.mtimecmp.get(idx)?;
            Some(shift_half(cmp, addr))
        } else if addr < MTIME_END {
            Some(shift_half(self.mtime.get(), addr))
        } else {
            None
        }
    }

    pub fn mtimer_write(&mut self, addr: u32, value: u32) -> Option<()> {
        if addr < MTIMECMP_END {
            let idx = (addr >> 3) as usize;
            let slot = self.mtimecmp.get_mut(idx)?;
            *slot = splice_half(*slot, addr, value);
            self.recalc_next_interrupt();
            Some(())
        } else if addr < MTIME_END {
            let new_mtime = splice_half(self.mtime.get(), addr, value);
            self.mtime.rebase(new_mtime);
            Some(())
        } else {
            None
        }
    }

    /// `addr` is a word-aligned byte offset within the MSWI window.
    pub fn mswi_read(&self, addr: u32) -> Option<u32> {
        let idx = (addr >> 2) as usize;
        self.msip.get(idx).map(|&v| v as u32)
    }

    pub fn mswi_write(&mut self, addr: u32, value: u32) -> Option<()> {
        let idx = (addr >> 2) as usize;
        let slot = self.msip.get_mut(idx)?;
        *slot = value & 0x1 != 0;
        Some(())
    }

    /// `addr` is a word-aligned byte offset within the SSWI window. Reads
    /// always return 0, matching the original's `aclint_sswi_reg_read`.
    pub fn sswi_read(&self, addr: u32) -> Option<u32> {
        let idx = (addr >> 2) as usize;
        if idx < self.ssip.len() {
            Some(0)
        } else {
            None
        }
    }

    pub fn sswi_write(&mut self, addr: u32, value: u32) -> Option<()> {
        let idx = (addr >> 2) as usize;
        let slot = self.ssip.get_mut(idx)?;
        *slot = value & 0x1 != 0;
        Some(())
    }

    /// Set hart `idx`'s pending software-interrupt bit directly, bypassing
    /// the MMIO address decode. Used by the SBI IPI extension, which is a
    /// guest-to-guest signal rather than a real MMIO write.
    pub fn set_ssip(&mut self, idx: usize, level: bool) -> Option<()> {
        let slot = self.ssip.get_mut(idx)?;
        *slot = level;
        Some(())
    }
}

/// Select the upper or lower 32 bits of a 64-bit register based on
/// `addr`'s bit 2, mirroring the original's `addr & 0x4` test.
fn shift_half(value: u64, addr: u32) -> u32 {
    (value >> if addr & 0x4 != 0 { 32 } else { 0 }) as u32
}

fn splice_half(current: u64, addr: u32, value: u32) -> u64 {
    if addr & 0x4 != 0 {
        (current & 0xffff_ffff) | ((value as u64) << 32)
    } else {
        (current & 0xffff_ffff_0000_0000) | value as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_clock::FakeClock;

    #[test]
    fn mtimecmp_recalculates_minimum_on_write() {
        let mut aclint = Aclint::with_clock(2, FakeClock::default());
        aclint.mtimer_write(0, 100).unwrap(); // hart 0 low word
        assert_eq!(aclint.next_interrupt_at(), 100);
        aclint.mtimer_write(8, 50).unwrap(); // hart 1 low word
        assert_eq!(aclint.next_interrupt_at(), 50);
    }

    #[test]
    fn mtime_write_rebases_visible_time() {
        let mut aclint = Aclint::with_clock(1, FakeClock::default());
        aclint.mtimer_write(0x7ff8, 0x1234).unwrap();
        assert_eq!(aclint.mtime(), 0x1234);
    }

    #[test]
    fn sti_reflects_mtime_vs_mtimecmp() {
        let mut aclint = Aclint::with_clock(1, FakeClock::default());
        let mut harts = vec![Hart::reset(0, rv_ram::RAM_BASE, 0)];

        aclint.mtimer_write(0, 10).unwrap(); // mtimecmp[0] = 10, mtime = 0
        aclint.update_interrupts(&mut harts);
        assert_eq!(harts[0].sip & sip_bits::STI, 0);

        aclint.mtimer_write(0, 0).unwrap(); // mtimecmp[0] = 0 <= mtime
        aclint.update_interrupts(&mut harts);
        assert_ne!(harts[0].sip & sip_bits::STI, 0);
    }

    #[test]
    fn mswi_and_sswi_both_raise_ssi() {
        let mut aclint = Aclint::with_clock(1, FakeClock::default());
        let mut harts = vec![Hart::reset(0, rv_ram::RAM_BASE, 0)];
        aclint.mswi_write(0, 1).unwrap();
        aclint.update_interrupts(&mut harts);
        assert_ne!(harts[0].sip & sip_bits::SSI, 0);
    }
}
