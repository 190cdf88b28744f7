//! The multi-hart platform: owns every hart plus the shared bus (RAM,
//! ACLINT, PLIC, UART), and runs the cooperative round-robin scheduler
//! spec.md §4.8 describes. This is the crate that finally ties `rv-hart`,
//! `rv-aclint`, `rv-plic`, and `rv-sbi` into something that can boot a
//! kernel image.

mod bus;
mod scheduler;
mod sbi;

pub use bus::{Bus, ACLINT_BASE, ACLINT_SIZE, PLIC_BASE, PLIC_SIZE, UART_BASE, UART_SIZE};

use rv_aclint::Aclint;
use rv_clock::{HostClock, TickSource};
use rv_devices::Disk;
use rv_hart::Hart;
use rv_ram::Ram;

pub struct Machine<C: TickSource = HostClock> {
    harts: Vec<Hart>,
    bus: Bus<C>,
    stopped: bool,
    exit_code: i32,
    /// Per-hart count of consecutive scheduler rounds that retired no new
    /// instruction (every step trapped). Used to detect a guest stuck
    /// faulting at its own trap vector — spec.md §6's exit code 1 case —
    /// since a hart with a working trap handler always retires *something*
    /// per round, even if it's just the handler spinning.
    stalled_rounds: Vec<u32>,
    /// `-d disk_image`'s backing store, if one was given. Reachable only as
    /// a named resource (see `rv_devices::Disk`'s own docs) — there is no
    /// virtio-blk transport mapping it into the guest's address space.
    disk: Option<Disk>,
}

impl Machine<HostClock> {
    /// `timer_freq_hz` is the ACLINT `mtime` tick rate; 10 MHz matches the
    /// original's default.
    pub fn new(ram_size: usize, n_harts: usize, dtb_addr: u32, timer_freq_hz: u64) -> Self {
        Self::with_clock(ram_size, n_harts, dtb_addr, HostClock::new(timer_freq_hz))
    }
}

impl<C: TickSource> Machine<C> {
    pub fn with_clock(ram_size: usize, n_harts: usize, dtb_addr: u32, clock: C) -> Self {
        assert!(n_harts >= 1, "a machine needs at least one hart");
        let ram = Ram::new(ram_size);
        let aclint = Aclint::with_clock(n_harts, clock);

        let mut harts = Vec::with_capacity(n_harts);
        harts.push(Hart::reset(0, rv_ram::RAM_BASE, dtb_addr));
        for id in 1..n_harts as u32 {
            harts.push(Hart::reset(id, 0, 0));
        }

        Self {
            stalled_rounds: vec![0; harts.len()],
            harts,
            bus: Bus::new(ram, aclint),
            stopped: false,
            exit_code: 0,
            disk: None,
        }
    }

    /// Attach a disk image opened via [`rv_devices::Disk::open`]. Replaces
    /// any previously attached disk.
    pub fn attach_disk(&mut self, disk: Disk) {
        self.disk = Some(disk);
    }

    pub fn disk(&self) -> Option<&Disk> {
        self.disk.as_ref()
    }

    pub fn disk_mut(&mut self) -> Option<&mut Disk> {
        self.disk.as_mut()
    }

    pub fn load_image(&mut self, paddr: u32, data: &[u8]) -> std::io::Result<()> {
        self.bus.ram.load_image(paddr, data)
    }

    pub fn ram_mut(&mut self) -> &mut Ram {
        &mut self.bus.ram
    }

    pub fn hart(&self, id: usize) -> &Hart {
        &self.harts[id]
    }

    pub fn hart_mut(&mut self, id: usize) -> &mut Hart {
        &mut self.harts[id]
    }

    pub fn harts(&self) -> &[Hart] {
        &self.harts
    }

    /// Raise or lower PLIC source `irq` (1..=31), e.g. from a device model
    /// driving the UART's or disk's interrupt line.
    pub fn set_plic_level(&mut self, irq: u32, level: bool) {
        self.bus.plic.set_level(irq, level);
    }

    pub fn plic(&mut self) -> &mut rv_plic::Plic {
        &mut self.bus.plic
    }

    /// Recompute PLIC-derived `SEI` on the target hart. Exposed separately
    /// from the scheduler's own per-round call so embedders/tests can
    /// drive a single update without running a whole round.
    pub fn refresh_plic(&mut self) {
        self.bus.plic.update_interrupts(&mut self.harts[0]);
    }

    /// Recompute `STI`/`SSI` on every hart from ACLINT state. Exposed for
    /// the same reason as [`Self::refresh_plic`].
    pub fn refresh_aclint(&mut self) {
        self.bus.aclint.update_interrupts(&mut self.harts);
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_clock::FakeClock;
    use rv_hart::HsmState;
    use rv_isa::sbi;

    const ECALL: u32 = 0x0000_0073;

    fn machine(n_harts: usize) -> Machine<FakeClock> {
        Machine::with_clock(64 * 1024, n_harts, 0x1234, FakeClock::default())
    }

    /// Scenario 1 (spec.md §8): boot hart 0 calls `sbi_system_reset` with
    /// SHUTDOWN; the scheduler observes `stopped` and returns exit code 0.
    #[test]
    fn boot_hart_ecall_shutdown_stops_the_machine() {
        let mut m = machine(1);
        m.load_image(rv_ram::RAM_BASE, &ECALL.to_le_bytes()).unwrap();
        {
            let h = m.hart_mut(0);
            h.write_gpr(17, sbi::EID_SRST); // a7
            h.write_gpr(16, 0); // a6: SYSTEM_RESET
            h.write_gpr(10, sbi::reset_type::SHUTDOWN); // a0
            h.write_gpr(11, 0); // a1
        }
        let code = m.run();
        assert_eq!(code, 0);
        assert!(m.stopped());
    }

    /// Scenario 3: hart 1 is stopped; hart 0 calls `sbi_hart_start(1,
    /// 0x80100000, 0x42)`. Hart 1 must come up STARTED with pc/a0/a1 set
    /// per the HSM contract. Drives the `SbiPlatform` impl directly
    /// (rather than through a full scheduler round) since the point under
    /// test is the dispatch effect, not hart 1 then executing garbage at
    /// an address outside this test's tiny RAM.
    #[test]
    fn hart_start_brings_sibling_up_with_correct_registers() {
        use rv_sbi::SbiPlatform;

        let mut m = machine(2);
        assert_eq!(m.hart(1).hsm, HsmState::Stopped);

        m.hart_start(1, 0x8010_0000, 0x42).unwrap();

        assert_eq!(m.hart(1).hsm, HsmState::Started);
        assert_eq!(m.hart(1).pc, 0x8010_0000);
        assert_eq!(m.hart(1).read_gpr(10), 1);
        assert_eq!(m.hart(1).read_gpr(11), 0x42);
        assert!(m.hart(1).s_mode);
    }

    /// Scenario 6: PLIC claim/complete round trip through the bus decoder.
    #[test]
    fn plic_claim_complete_round_trips_through_bus() {
        let mut m = machine(1);
        use rv_hart::SystemBus;
        use rv_isa::LoadStoreWidth;

        m.plic().write(0x2000, 1 << 1).unwrap(); // enable source 1
        m.set_plic_level(1, true);
        m.refresh_plic();

        let claimed = m.bus.load(PLIC_BASE + 0x20_0004, LoadStoreWidth::Word).unwrap();
        assert_eq!(claimed, 1);

        m.bus.store(PLIC_BASE + 0x20_0004, LoadStoreWidth::Word, 1).unwrap();
        m.set_plic_level(1, false);
        m.refresh_plic();
        let next = m.bus.load(PLIC_BASE + 0x20_0004, LoadStoreWidth::Word).unwrap();
        assert_eq!(next, 0);
    }

    fn lr_w(rd: u32, rs1: u32) -> u32 {
        (0b00010 << 27) | (rs1 << 15) | (0b010 << 12) | (rd << 7) | 0b0101111
    }

    fn sc_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
        (0b00011 << 27) | (rs2 << 20) | (rs1 << 15) | (0b010 << 12) | (rd << 7) | 0b0101111
    }

    fn sw(rs1: u32, rs2: u32, imm: u32) -> u32 {
        let imm = imm & 0xfff;
        ((imm >> 5) << 25) | (rs2 << 20) | (rs1 << 15) | (0b010 << 12) | ((imm & 0x1f) << 7) | 0x23
    }

    fn lw(rd: u32, rs1: u32, imm: u32) -> u32 {
        ((imm & 0xfff) << 20) | (rs1 << 15) | (0b010 << 12) | (rd << 7) | 0x03
    }

    /// Scenario 2: an SBI `set_timer` in the past raises `STI`; rearming it
    /// at `u64::MAX` clears it again. Exercises the `SbiPlatform::set_timer`
    /// → `Aclint` → `Hart::sip` path the scheduler's `refresh_aclint` drives
    /// once per round.
    #[test]
    fn set_timer_raises_and_clears_sti() {
        use rv_isa::csr::sip_bits;
        use rv_sbi::SbiPlatform;

        let mut m = machine(1);
        m.set_timer(0, 0); // already due: mtime (0) >= mtimecmp (0)
        m.refresh_aclint();
        assert_ne!(m.hart(0).sip & sip_bits::STI, 0);

        m.set_timer(0, u64::MAX);
        m.refresh_aclint();
        assert_eq!(m.hart(0).sip & sip_bits::STI, 0);
    }

    /// Scenario 4 (LR/SC contention): hart 0 holds a reservation on the
    /// lock word; hart 1's plain store to that same word must invalidate
    /// it, so hart 0's subsequent `sc.w` fails. This is the scheduler's
    /// own responsibility (walking every hart's reservation on every
    /// store) rather than something a single-hart `rv-hart` test could
    /// exercise.
    #[test]
    fn cross_hart_store_invalidates_pending_reservation() {
        let lock_addr = rv_ram::RAM_BASE + 0x100;
        let h0_base = rv_ram::RAM_BASE;
        let h1_base = rv_ram::RAM_BASE + 0x200;

        let mut m = machine(2);
        m.ram_mut().load_image(h0_base, &lr_w(5, 1).to_le_bytes()).unwrap();
        m.ram_mut().load_image(h0_base + 4, &sc_w(6, 1, 7).to_le_bytes()).unwrap();
        m.ram_mut().load_image(h1_base, &sw(1, 0, 0).to_le_bytes()).unwrap();

        m.hart_mut(0).write_gpr(1, lock_addr);
        {
            let h1 = m.hart_mut(1);
            h1.write_gpr(1, lock_addr);
            h1.pc = h1_base;
            h1.current_pc = h1_base;
            h1.hsm = HsmState::Started;
        }

        let out0 = m.harts[0].step(&mut m.bus);
        assert!(matches!(out0, StepOutcome::Stepped { store: None }));
        assert_eq!(m.harts[0].reservation, Some(lock_addr));

        let out1 = m.harts[1].step(&mut m.bus);
        match out1 {
            StepOutcome::Stepped { store: Some(rec) } => {
                for h in m.harts.iter_mut() {
                    h.invalidate_reservation_if_overlapping(rec.word_addr);
                }
            }
            other => panic!("expected hart 1's store to retire, got {other:?}"),
        }
        assert_eq!(m.harts[0].reservation, None);

        let out2 = m.harts[0].step(&mut m.bus);
        assert!(matches!(out2, StepOutcome::Stepped { store: None }));
        assert_eq!(m.harts[0].read_gpr(6), 1); // SC failure code, reservation was gone
    }

    /// Scenario 5: a load through a root PTE with `V=0` leaves registers
    /// untouched and traps into `stvec` with the documented `scause`/
    /// `stval`/`sepc`, driven through a full `Hart::step` rather than
    /// `rv_mmu::translate` directly (already covered in `rv-mmu`).
    #[test]
    fn unmapped_load_raises_page_fault_through_a_full_step() {
        let root_ppn = rv_ram::RAM_BASE / 4096; // left all-zero: every PTE is V=0
        let base = rv_ram::RAM_BASE + 4096;
        let vaddr = 0x4000_0000u32;

        let mut m = machine(1);
        m.ram_mut().load_image(base, &lw(5, 1, 0).to_le_bytes()).unwrap();

        {
            let h = m.hart_mut(0);
            h.pc = base;
            h.current_pc = base;
            h.write_gpr(1, vaddr);
            h.write_gpr(5, 0xdead); // sentinel: must survive the fault untouched
            h.root_ppn = Some(root_ppn);
            h.stvec_base = 0x8010_0000;
        }

        let outcome = m.harts[0].step(&mut m.bus);
        assert!(matches!(outcome, StepOutcome::Stepped { store: None }));

        let h = m.hart(0);
        assert_eq!(h.scause, rv_isa::trap::Exception::LoadPageFault.code());
        assert_eq!(h.stval, vaddr);
        assert_eq!(h.sepc, base);
        assert_eq!(h.pc, 0x8010_0000);
        assert_eq!(h.read_gpr(5), 0xdead);
    }
}
