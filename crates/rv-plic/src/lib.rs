//! A deliberately minimal PLIC: 32 interrupt sources, no priority levels,
//! one target context. Grounded in the original `plic.c`'s "make PLIC as
//! simple as possible" register model; the one simplification beyond the
//! original is that external interrupts are routed to a single hart
//! (conventionally hart 0, which owns the virtio/UART devices) rather than
//! modeling the real PLIC's per-hart-context addressing, since this
//! machine only ever needs one hart fielding device interrupts.

use rv_hart::Hart;
use rv_isa::csr::sip_bits;

const PRIORITY_LO: u32 = 1;
const PRIORITY_HI: u32 = 31;
const INTERRUPT_PENDING: u32 = 0x1000 >> 2;
const INTERRUPT_ENABLE: u32 = 0x2000 >> 2;
const PRIORITY_THRESHOLD: u32 = 0x20_0000 >> 2;
const INTERRUPT_CLAIM_COMPLETE: u32 = 0x20_0004 >> 2;

#[derive(Default)]
pub struct Plic {
    /// Sources whose pending bit is latched but not yet claimed.
    ip: u32,
    /// Enabled sources.
    ie: u32,
    /// Sources masked out until the handler completes them (prevents a
    /// level-triggered line from re-firing before its handler runs).
    masked: u32,
    /// Current level of each input line, set by the owning device model.
    active: u32,
}

impl Plic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear interrupt source `irq`'s level (1-indexed, 1..=31).
    pub fn set_level(&mut self, irq: u32, level: bool) {
        debug_assert!((1..=31).contains(&irq));
        let bit = 1 << irq;
        if level {
            self.active |= bit;
        } else {
            self.active &= !bit;
        }
    }

    /// Latch newly active-and-unmasked sources into `ip`, then raise or
    /// lower the target hart's external-interrupt pending bit.
    pub fn update_interrupts(&mut self, target: &mut Hart) {
        self.ip |= self.active & !self.masked;
        self.masked |= self.active;
        target.set_device_interrupt(sip_bits::SEI, self.ip & self.ie != 0);
    }

    /// `addr` is a word-aligned byte offset within the PLIC window.
    pub fn read(&mut self, addr: u32) -> Option<u32> {
        let word = addr >> 2;
        if (PRIORITY_LO..=PRIORITY_HI).contains(&word) {
            return Some(0);
        }
        match word {
            w if w == INTERRUPT_PENDING => Some(self.ip),
            w if w == INTERRUPT_ENABLE => Some(self.ie),
            w if w == PRIORITY_THRESHOLD => Some(0),
            w if w == INTERRUPT_CLAIM_COMPLETE => {
                let candidates = self.ip & self.ie;
                if candidates == 0 {
                    Some(0)
                } else {
                    let claimed = 31 - candidates.leading_zeros();
                    self.ip &= !(1 << claimed);
                    Some(claimed)
                }
            }
            _ => None,
        }
    }

    pub fn write(&mut self, addr: u32, value: u32) -> Option<()> {
        let word = addr >> 2;
        if (PRIORITY_LO..=PRIORITY_HI).contains(&word) {
            return Some(());
        }
        match word {
            w if w == INTERRUPT_ENABLE => {
                self.ie = value & !1;
                Some(())
            }
            w if w == PRIORITY_THRESHOLD => Some(()),
            w if w == INTERRUPT_CLAIM_COMPLETE => {
                if self.ie & (1 << value) != 0 {
                    self.masked &= !(1 << value);
                }
                Some(())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_raises_pending_once_enabled_and_sets_sei() {
        let mut plic = Plic::new();
        plic.write(0x2000, 1 << 3).unwrap(); // enable source 3
        plic.set_level(3, true);
        let mut hart = Hart::reset(0, rv_ram::RAM_BASE, 0);
        plic.update_interrupts(&mut hart);
        assert_ne!(hart.sip & sip_bits::SEI, 0);
        assert_eq!(plic.read(0x1000).unwrap() & (1 << 3), 1 << 3);
    }

    #[test]
    fn claim_clears_pending_and_masks_until_completed() {
        let mut plic = Plic::new();
        plic.write(0x2000, 1 << 5).unwrap();
        plic.set_level(5, true);
        let mut hart = Hart::reset(0, rv_ram::RAM_BASE, 0);
        plic.update_interrupts(&mut hart);

        let claimed = plic.read(0x20_0004).unwrap();
        assert_eq!(claimed, 5);
        assert_eq!(plic.read(0x1000).unwrap() & (1 << 5), 0);

        // still masked: re-latching active doesn't re-raise ip until
        // completion is written.
        plic.update_interrupts(&mut hart);
        assert_eq!(plic.read(0x1000).unwrap() & (1 << 5), 0);

        plic.write(0x20_0004, 5).unwrap();
        plic.update_interrupts(&mut hart);
        assert_eq!(plic.read(0x1000).unwrap() & (1 << 5), 1 << 5);
    }

    #[test]
    fn priority_registers_are_inert() {
        let mut plic = Plic::new();
        assert_eq!(plic.read(4).unwrap(), 0); // source 1's priority word
        assert_eq!(plic.write(4, 7), Some(()));
    }
}
