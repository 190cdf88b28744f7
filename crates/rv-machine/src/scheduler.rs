//! Round-robin cooperative scheduler over every hart, per spec.md §4.8.

use std::time::Duration;

use rv_clock::TickSource;
use rv_hart::{HsmState, StepOutcome};
use rv_sbi::EcallArgs;

use crate::Machine;

/// Instructions granted to each hart per round before moving to the next.
const STEP_BUDGET: u32 = 1024;

/// Idle-poll interval used while every hart is parked. `Aclint` doesn't
/// expose its tick frequency, so rather than compute an exact wake-up
/// delay this polls at a short fixed interval — coarser than spec.md's
/// `min(next_interrupt_at - mtime, ...)` formula, but avoids relying on a
/// reconstructed frequency with its own rounding error.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Consecutive budget-exhausting, zero-progress rounds before a hart is
/// declared stuck in a fault loop (spec.md §6's exit code 1 case: a guest
/// whose own trap handler can't make forward progress, e.g. faulting
/// before `stvec` is ever programmed).
const STALL_LIMIT: u32 = 4;

impl<C: TickSource> Machine<C> {
    /// Run until the guest requests shutdown (or every hart stops without
    /// one), returning the process exit code.
    pub fn run(&mut self) -> i32 {
        let mut parked = vec![false; self.harts.len()];
        while !self.stopped {
            if self.harts.iter().all(|h| h.hsm == HsmState::Stopped) {
                log::warn!("every hart stopped without a shutdown request");
                break;
            }
            self.step_round(&mut parked);
            if self.all_idle(&parked) {
                std::thread::sleep(IDLE_POLL);
            }
        }
        self.exit_code
    }

    fn all_idle(&self, parked: &[bool]) -> bool {
        self.harts
            .iter()
            .enumerate()
            .all(|(i, h)| h.hsm == HsmState::Stopped || h.hsm == HsmState::Suspended || parked[i])
    }

    fn step_round(&mut self, parked: &mut [bool]) {
        self.refresh_plic();
        self.refresh_aclint();

        for i in 0..self.harts.len() {
            if self.harts[i].hsm == HsmState::Stopped {
                continue;
            }
            let waiting = parked[i] || self.harts[i].hsm == HsmState::Suspended;
            if waiting && !self.harts[i].has_pending_enabled_interrupt() {
                continue;
            }
            parked[i] = false;
            if self.harts[i].hsm == HsmState::Suspended {
                self.harts[i].hsm = HsmState::Started;
            }
            let retired_before = self.harts[i].retired;

            for _ in 0..STEP_BUDGET {
                if self.harts[i].hsm == HsmState::Stopped {
                    break;
                }
                match self.harts[i].step(&mut self.bus) {
                    StepOutcome::WaitForInterrupt => {
                        parked[i] = true;
                        break;
                    }
                    StepOutcome::Ecall => self.handle_ecall(i),
                    StepOutcome::Stepped { store: Some(rec) } => {
                        for h in self.harts.iter_mut() {
                            h.invalidate_reservation_if_overlapping(rec.word_addr);
                        }
                    }
                    StepOutcome::Stepped { store: None } => {}
                }
                if self.stopped {
                    return;
                }
            }

            if self.harts[i].retired == retired_before && !parked[i] {
                self.stalled_rounds[i] += 1;
                if self.stalled_rounds[i] >= STALL_LIMIT {
                    log::error!("hart {i} made no progress for {STALL_LIMIT} rounds; treating as an unhandled guest fault");
                    self.stopped = true;
                    self.exit_code = 1;
                    return;
                }
            } else {
                self.stalled_rounds[i] = 0;
            }
        }
    }

    fn handle_ecall(&mut self, hart_id: usize) {
        let args = {
            let h = &self.harts[hart_id];
            EcallArgs {
                a0: h.read_gpr(10),
                a1: h.read_gpr(11),
                a2: h.read_gpr(12),
                a3: h.read_gpr(13),
                a4: h.read_gpr(14),
                a5: h.read_gpr(15),
                a6: h.read_gpr(16),
                a7: h.read_gpr(17),
            }
        };
        let ret = rv_sbi::handle_ecall(self, hart_id as u32, args);
        let h = &mut self.harts[hart_id];
        h.write_gpr(10, ret.error as u32);
        h.write_gpr(11, ret.value);
    }
}
