//! Per-hart RV32IMA + Zicsr + Zifencei + S-mode interpreter.
//!
//! A [`Hart`] holds one hardware thread's architectural state and steps it
//! one instruction (or interrupt, or nothing) at a time against a
//! [`SystemBus`] supplied by the embedding runtime. It deliberately has no
//! pointer back to the machine it's part of: SBI effects that cross harts
//! (starting another hart, sending an IPI, shutting the machine down) are
//! surfaced as an ordinary `ecall` exception and handled by the scheduler,
//! which already holds `&mut` access to every hart. That keeps the
//! borrow-checker story simple — no `Rc<RefCell<_>>`, no unsafe aliasing —
//! at the cost of the scheduler needing to recognize `a7`/`a6` itself.

mod amo;
mod bus;
mod csr;
mod interp;
mod state;
mod trap;

pub use bus::SystemBus;
pub use state::{Hart, HartError, HsmState, StepOutcome, StoreRecord};
