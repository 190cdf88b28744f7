//! Device stand-ins that round out the platform memory map without
//! implementing the real hardware behind them. Grounded in the register
//! layout of the original's 8250 UART model (`uart.c`), trimmed to the
//! single write-only path spec.md's non-goals actually need.

mod disk;
mod uart;

pub use disk::{Disk, DiskError};
pub use uart::Uart;
