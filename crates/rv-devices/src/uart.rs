use std::io::{self, Write};

/// Register offsets within the UART window, matching the 8250's layout
/// (`THR` at offset 0, `LSR` at offset 5) even though every other 8250
/// register is unimplemented.
const REG_THR: u32 = 0;
const REG_LSR: u32 = 5;

/// Line Status Register bit meaning "transmit holding register empty" —
/// always set here since writes complete synchronously to `sink`.
const LSR_THRE: u32 = 1 << 5;

/// A write-only console: bytes written to the data register go straight
/// to `sink` (stdout in the real emulator, a buffer in tests). No FIFO, no
/// interrupts, no receive path — spec.md excludes UART device modeling,
/// this exists only so kernel console output is observable.
pub struct Uart<W: Write = io::Stdout> {
    sink: W,
}

impl Uart<io::Stdout> {
    pub fn new() -> Self {
        Self { sink: io::stdout() }
    }
}

impl Default for Uart<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Uart<W> {
    pub fn with_sink(sink: W) -> Self {
        Self { sink }
    }

    /// `addr` is a byte offset within the UART window.
    pub fn read(&mut self, addr: u32) -> Option<u32> {
        match addr {
            REG_LSR => Some(LSR_THRE),
            _ => Some(0),
        }
    }

    pub fn write(&mut self, addr: u32, value: u32) -> Option<()> {
        if addr == REG_THR {
            let byte = value as u8;
            let _ = self.sink.write_all(&[byte]);
            let _ = self.sink.flush();
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_to_thr_forwards_bytes_to_sink() {
        let mut uart = Uart::with_sink(Vec::new());
        uart.write(REG_THR, b'h' as u32).unwrap();
        uart.write(REG_THR, b'i' as u32).unwrap();
        assert_eq!(uart.sink, b"hi");
    }

    #[test]
    fn lsr_always_reports_transmit_empty() {
        let mut uart = Uart::with_sink(Vec::new());
        assert_eq!(uart.read(REG_LSR), Some(LSR_THRE));
    }
}
