use rv_isa::{trap::Exception, LoadStoreWidth};
use rv_mmu::PageTableSource;

/// The memory-callback contract the embedding runtime provides, consumed
/// by the interpreter after MMU translation has produced a physical
/// address. Implemented by `Machine` in `rv-machine`, which routes by
/// address range to RAM, ACLINT, PLIC, or a device window.
pub trait SystemBus: PageTableSource {
    fn fetch(&mut self, paddr: u32) -> Result<u32, Exception>;
    fn load(&mut self, paddr: u32, width: LoadStoreWidth) -> Result<u32, Exception>;
    fn store(&mut self, paddr: u32, width: LoadStoreWidth, value: u32) -> Result<(), Exception>;
}
