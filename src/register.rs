//! Register file access
//!
//! Every piece of this crate reaches the hardware through a
//! [`RegisterFile`]: a 32-bit view of the system bus, addressed the same
//! way the DMA controller addresses it. That's not only the peripheral
//! registers. The restart descriptor and the capture buffer are plain SRAM,
//! and the restart channel itself writes into the primary channel's
//! registers, so software and the DMA engines must agree on one address
//! space.
//!
//! [`Mmio`] performs volatile accesses on the real bus. The
//! [`Simulator`](crate::sim::Simulator) models the controller in software.

use ral_registers::RWRegister;

/// A 32-bit, word-aligned bus
///
/// Implementations may give reads and writes side effects, exactly as the
/// hardware does. Reading a PIO RX FIFO register pops the FIFO, and writing
/// a trigger alias starts a DMA channel.
pub trait RegisterFile {
    /// Read the word at bus address `address`
    fn read(&self, address: u32) -> u32;
    /// Write `value` to bus address `address`
    fn write(&self, address: u32, value: u32);

    /// Order all previous writes before any following write
    ///
    /// Called before software hands memory or registers over to the DMA
    /// controller.
    fn barrier(&self) {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }
}

impl<R: RegisterFile + ?Sized> RegisterFile for &R {
    fn read(&self, address: u32) -> u32 {
        (**self).read(address)
    }
    fn write(&self, address: u32, value: u32) {
        (**self).write(address, value)
    }
    fn barrier(&self) {
        (**self).barrier()
    }
}

/// Memory-mapped register access on an RP2040
///
/// Accesses are volatile, 32 bits wide, and go straight to the bus.
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Create a handle to the system bus
    ///
    /// # Safety
    ///
    /// This aliases global, mutable hardware state. Only use it on an RP2040,
    /// and only with addresses that are valid bus targets. Callers must make
    /// sure that nothing else reconfigures the DMA channels and PIO state
    /// machines this crate is given.
    pub const unsafe fn new() -> Self {
        Mmio { _private: () }
    }

    fn register(address: u32) -> &'static RWRegister<u32> {
        // Safety: construction of Mmio promises that we're on the RP2040 bus,
        // where every address handed to us is a word-aligned register or
        // SRAM word. RWRegister performs volatile accesses.
        unsafe { &*(address as usize as *const RWRegister<u32>) }
    }
}

impl RegisterFile for Mmio {
    #[inline(always)]
    fn read(&self, address: u32) -> u32 {
        Self::register(address).read()
    }

    #[inline(always)]
    fn write(&self, address: u32, value: u32) {
        Self::register(address).write(value)
    }

    fn barrier(&self) {
        cortex_m::asm::dmb();
    }
}
