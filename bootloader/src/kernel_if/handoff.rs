//! Bootloader → kernel control transfer
//!
//! The final, irreversible step: a jump to the loaded kernel's entry point
//! with the negotiated register contract. There is no way back; the address
//! space now belongs to the kernel.

use super::multiboot::LOADER_MAGIC;

/// Jump to the kernel entry point, never returning
///
/// Register contract: EAX carries [`LOADER_MAGIC`], EBX the physical address
/// of the Multiboot info structure, ECX the linear text-cursor index so
/// kernel output continues where the loader stopped.
#[cfg(target_arch = "x86")]
pub fn transfer(entry: u32, info_addr: u32, cursor: u32) -> ! {
    // SAFETY: the segments were copied and validated; nothing of the loader
    // survives past this point.
    unsafe {
        core::arch::asm!(
            "jmp {entry}",
            entry = in(reg) entry,
            in("eax") LOADER_MAGIC,
            in("ebx") info_addr,
            in("ecx") cursor,
            options(noreturn),
        );
    }
}

#[cfg(not(target_arch = "x86"))]
pub fn transfer(entry: u32, info_addr: u32, cursor: u32) -> ! {
    let _ = LOADER_MAGIC;
    unimplemented!("kernel handoff exists only on x86 ({entry:#x}, {info_addr:#x}, {cursor})");
}

/// Halt forever in low power
///
/// Terminal state after a fatal boot error: interrupts off, `hlt` in a loop.
pub fn low_power_halt() -> ! {
    loop {
        #[cfg(target_arch = "x86")]
        // SAFETY: cli/hlt have no memory effects.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}
