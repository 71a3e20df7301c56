//! Prism bootloader entry point
//!
//! Stage 0 drops us here in 32-bit protected mode with interrupts disabled,
//! passing the BIOS boot drive in DX, the first free address past the
//! loader image, and the text cursor it left behind. Everything from here
//! to the kernel jump is sequenced by the boot orchestrator.

#![cfg_attr(target_arch = "x86", no_std)]
#![cfg_attr(target_arch = "x86", no_main)]

#[cfg(target_arch = "x86")]
mod stage1 {
    use core::fmt::Write;

    use log::LevelFilter;
    use prism_bootloader::application::BootOrchestrator;
    use prism_bootloader::bios::realmode::bridge::{
        DISK_READ_LOCATION, RealModeDisk, RealModeMemory,
    };
    use prism_bootloader::diagnostics::boot_log;
    use prism_bootloader::drivers::vga::{Color, TextSink, VgaTerminal};
    use prism_bootloader::firmware::disk::DiskChannel;
    use prism_bootloader::kernel_if::elf::PhysicalMemory;
    use prism_bootloader::kernel_if::handoff;
    use prism_bootloader::memory::BootHeap;

    /// Entry point, jumped to by the stage-0 assembly
    ///
    /// `dx` carries the BIOS drive number, `stage1_end` the first byte past
    /// the loaded stage-1 image, `cursor` the packed row/column the
    /// real-mode stage left the VGA cursor at.
    #[unsafe(no_mangle)]
    pub extern "C" fn stage1_main(dx: u32, stage1_end: u32, cursor: u32) -> ! {
        let mut terminal = VgaTerminal::new();
        terminal.set_cursor((cursor >> 8) as usize, (cursor & 0xFF) as usize);

        boot_log::init(LevelFilter::Info);

        // The heap arena spans from the end of the loader image up to the
        // real-mode disk bounce buffer.
        let heap_size = DISK_READ_LOCATION - stage1_end as usize;
        // SAFETY: stage 0 reserves this range for the loader alone.
        let heap = unsafe { BootHeap::new(stage1_end as usize as *mut u8, heap_size) };

        let mut disk_bridge = RealModeDisk;
        let mut memory_bridge = RealModeMemory;
        let mut segments = PhysicalMemory;

        let disk = DiskChannel::new(&mut disk_bridge, dx as u8);
        let orchestrator = BootOrchestrator::new(
            disk,
            &mut memory_bridge,
            &mut terminal,
            &mut segments,
            heap,
        );
        orchestrator.boot()
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        let mut terminal = VgaTerminal::new();
        terminal.set_colors(Color::White, Color::Red);
        let _ = write!(terminal, "\nbootloader panic: {info}");
        handoff::low_power_halt()
    }
}

#[cfg(not(target_arch = "x86"))]
fn main() {
    eprintln!("prism-bootloader runs on 32-bit x86; build with --target i686-unknown-none");
    std::process::exit(1);
}
