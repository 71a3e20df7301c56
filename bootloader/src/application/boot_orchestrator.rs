//! Boot orchestrator - sequences the complete stage-1 flow
//!
//! Strictly linear: locate the boot partition, mount the FAT32 volume, read
//! the kernel image, negotiate the boot protocol, load the ELF segments,
//! jump. There is no state machine, no retry and no cancellation; any
//! failure prints a diagnostic and halts, because nothing else is running
//! that could recover.

use crate::drivers::vga::{Color, TextSink};
use crate::error::{BootError, FsFormatError, ProtocolError, Result};
use crate::firmware::disk::DiskChannel;
use crate::firmware::mbr;
use crate::fs::fat32::Fat32Volume;
use crate::kernel_if::elf::{self, Elf32Header, SegmentSink};
use crate::kernel_if::handoff;
use crate::kernel_if::multiboot;
use crate::memory::BootHeap;

/// 8.3 name of the kernel image in the root directory
pub const KERNEL_IMAGE_NAME: &str = "KERNEL.BIN";

/// Everything the kernel jump needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    /// Kernel entry physical address
    pub entry: u32,
    /// Physical address of the Multiboot info structure
    pub info_addr: u32,
    /// Linear text-cursor index at the moment of transfer
    pub cursor: u32,
}

/// Owns the collaborators and runs the boot sequence
pub struct BootOrchestrator<'a> {
    disk: DiskChannel<'a>,
    memory: &'a mut dyn crate::bios::realmode::MemoryServices,
    terminal: &'a mut dyn TextSink,
    segments: &'a mut dyn SegmentSink,
    heap: BootHeap,
}

impl<'a> BootOrchestrator<'a> {
    pub fn new(
        disk: DiskChannel<'a>,
        memory: &'a mut dyn crate::bios::realmode::MemoryServices,
        terminal: &'a mut dyn TextSink,
        segments: &'a mut dyn SegmentSink,
        heap: BootHeap,
    ) -> Self {
        Self {
            disk,
            memory,
            terminal,
            segments,
            heap,
        }
    }

    /// Run every stage up to (but not including) the jump
    ///
    /// Split from [`boot`](Self::boot) so the whole pipeline can run against
    /// fake collaborators.
    pub fn prepare(&mut self) -> Result<Handoff> {
        self.terminal.set_colors(Color::LightGray, Color::Blue);
        self.terminal.put_str("Prism 32-bit protected mode boot loader\n");
        self.terminal.set_colors(Color::LightGray, Color::Black);

        let mut mbr_sector = [0u8; 512];
        self.disk.read(0, &mut mbr_sector)?;
        let partition_lba = mbr::locate_boot_partition(&mbr_sector)?;
        self.stage("partition located");

        let volume = Fat32Volume::mount(&mut self.disk, &mut self.heap, partition_lba)?;
        self.stage("volume mounted");

        let kernel = volume
            .root_file(&mut self.disk, &mut self.heap, KERNEL_IMAGE_NAME)?
            .ok_or(BootError::Filesystem(FsFormatError::FileNotFound))?;
        self.stage("kernel image read");

        let mb_header = multiboot::search(kernel.bytes())
            .ok_or(BootError::Protocol(ProtocolError::HeaderNotFound))?;
        let built = multiboot::build(
            &mb_header,
            self.disk.drive(),
            self.memory,
            &mut self.heap,
        )?;
        self.stage("boot protocol negotiated");

        let elf_header = Elf32Header::parse(kernel.bytes())?;
        elf_header.validate()?;
        elf::load(kernel.bytes(), &elf_header, self.segments)?;
        self.stage("kernel segments loaded");

        Ok(Handoff {
            entry: elf_header.e_entry,
            info_addr: built.addr,
            cursor: self.terminal.cursor_index(),
        })
    }

    /// Run the sequence and transfer control, or halt on failure
    pub fn boot(mut self) -> ! {
        match self.prepare() {
            Ok(handoff) => {
                self.terminal.put_str("jumping to kernel\n");
                handoff::transfer(handoff.entry, handoff.info_addr, handoff.cursor)
            }
            Err(error) => self.halt(error),
        }
    }

    fn stage(&mut self, message: &str) {
        log::info!("{message}");
        self.terminal.put_str(message);
        self.terminal.put_char(b'\n');
    }

    /// Print the fatal diagnostic and enter the low-power loop
    ///
    /// The background is recolored so a halted machine is recognizable at a
    /// glance.
    fn halt(&mut self, error: BootError) -> ! {
        log::error!("boot failed: {error}");
        self.terminal.set_colors(Color::White, Color::Red);
        self.terminal.put_str("\nboot failure: ");
        self.terminal.put_str(error.as_str());
        self.terminal.put_str("\n");
        handoff::low_power_halt()
    }
}
