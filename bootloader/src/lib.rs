//! Prism stage-1 boot image loader
//!
//! Loads the kernel of a small 32-bit operating system from a raw BIOS
//! disk: locates the bootable MBR partition, mounts the FAT32 volume, reads
//! `KERNEL.BIN`, negotiates the Multiboot v1 protocol, copies the ELF32
//! segments to physical memory and jumps — or halts with a diagnostic,
//! since at this stage every failure is final.
//!
//! The real-mode transition glue, BIOS call trampolines and everything that
//! runs after the jump live outside this crate; they are reached through the
//! collaborator traits in [`bios`].

#![cfg_attr(not(test), no_std)]

/// Application layer - boot sequence orchestration
pub mod application;

/// BIOS layer - real-mode service contracts (disk, memory detection)
pub mod bios;

/// Diagnostics - log backend for boot-time tracing
pub mod diagnostics;

/// Device drivers - VGA text output
pub mod drivers;

/// Error handling - the fatal-only boot error taxonomy
pub mod error;

/// Firmware interface - disk channel and MBR partition table
pub mod firmware;

/// Filesystem - read-only FAT32
pub mod fs;

/// Kernel interface - ELF32 loading, Multiboot negotiation, handoff
pub mod kernel_if;

/// Memory management - the boot heap arena
pub mod memory;

pub use application::{BootOrchestrator, Handoff, KERNEL_IMAGE_NAME};
pub use error::{BootError, Result};
