//! Kernel interface - ELF32 loading, Multiboot negotiation, handoff

pub mod elf;
pub mod handoff;
pub mod multiboot;
