//! Bootloader error handling
//!
//! This module defines the error types used throughout the stage-1 loader.
//! Every error is fatal at this boot stage: the orchestrator prints the
//! diagnostic on the terminal and halts, because there is nothing else
//! running that could recover.

use core::fmt;

use crate::bios::realmode::{DiskError, MemoryDetectError};

/// Result type used throughout the bootloader
pub type Result<T> = core::result::Result<T, BootError>;

/// Top-level bootloader error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Disk transfer failed
    DiskIo(DiskError),

    /// Heap arena exhausted
    OutOfMemory,

    /// MBR sector does not carry the 0xAA55 signature
    InvalidBootRecord,

    /// No partition-table entry carries the bootable attribute
    NoBootablePartition,

    /// BIOS memory query failed
    MemoryDetect(MemoryDetectError),

    /// On-disk filesystem structure violates a format assumption
    Filesystem(FsFormatError),

    /// Kernel image is not a loadable ELF32 executable
    ImageFormat(ElfFormatError),

    /// Multiboot negotiation failed
    Protocol(ProtocolError),
}

/// FAT32 format errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsFormatError {
    /// No root-directory entry matches the requested name
    FileNotFound,
    /// The root directory spans more than one cluster
    MultiClusterRootDirectory,
    /// A deleted (0xE5) directory entry was encountered
    DeletedEntry,
    /// A cluster chain did not reach end-of-chain within the hop budget
    ClusterChainTooLong,
    /// A chain entry references a cluster outside the FAT
    InvalidCluster,
}

/// ELF32 image errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfFormatError {
    /// Buffer is too small to contain an ELF32 header
    HeaderTooSmall,
    /// Wrong magic bytes
    BadMagic,
    /// Not ELFCLASS32
    UnsupportedClass,
    /// Not little-endian
    UnsupportedEndianness,
    /// Not EM_386
    UnsupportedMachine,
    /// Not EV_CURRENT
    UnsupportedVersion,
    /// Not ET_EXEC
    UnsupportedType,
    /// PT_DYNAMIC or PT_INTERP segment present
    UnsupportedSegment,
    /// Program header table is inconsistent with the image
    MalformedProgramHeaders,
    /// No PT_LOAD segment was loaded
    NoLoadableSegments,
}

/// Multiboot negotiation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// No header in the search window satisfies the checksum
    HeaderNotFound,
    /// Header requests a feature this loader does not provide
    UnsupportedFlags,
}

impl BootError {
    /// Convert to an error code suitable for diagnostics
    pub fn as_error_code(&self) -> u32 {
        match self {
            BootError::DiskIo(e) => 0x1000 + e.code() as u32,
            BootError::OutOfMemory => 0x2000,
            BootError::InvalidBootRecord => 0x3001,
            BootError::NoBootablePartition => 0x3000,
            BootError::MemoryDetect(e) => 0x3100 + e.code() as u32,
            BootError::Filesystem(e) => 0x4000 + *e as u32,
            BootError::ImageFormat(e) => 0x5000 + *e as u32,
            BootError::Protocol(e) => 0x6000 + *e as u32,
        }
    }

    /// Human-readable diagnostic message
    pub fn as_str(&self) -> &'static str {
        match self {
            BootError::DiskIo(e) => e.description(),
            BootError::OutOfMemory => "out of boot heap memory",
            BootError::InvalidBootRecord => "MBR signature missing",
            BootError::NoBootablePartition => "no bootable partition in MBR",
            BootError::MemoryDetect(e) => e.description(),
            BootError::Filesystem(e) => e.as_str(),
            BootError::ImageFormat(e) => e.as_str(),
            BootError::Protocol(e) => e.as_str(),
        }
    }
}

impl FsFormatError {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsFormatError::FileNotFound => "file not found in root directory",
            FsFormatError::MultiClusterRootDirectory => {
                "multi-cluster root directories are unsupported"
            }
            FsFormatError::DeletedEntry => "deleted directory entries are unsupported",
            FsFormatError::ClusterChainTooLong => "cluster chain exceeds file size",
            FsFormatError::InvalidCluster => "cluster chain references an invalid cluster",
        }
    }
}

impl ElfFormatError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElfFormatError::HeaderTooSmall => "image too small for an ELF32 header",
            ElfFormatError::BadMagic => "bad ELF magic",
            ElfFormatError::UnsupportedClass => "not a 32-bit ELF image",
            ElfFormatError::UnsupportedEndianness => "not a little-endian ELF image",
            ElfFormatError::UnsupportedMachine => "not an x86 ELF image",
            ElfFormatError::UnsupportedVersion => "unsupported ELF version",
            ElfFormatError::UnsupportedType => "kernel image must be ET_EXEC",
            ElfFormatError::UnsupportedSegment => "dynamic/interp segments are unsupported",
            ElfFormatError::MalformedProgramHeaders => "program header table out of bounds",
            ElfFormatError::NoLoadableSegments => "image has no loadable segments",
        }
    }
}

impl ProtocolError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolError::HeaderNotFound => "no Multiboot header found",
            ProtocolError::UnsupportedFlags => "Multiboot header requests unsupported features",
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {:#06x})", self.as_str(), self.as_error_code())
    }
}

impl From<DiskError> for BootError {
    fn from(e: DiskError) -> Self {
        BootError::DiskIo(e)
    }
}

impl From<MemoryDetectError> for BootError {
    fn from(e: MemoryDetectError) -> Self {
        BootError::MemoryDetect(e)
    }
}

impl From<FsFormatError> for BootError {
    fn from(e: FsFormatError) -> Self {
        BootError::Filesystem(e)
    }
}

impl From<ElfFormatError> for BootError {
    fn from(e: ElfFormatError) -> Self {
        BootError::ImageFormat(e)
    }
}

impl From<ProtocolError> for BootError {
    fn from(e: ProtocolError) -> Self {
        BootError::Protocol(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct_per_subsystem() {
        assert_eq!(BootError::OutOfMemory.as_error_code(), 0x2000);
        assert_eq!(BootError::NoBootablePartition.as_error_code(), 0x3000);
        assert_ne!(
            BootError::Filesystem(FsFormatError::FileNotFound).as_error_code(),
            BootError::Protocol(ProtocolError::HeaderNotFound).as_error_code(),
        );
    }

    #[test]
    fn test_messages_are_not_empty() {
        assert!(!BootError::OutOfMemory.as_str().is_empty());
        assert!(!FsFormatError::DeletedEntry.as_str().is_empty());
        assert!(!ElfFormatError::BadMagic.as_str().is_empty());
        assert!(!ProtocolError::UnsupportedFlags.as_str().is_empty());
    }
}
