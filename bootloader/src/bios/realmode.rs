/// Real-Mode BIOS Service Contracts
///
/// The stage-1 loader runs in protected mode but still depends on firmware
/// services reached through a real-mode bridge: INT 0x13 disk transfers and
/// the INT 0x12/0x15 memory queries. Every call is synchronous and blocking
/// with no timeout; the firmware is assumed always to return.
///
/// The traits here are the seam between the loader core and that bridge.
/// The production implementations live in [`bridge`] and call the stage-0
/// assembly thunks; tests substitute RAM-backed fakes.

use crate::bios::e820::MemoryMap;

/// Bytes per disk sector, assumed throughout the loader
pub const SECTOR_SIZE: usize = 512;

/// INT 0x13 per-call sector limit
pub const MAX_SECTORS_PER_TRANSFER: u16 = 127;

/// Disk transfer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// The firmware reported a failed transfer
    TransferFailed,
    /// The request addresses sectors outside the medium
    OutOfRange,
    /// Caller buffer does not match the requested sector count
    BufferMismatch,
}

impl DiskError {
    pub fn code(&self) -> u8 {
        match self {
            DiskError::TransferFailed => 0x01,
            DiskError::OutOfRange => 0x02,
            DiskError::BufferMismatch => 0x03,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DiskError::TransferFailed => "disk transfer failed",
            DiskError::OutOfRange => "disk request out of range",
            DiskError::BufferMismatch => "disk buffer size mismatch",
        }
    }
}

/// Memory detection errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDetectError {
    /// INT 0x12 reported zero lower memory
    LowerQueryFailed,
    /// INT 0x15 returned with carry set
    CarrySet,
    /// INT 0x15 did not echo the SMAP signature
    SignatureMismatch,
    /// More E820 entries than the fixed region table holds
    TooManyRegions,
}

impl MemoryDetectError {
    pub fn code(&self) -> u8 {
        match self {
            MemoryDetectError::LowerQueryFailed => 0x01,
            MemoryDetectError::CarrySet => 0x02,
            MemoryDetectError::SignatureMismatch => 0x03,
            MemoryDetectError::TooManyRegions => 0x04,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MemoryDetectError::LowerQueryFailed => "lower memory query failed",
            MemoryDetectError::CarrySet => "memory map query failed (carry set)",
            MemoryDetectError::SignatureMismatch => "memory map query failed (bad signature)",
            MemoryDetectError::TooManyRegions => "memory map has too many regions",
        }
    }
}

/// INT 0x13 disk read bridge
///
/// One call transfers at most [`MAX_SECTORS_PER_TRANSFER`] sectors;
/// request splitting is the [`DiskChannel`](crate::firmware::disk::DiskChannel)'s job.
pub trait DiskServices {
    /// Read `count` sectors starting at `lba` into `buf`
    ///
    /// `buf` must hold exactly `count * SECTOR_SIZE` bytes and `count` must
    /// not exceed the per-call limit.
    fn read_sectors(&mut self, drive: u8, lba: u64, count: u16, buf: &mut [u8])
    -> core::result::Result<(), DiskError>;
}

/// INT 0x12 / INT 0x15 memory detection bridge
pub trait MemoryServices {
    /// Lower (conventional) memory size in KiB
    fn lower_memory_kib(&mut self) -> core::result::Result<u32, MemoryDetectError>;

    /// The E820 memory map, at most [`MAX_MEMORY_REGIONS`](crate::bios::e820::MAX_MEMORY_REGIONS) entries
    fn upper_memory_map(&mut self) -> core::result::Result<MemoryMap, MemoryDetectError>;
}

/// Production bridge implementations over the stage-0 assembly thunks
#[cfg(target_arch = "x86")]
pub mod bridge {
    use arrayvec::ArrayVec;

    use super::{DiskError, DiskServices, MemoryDetectError, MemoryServices, SECTOR_SIZE};
    use crate::bios::e820::{MemoryMap, MemoryRegion};

    /// Fixed real-mode-reachable scratch locations, mirrored in the stage-0
    /// linker script.
    pub const DAP_LOCATION: usize = 0x7E00;
    pub const DISK_READ_LOCATION: usize = 0x6_0000;

    /// INT 0x13 extended-read disk address packet
    #[repr(C, packed)]
    struct DiskAddressPacket {
        size: u8,
        unused: u8,
        sectors: u16,
        /// segment:offset far pointer to the bounce buffer
        buffer: u32,
        lba: u64,
    }

    unsafe extern "C" {
        /// Executes INT 0x13/AH=0x42 with the DAP at [`DAP_LOCATION`];
        /// returns 0 on success.
        fn prism_rm_disk_read(drive: u32) -> u32;
        /// Executes INT 0x12; returns lower memory KiB, 0 on failure.
        fn prism_rm_lower_memory() -> u32;
        /// Executes one INT 0x15/EAX=0xE820 step writing a 24-byte entry to
        /// `entry_out`; updates the continuation word. Returns the entry
        /// length, 0 for a rejected signature, or -1 with carry set.
        fn prism_rm_e820_next(entry_out: *mut u8, continuation: *mut u32) -> i32;
    }

    /// INT 0x13 bridge bouncing through low memory
    pub struct RealModeDisk;

    impl DiskServices for RealModeDisk {
        fn read_sectors(
            &mut self,
            drive: u8,
            lba: u64,
            count: u16,
            buf: &mut [u8],
        ) -> core::result::Result<(), DiskError> {
            if buf.len() != count as usize * SECTOR_SIZE {
                return Err(DiskError::BufferMismatch);
            }

            let offset = (DISK_READ_LOCATION % 16) as u32;
            let segment = ((DISK_READ_LOCATION as u32) - offset) / 16;
            // SAFETY: the scratch locations are reserved by the stage-0
            // linker script and only touched by this bridge.
            unsafe {
                let dap = DAP_LOCATION as *mut DiskAddressPacket;
                (*dap).size = 0x10;
                (*dap).unused = 0;
                (*dap).sectors = count;
                (*dap).buffer = (segment << 16) | offset;
                (*dap).lba = lba;

                if prism_rm_disk_read(drive as u32) != 0 {
                    return Err(DiskError::TransferFailed);
                }

                core::ptr::copy_nonoverlapping(
                    DISK_READ_LOCATION as *const u8,
                    buf.as_mut_ptr(),
                    buf.len(),
                );
            }
            Ok(())
        }
    }

    /// INT 0x12/0x15 bridge
    pub struct RealModeMemory;

    impl MemoryServices for RealModeMemory {
        fn lower_memory_kib(&mut self) -> core::result::Result<u32, MemoryDetectError> {
            // SAFETY: the thunk clobbers nothing the caller owns.
            let kib = unsafe { prism_rm_lower_memory() };
            if kib == 0 {
                return Err(MemoryDetectError::LowerQueryFailed);
            }
            Ok(kib)
        }

        fn upper_memory_map(&mut self) -> core::result::Result<MemoryMap, MemoryDetectError> {
            let mut map: MemoryMap = ArrayVec::new();
            let mut continuation: u32 = 0;

            loop {
                let mut raw = [0u8; 24];
                // SAFETY: `raw` lives for the duration of the call.
                let len = unsafe { prism_rm_e820_next(raw.as_mut_ptr(), &mut continuation) };
                if len < 0 {
                    return Err(MemoryDetectError::CarrySet);
                }
                if len == 0 {
                    return Err(MemoryDetectError::SignatureMismatch);
                }

                let region = MemoryRegion {
                    base: u64::from_le_bytes(raw[0..8].try_into().unwrap_or([0; 8])),
                    length: u64::from_le_bytes(raw[8..16].try_into().unwrap_or([0; 8])),
                    region_type: u32::from_le_bytes(raw[16..20].try_into().unwrap_or([0; 4])),
                    acpi_extended: u32::from_le_bytes(raw[20..24].try_into().unwrap_or([0; 4])),
                };

                // Entries without extended attributes are always kept; the
                // extended filter follows the firmware quirk the previous
                // stage relied on.
                if len <= 20 || region.acpi_extended & 0x1 == 0 {
                    map.try_push(region)
                        .map_err(|_| MemoryDetectError::TooManyRegions)?;
                }

                if continuation == 0 {
                    return Ok(map);
                }
            }
        }
    }
}
