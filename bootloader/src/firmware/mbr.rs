/// Master Boot Record Partition Locator
///
/// Parses the 512-byte MBR sector and finds the first partition marked
/// bootable. Only the LBA start matters to the loader; the CHS fields are
/// carried for diagnostics and never used for addressing.

use crate::error::{BootError, Result};

/// MBR signature (0xAA55 at offset 510-511)
pub const MBR_SIGNATURE: u16 = 0xAA55;

/// Offset of the partition table inside the MBR sector
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// Partition entry size
pub const PARTITION_ENTRY_SIZE: usize = 16;

/// Number of partition entries in the MBR
pub const MAX_PARTITIONS: usize = 4;

/// Bootable attribute bit
const BOOTABLE_FLAG: u8 = 1 << 7;

/// One slot of the MBR partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Drive attributes; bit 7 set means bootable
    pub attributes: u8,
    /// CHS address of the first sector, informational only
    pub chs_start: [u8; 3],
    /// Partition type code
    pub partition_type: u8,
    /// CHS address of the last sector, informational only
    pub chs_end: [u8; 3],
    /// LBA of the first partition sector
    pub start_lba: u32,
    /// Number of sectors in the partition
    pub sector_count: u32,
}

impl PartitionEntry {
    fn parse(raw: &[u8]) -> Self {
        Self {
            attributes: raw[0],
            chs_start: [raw[1], raw[2], raw[3]],
            partition_type: raw[4],
            chs_end: [raw[5], raw[6], raw[7]],
            start_lba: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            sector_count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    /// Check if the bootable attribute bit is set
    pub fn is_bootable(&self) -> bool {
        self.attributes & BOOTABLE_FLAG != 0
    }

    /// First LBA past the partition
    pub fn end_lba(&self) -> u32 {
        self.start_lba.saturating_add(self.sector_count)
    }
}

/// Parsed MBR partition table
#[derive(Debug, Clone, Copy)]
pub struct MasterBootRecord {
    pub partitions: [PartitionEntry; MAX_PARTITIONS],
    pub signature: u16,
}

impl MasterBootRecord {
    /// Parse an MBR sector, verifying the 0xAA55 signature
    pub fn parse(sector: &[u8; 512]) -> Result<Self> {
        let signature = u16::from_le_bytes([sector[510], sector[511]]);
        if signature != MBR_SIGNATURE {
            return Err(BootError::InvalidBootRecord);
        }

        let mut partitions = [PartitionEntry::parse(&[0u8; PARTITION_ENTRY_SIZE]); MAX_PARTITIONS];
        for (i, slot) in partitions.iter_mut().enumerate() {
            let offset = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            *slot = PartitionEntry::parse(&sector[offset..offset + PARTITION_ENTRY_SIZE]);
        }

        Ok(Self {
            partitions,
            signature,
        })
    }

    /// First partition with the bootable attribute bit set
    pub fn find_bootable_partition(&self) -> Option<&PartitionEntry> {
        self.partitions.iter().find(|p| p.is_bootable())
    }
}

/// Locate the boot partition's start LBA in an MBR sector
pub fn locate_boot_partition(sector: &[u8; 512]) -> Result<u32> {
    let mbr = MasterBootRecord::parse(sector)?;
    let entry = mbr
        .find_bootable_partition()
        .ok_or(BootError::NoBootablePartition)?;

    log::debug!(
        "boot partition: type={:#04x} lba={} sectors={}",
        entry.partition_type,
        entry.start_lba,
        entry.sector_count
    );
    Ok(entry.start_lba)
}
