//! Read-only FAT32 volume driver
//!
//! Mounts the boot partition, resolves 8.3 names in the single-cluster root
//! directory, and materializes file contents into heap buffers by following
//! the FAT cluster chain. Write support, long-file-name resolution and
//! multi-cluster root directories are out of scope; the latter two are
//! detected and rejected rather than mis-parsed.
//!
//! All on-disk structures are deserialized by explicit little-endian offset
//! reads into owned structs; wire bytes are never aliased as structs.

use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::bios::realmode::SECTOR_SIZE;
use crate::error::{BootError, FsFormatError, Result};
use crate::firmware::disk::DiskChannel;
use crate::memory::{BootHeap, HeapBuf};

/// The top 4 bits of a FAT entry are reserved and must be masked
pub const CLUSTER_MASK: u32 = 0x0FFF_FFFF;

/// End-of-chain marker range, after masking
pub const END_OF_CHAIN_MIN: u32 = 0x0FFF_FFF8;

/// Directory entries are packed 32-byte records
pub const DIR_ENTRY_SIZE: usize = 32;

/// First name byte marking the end of a directory region
const ENTRY_END: u8 = 0x00;

/// First name byte marking a deleted entry
const ENTRY_DELETED: u8 = 0xE5;

bitflags! {
    /// Directory entry attribute byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const SUBDIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        /// Long-file-name marker: all four low attribute bits at once
        const LFN = 0x0F;
    }
}

/// Check whether a masked FAT entry ends a cluster chain
pub fn is_end_of_chain(value: u32) -> bool {
    let value = value & CLUSTER_MASK;
    (END_OF_CHAIN_MIN..=CLUSTER_MASK).contains(&value)
}

/// BIOS Parameter Block, including the FAT32 extended boot record fields
///
/// `bytes_per_sector` is assumed to be 512 and is not verified; the disk
/// channel reads in 512-byte sectors regardless.
#[derive(Debug, Clone, Copy)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub total_sectors: u32,
    pub hidden_sectors: u32,
    pub sectors_per_fat: u32,
    pub root_cluster: u32,
    /// Extended-boot-record signature byte (0x28/0x29), stored, not verified
    pub ebr_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
}

impl BiosParameterBlock {
    /// Deserialize from a VBR sector
    pub fn parse(sector: &[u8; 512]) -> Self {
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&sector[71..82]);

        Self {
            bytes_per_sector: u16::from_le_bytes([sector[11], sector[12]]),
            sectors_per_cluster: sector[13],
            reserved_sectors: u16::from_le_bytes([sector[14], sector[15]]),
            fat_count: sector[16],
            total_sectors: u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]),
            hidden_sectors: u32::from_le_bytes([sector[28], sector[29], sector[30], sector[31]]),
            sectors_per_fat: u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]),
            root_cluster: u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]),
            ebr_signature: sector[66],
            volume_id: u32::from_le_bytes([sector[67], sector[68], sector[69], sector[70]]),
            volume_label,
        }
    }

    /// Bytes covered by one cluster
    pub fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * self.bytes_per_sector as usize
    }

    /// First data sector, relative to the partition start
    pub fn first_data_sector(&self) -> u32 {
        self.reserved_sectors as u32 + self.fat_count as u32 * self.sectors_per_fat
    }
}

/// One 32-byte directory entry
#[derive(Debug, Clone, Copy)]
pub struct DirectoryEntry {
    pub name: [u8; 8],
    pub extension: [u8; 3],
    pub attributes: DirAttributes,
    pub first_cluster: u32,
    pub size: u32,
}

impl DirectoryEntry {
    /// Deserialize from a 32-byte record
    pub fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[0..8]);
        let mut extension = [0u8; 3];
        extension.copy_from_slice(&raw[8..11]);

        let high = u16::from_le_bytes([raw[20], raw[21]]) as u32;
        let low = u16::from_le_bytes([raw[26], raw[27]]) as u32;

        Self {
            name,
            extension,
            attributes: DirAttributes::from_bits_retain(raw[11]),
            first_cluster: high << 16 | low,
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    pub fn is_long_name(&self) -> bool {
        self.attributes.contains(DirAttributes::LFN)
    }

    pub fn is_subdirectory(&self) -> bool {
        self.attributes.contains(DirAttributes::SUBDIRECTORY)
    }

    /// Reconstruct the 8.3 name: the name field up to the first space, then
    /// `.` and the raw three extension bytes for anything that is not a
    /// subdirectory.
    pub fn short_name(&self) -> ArrayVec<u8, 12> {
        let mut out = ArrayVec::new();
        for &c in &self.name {
            if c == b' ' {
                break;
            }
            out.push(c);
        }
        if !self.is_subdirectory() {
            out.push(b'.');
            for &c in &self.extension {
                out.push(c);
            }
        }
        out
    }
}

/// File contents materialized into a heap buffer
///
/// The buffer is rounded up to whole clusters; `bytes()` exposes exactly the
/// recorded file size. Never freed: the kernel image and boot information
/// outlive the loader.
#[derive(Debug)]
pub struct LoadedFile {
    buf: HeapBuf,
    size: usize,
}

impl LoadedFile {
    /// Recorded byte length
    pub fn size(&self) -> usize {
        self.size
    }

    /// Physical address of the contents
    pub fn addr(&self) -> u32 {
        self.buf.addr()
    }

    /// The file contents
    pub fn bytes(&self) -> &[u8] {
        &self.buf.as_slice()[..self.size]
    }
}

/// Mounted FAT32 volume
///
/// Owns its parsed BPB and the in-memory FAT for the whole boot.
pub struct Fat32Volume {
    bpb: BiosParameterBlock,
    fat: HeapBuf,
    partition_lba: u32,
}

impl Fat32Volume {
    /// Mount the volume starting at `partition_lba`
    ///
    /// Reads the VBR and the entire first FAT into a heap buffer.
    pub fn mount(
        disk: &mut DiskChannel<'_>,
        heap: &mut BootHeap,
        partition_lba: u32,
    ) -> Result<Self> {
        let mut vbr = [0u8; 512];
        disk.read(partition_lba as u64, &mut vbr)?;
        let bpb = BiosParameterBlock::parse(&vbr);

        let fat_bytes = bpb.sectors_per_fat as usize * bpb.bytes_per_sector as usize;
        let mut fat = heap.allocate(fat_bytes).ok_or(BootError::OutOfMemory)?;
        disk.read(
            partition_lba as u64 + bpb.reserved_sectors as u64,
            fat.as_mut_slice(),
        )?;

        log::debug!(
            "fat32: mounted lba={} serial={:#010x} spc={} fat_sectors={} root={}",
            partition_lba,
            bpb.volume_id,
            bpb.sectors_per_cluster,
            bpb.sectors_per_fat,
            bpb.root_cluster
        );

        Ok(Self {
            bpb,
            fat,
            partition_lba,
        })
    }

    /// The parsed BIOS parameter block
    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    /// Look up `name` in the root directory and read the whole file
    ///
    /// Returns `Ok(None)` when no entry matches. Deleted entries and a root
    /// directory longer than one cluster are format errors; any disk failure
    /// is fatal upstream.
    pub fn root_file(
        &self,
        disk: &mut DiskChannel<'_>,
        heap: &mut BootHeap,
        name: &str,
    ) -> Result<Option<LoadedFile>> {
        let root = self.bpb.root_cluster;
        if !is_end_of_chain(self.fat_entry(root)?) {
            return Err(FsFormatError::MultiClusterRootDirectory.into());
        }

        let mut dir = heap
            .allocate(self.bpb.cluster_bytes())
            .ok_or(BootError::OutOfMemory)?;
        self.read_cluster(disk, root, dir.as_mut_slice())?;

        for raw in dir.as_slice().chunks_exact(DIR_ENTRY_SIZE) {
            match raw[0] {
                ENTRY_END => break,
                ENTRY_DELETED => return Err(FsFormatError::DeletedEntry.into()),
                _ => {}
            }

            let entry = DirectoryEntry::parse(raw);
            if entry.is_long_name() {
                // Not merged into a long name, just stepped over
                continue;
            }

            if entry.short_name().as_slice() == name.as_bytes() {
                log::debug!(
                    "fat32: {} at cluster {} ({} bytes)",
                    name,
                    entry.first_cluster,
                    entry.size
                );
                return self.read_file(disk, heap, &entry).map(Some);
            }
        }

        Ok(None)
    }

    /// Follow the cluster chain and materialize the file
    fn read_file(
        &self,
        disk: &mut DiskChannel<'_>,
        heap: &mut BootHeap,
        entry: &DirectoryEntry,
    ) -> Result<LoadedFile> {
        let size = entry.size as usize;
        let cluster_bytes = self.bpb.cluster_bytes();
        let cluster_budget = size.div_ceil(cluster_bytes);

        let mut buf = heap
            .allocate(cluster_budget * cluster_bytes)
            .ok_or(BootError::OutOfMemory)?;
        if size == 0 {
            return Ok(LoadedFile { buf, size });
        }

        let mut cluster = entry.first_cluster & CLUSTER_MASK;
        let mut hops = 0;
        while !is_end_of_chain(cluster) {
            // A live chain must reach end-of-chain within ceil(size /
            // cluster_bytes) hops.
            if hops == cluster_budget {
                return Err(FsFormatError::ClusterChainTooLong.into());
            }

            let base = hops * cluster_bytes;
            self.read_cluster(disk, cluster, &mut buf.as_mut_slice()[base..base + cluster_bytes])?;

            cluster = self.fat_entry(cluster)?;
            hops += 1;
        }

        Ok(LoadedFile { buf, size })
    }

    /// Read one whole cluster, one sector at a time
    fn read_cluster(
        &self,
        disk: &mut DiskChannel<'_>,
        cluster: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        if cluster < 2 {
            return Err(FsFormatError::InvalidCluster.into());
        }
        let lba = self.partition_lba as u64
            + self.bpb.first_data_sector() as u64
            + (cluster as u64 - 2) * self.bpb.sectors_per_cluster as u64;

        for sector in 0..self.bpb.sectors_per_cluster as usize {
            let slice = &mut buf[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
            disk.read(lba + sector as u64, slice)?;
        }
        Ok(())
    }

    /// Masked FAT entry for `cluster`
    fn fat_entry(&self, cluster: u32) -> Result<u32> {
        let offset = cluster as usize * 4;
        let fat = self.fat.as_slice();
        let raw = fat
            .get(offset..offset + 4)
            .ok_or(BootError::Filesystem(FsFormatError::InvalidCluster))?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) & CLUSTER_MASK)
    }
}
