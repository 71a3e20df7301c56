//! Multiboot v1 negotiation
//!
//! The kernel advertises its boot-protocol requirements through a header
//! embedded in the first 8 KiB of its image. The loader finds that header,
//! honors the requests it can satisfy, and builds the information block the
//! kernel reads after the jump. Compliance is strict: a request this loader
//! cannot satisfy fails the negotiation outright, because a half-populated
//! info structure would silently mislead the kernel.

use bitflags::bitflags;

use crate::bios::e820::{self, MemoryRegion};
use crate::bios::realmode::MemoryServices;
use crate::error::{BootError, ProtocolError, Result};
use crate::memory::BootHeap;

/// Magic value identifying the header inside the kernel image
pub const HEADER_MAGIC: u32 = 0x1BAD_B002;

/// Value placed in EAX at handoff: custom loader variant of 0x2BADB002,
/// signalling that the cursor index rides in ECX
pub const LOADER_MAGIC: u32 = 0x2BAD_B003;

/// The header must sit within the first 8 KiB of the image
pub const HEADER_SEARCH: usize = 8192;

/// Headers are aligned on 4-byte boundaries
pub const HEADER_ALIGN: usize = 4;

/// Magic, flags and checksum words
const HEADER_CORE_SIZE: usize = 12;

/// Serialized size of the info structure
pub const INFO_SIZE: usize = 120;

/// Serialized size of one memory-map record
pub const MMAP_ENTRY_SIZE: usize = 24;

bitflags! {
    /// Header feature requests
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// Memory information must be present in the info structure
        const MEMORY_INFO = 1 << 0;
        /// The boot device identifier must be present
        const BOOT_DEVICE = 1 << 1;
        /// Video mode information requested; never supported here
        const VIDEO_MODE = 1 << 2;
    }
}

bitflags! {
    /// Info structure field-presence bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoFlags: u32 {
        const MEMORY = 1 << 0;
        const BOOT_DEVICE = 1 << 1;
        const MEMORY_MAP = 1 << 6;
    }
}

/// Requests this loader can satisfy
const SUPPORTED_REQUESTS: u32 = HeaderFlags::MEMORY_INFO.bits() | HeaderFlags::BOOT_DEVICE.bits();

/// Header found inside a kernel image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultibootHeader {
    pub flags: HeaderFlags,
    pub checksum: u32,
    /// Byte offset of the header inside the image
    pub offset: usize,
}

/// Scan an image for a valid header
///
/// Walks 4-byte-aligned offsets while `offset + 12 <= min(8192, len)`,
/// accepting the first candidate whose magic matches and whose
/// `magic + flags + checksum` wraps to zero.
pub fn search(image: &[u8]) -> Option<MultibootHeader> {
    let window = HEADER_SEARCH.min(image.len());

    let mut offset = 0;
    while offset + HEADER_CORE_SIZE <= window {
        let magic = read_u32(image, offset);
        if magic == HEADER_MAGIC {
            let flags = read_u32(image, offset + 4);
            let checksum = read_u32(image, offset + 8);
            if magic.wrapping_add(flags).wrapping_add(checksum) == 0 {
                log::debug!("multiboot header at offset {offset:#x}, flags {flags:#010x}");
                return Some(MultibootHeader {
                    flags: HeaderFlags::from_bits_retain(flags),
                    checksum,
                    offset,
                });
            }
        }
        offset += HEADER_ALIGN;
    }

    None
}

/// Info structure handed to the kernel
///
/// Output-only; which fields are populated is gated by the header requests.
/// The remaining protocol fields (modules, symbols, drives, VBE, ...) stay
/// zero and unflagged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultibootInfo {
    pub flags: InfoFlags,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

impl Default for InfoFlags {
    fn default() -> Self {
        InfoFlags::empty()
    }
}

impl MultibootInfo {
    /// Serialize the 120-byte little-endian wire layout
    pub fn write_to(&self, out: &mut [u8]) {
        out[..INFO_SIZE].fill(0);
        write_u32(out, 0, self.flags.bits());
        write_u32(out, 4, self.mem_lower);
        write_u32(out, 8, self.mem_upper);
        write_u32(out, 12, self.boot_device);
        write_u32(out, 44, self.mmap_length);
        write_u32(out, 48, self.mmap_addr);
    }
}

/// Serialize memory-map records in the 24-byte wire layout
///
/// Each record advertises 20 payload bytes (base, length, type); the BIOS
/// ACPI attribute word is not carried forward.
pub fn write_memory_map(regions: &[MemoryRegion], out: &mut [u8]) {
    for (i, region) in regions.iter().enumerate() {
        let base = i * MMAP_ENTRY_SIZE;
        write_u32(out, base, 20);
        write_u32(out, base + 4, region.base as u32);
        write_u32(out, base + 8, (region.base >> 32) as u32);
        write_u32(out, base + 12, region.length as u32);
        write_u32(out, base + 16, (region.length >> 32) as u32);
        write_u32(out, base + 20, region.region_type);
    }
}

/// Negotiated info block, serialized into the boot heap
#[derive(Debug)]
pub struct BuiltInfo {
    pub info: MultibootInfo,
    /// Physical address of the serialized structure
    pub addr: u32,
}

/// Build the info structure the header asks for
///
/// Bit 0 queries lower and upper memory and serializes the memory map;
/// bit 1 records the boot device. Bit 2 and anything above bit 1 are
/// unsupported and fail the negotiation.
pub fn build(
    header: &MultibootHeader,
    boot_device: u8,
    memory: &mut dyn MemoryServices,
    heap: &mut BootHeap,
) -> Result<BuiltInfo> {
    let requests = header.flags.bits();
    if requests & !SUPPORTED_REQUESTS != 0 {
        log::error!("unsupported multiboot requests: {requests:#010x}");
        return Err(BootError::Protocol(ProtocolError::UnsupportedFlags));
    }

    let mut info = MultibootInfo::default();

    if header.flags.contains(HeaderFlags::MEMORY_INFO) {
        info.mem_lower = memory.lower_memory_kib()?;

        let regions = memory.upper_memory_map()?;
        // 0 means the installed memory is not describable in 32 bits
        info.mem_upper = e820::combined_length(&regions).unwrap_or(0);

        if !regions.is_empty() {
            let mut map_buf = heap
                .allocate(regions.len() * MMAP_ENTRY_SIZE)
                .ok_or(BootError::OutOfMemory)?;
            write_memory_map(&regions, map_buf.as_mut_slice());
            info.mmap_length = (regions.len() * MMAP_ENTRY_SIZE) as u32;
            info.mmap_addr = map_buf.addr();
        }

        info.flags |= InfoFlags::MEMORY | InfoFlags::MEMORY_MAP;
    }

    if header.flags.contains(HeaderFlags::BOOT_DEVICE) {
        info.boot_device = boot_device as u32;
        info.flags |= InfoFlags::BOOT_DEVICE;
    }

    let mut info_buf = heap.allocate(INFO_SIZE).ok_or(BootError::OutOfMemory)?;
    info.write_to(info_buf.as_mut_slice());

    log::debug!(
        "multiboot info at {:#010x}: flags {:#010x}",
        info_buf.addr(),
        info.flags.bits()
    );

    Ok(BuiltInfo {
        info,
        addr: info_buf.addr(),
    })
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bios::e820::MemoryMap;
    use crate::bios::realmode::MemoryDetectError;

    fn place_header(image: &mut [u8], offset: usize, flags: u32) {
        let checksum = 0u32.wrapping_sub(HEADER_MAGIC.wrapping_add(flags));
        image[offset..offset + 4].copy_from_slice(&HEADER_MAGIC.to_le_bytes());
        image[offset + 4..offset + 8].copy_from_slice(&flags.to_le_bytes());
        image[offset + 8..offset + 12].copy_from_slice(&checksum.to_le_bytes());
    }

    struct FakeMemory {
        lower: u32,
        regions: Vec<MemoryRegion>,
    }

    impl FakeMemory {
        fn new() -> Self {
            Self {
                lower: 639,
                regions: vec![
                    MemoryRegion {
                        base: 0,
                        length: 0x9FC00,
                        region_type: 1,
                        acpi_extended: 0,
                    },
                    MemoryRegion {
                        base: 0x10_0000,
                        length: 0x1F0_0000,
                        region_type: 1,
                        acpi_extended: 0,
                    },
                ],
            }
        }
    }

    impl MemoryServices for FakeMemory {
        fn lower_memory_kib(&mut self) -> core::result::Result<u32, MemoryDetectError> {
            Ok(self.lower)
        }

        fn upper_memory_map(&mut self) -> core::result::Result<MemoryMap, MemoryDetectError> {
            let mut map = MemoryMap::new();
            for region in &self.regions {
                map.push(*region);
            }
            Ok(map)
        }
    }

    fn test_heap() -> BootHeap {
        let buf = Box::leak(vec![0u8; 16 * 1024].into_boxed_slice());
        // SAFETY: leaked, exclusively owned.
        unsafe { BootHeap::new(buf.as_mut_ptr(), buf.len()) }
    }

    #[test]
    fn test_search_finds_aligned_header() {
        let mut image = vec![0u8; 4096];
        place_header(&mut image, 64, 3);

        let header = search(&image).unwrap();
        assert_eq!(header.offset, 64);
        assert_eq!(
            header.flags,
            HeaderFlags::MEMORY_INFO | HeaderFlags::BOOT_DEVICE
        );
    }

    #[test]
    fn test_search_ignores_bad_checksum() {
        let mut image = vec![0u8; 4096];
        place_header(&mut image, 64, 3);
        image[72] ^= 0xFF; // corrupt the checksum

        assert_eq!(search(&image), None);
    }

    #[test]
    fn test_search_ignores_unaligned_magic() {
        let mut image = vec![0u8; 4096];
        place_header(&mut image, 62, 0);

        assert_eq!(search(&image), None);
    }

    #[test]
    fn test_search_stops_at_window_end() {
        let mut image = vec![0u8; HEADER_SEARCH + 256];
        place_header(&mut image, HEADER_SEARCH, 0);

        assert_eq!(search(&image), None);
    }

    #[test]
    fn test_search_window_is_clamped_to_short_images() {
        // A header that would only fit past the end of a short image
        let mut image = vec![0u8; 16];
        place_header(&mut image, 4, 0);
        assert!(search(&image).is_some());
        assert!(search(&image[..8]).is_none());
    }

    #[test]
    fn test_build_fills_requested_fields() {
        let header = MultibootHeader {
            flags: HeaderFlags::MEMORY_INFO | HeaderFlags::BOOT_DEVICE,
            checksum: 0,
            offset: 0,
        };
        let mut memory = FakeMemory::new();
        let mut heap = test_heap();

        let built = build(&header, 0x80, &mut memory, &mut heap).unwrap();
        let info = built.info;

        assert_eq!(
            info.flags,
            InfoFlags::MEMORY | InfoFlags::BOOT_DEVICE | InfoFlags::MEMORY_MAP
        );
        assert_eq!(info.mem_lower, 639);
        assert_eq!(info.mem_upper, 0x9FC00 + 0x1F0_0000);
        assert_eq!(info.boot_device, 0x80);
        assert_eq!(info.mmap_length, 2 * MMAP_ENTRY_SIZE as u32);
        assert_ne!(info.mmap_addr, 0);
        assert_ne!(built.addr, 0);
    }

    #[test]
    fn test_build_reports_oversized_memory_as_zero() {
        let header = MultibootHeader {
            flags: HeaderFlags::MEMORY_INFO,
            checksum: 0,
            offset: 0,
        };
        let mut memory = FakeMemory::new();
        memory.regions[1].length = 0x2_0000_0000; // 8 GiB region

        let built = build(&header, 0x80, &mut memory, &mut test_heap()).unwrap();
        assert_eq!(built.info.mem_upper, 0);
    }

    #[test]
    fn test_build_rejects_video_mode_request() {
        let header = MultibootHeader {
            flags: HeaderFlags::MEMORY_INFO | HeaderFlags::VIDEO_MODE,
            checksum: 0,
            offset: 0,
        };
        let mut memory = FakeMemory::new();

        assert_eq!(
            build(&header, 0x80, &mut memory, &mut test_heap()).unwrap_err(),
            BootError::Protocol(ProtocolError::UnsupportedFlags)
        );
    }

    #[test]
    fn test_build_rejects_any_higher_flag_bit() {
        for bit in [3u32, 9, 15, 16, 31] {
            let header = MultibootHeader {
                flags: HeaderFlags::from_bits_retain(1 << bit),
                checksum: 0,
                offset: 0,
            };
            let mut memory = FakeMemory::new();
            assert_eq!(
                build(&header, 0x80, &mut memory, &mut test_heap()).unwrap_err(),
                BootError::Protocol(ProtocolError::UnsupportedFlags),
                "bit {bit} must be rejected"
            );
        }
    }

    #[test]
    fn test_info_serialization_layout() {
        let info = MultibootInfo {
            flags: InfoFlags::MEMORY | InfoFlags::MEMORY_MAP,
            mem_lower: 639,
            mem_upper: 0x1F00,
            boot_device: 0x80,
            mmap_length: 48,
            mmap_addr: 0x9000,
        };

        let mut out = [0xFFu8; INFO_SIZE];
        info.write_to(&mut out);

        assert_eq!(read_u32(&out, 0), InfoFlags::MEMORY.bits() | InfoFlags::MEMORY_MAP.bits());
        assert_eq!(read_u32(&out, 4), 639);
        assert_eq!(read_u32(&out, 8), 0x1F00);
        assert_eq!(read_u32(&out, 12), 0x80);
        assert_eq!(read_u32(&out, 44), 48);
        assert_eq!(read_u32(&out, 48), 0x9000);
        // Unpopulated protocol fields stay zero
        assert!(out[52..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_memory_map_serialization_layout() {
        let regions = [MemoryRegion {
            base: 0x1_2345_6789,
            length: 0xA_0000_0001,
            region_type: 1,
            acpi_extended: 1,
        }];
        let mut out = [0u8; MMAP_ENTRY_SIZE];
        write_memory_map(&regions, &mut out);

        assert_eq!(read_u32(&out, 0), 20);
        assert_eq!(read_u32(&out, 4), 0x2345_6789);
        assert_eq!(read_u32(&out, 8), 0x1);
        assert_eq!(read_u32(&out, 12), 0x0000_0001);
        assert_eq!(read_u32(&out, 16), 0xA);
        assert_eq!(read_u32(&out, 20), 1);
    }
}
