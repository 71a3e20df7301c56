/// Disk Channel
///
/// Synchronous block-read abstraction over the real-mode INT 0x13 bridge.
/// The bridge moves at most 127 sectors per call; the channel transparently
/// splits larger requests and accumulates the results into the caller's
/// buffer in LBA order. There is no retry path: a failed transfer is fatal
/// for the boot.

use crate::bios::realmode::{DiskError, DiskServices, MAX_SECTORS_PER_TRANSFER, SECTOR_SIZE};
use crate::error::{BootError, Result};

/// Block-read channel bound to one drive
pub struct DiskChannel<'a> {
    bridge: &'a mut dyn DiskServices,
    drive: u8,
}

impl<'a> DiskChannel<'a> {
    /// Create a channel over `bridge` for BIOS drive `drive`
    pub fn new(bridge: &'a mut dyn DiskServices, drive: u8) -> Self {
        Self { bridge, drive }
    }

    /// BIOS drive number this channel reads from
    pub fn drive(&self) -> u8 {
        self.drive
    }

    /// Read whole sectors starting at `lba` into `buf`
    ///
    /// `buf` must be a whole number of 512-byte sectors.
    pub fn read(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(BootError::DiskIo(DiskError::BufferMismatch));
        }

        let mut current_lba = lba;
        let mut remaining = buf;

        while !remaining.is_empty() {
            let sectors = (remaining.len() / SECTOR_SIZE).min(MAX_SECTORS_PER_TRANSFER as usize);
            let bytes = sectors * SECTOR_SIZE;
            let (chunk, rest) = remaining.split_at_mut(bytes);

            log::trace!("disk read: lba={current_lba} sectors={sectors}");
            self.bridge
                .read_sectors(self.drive, current_lba, sectors as u16, chunk)?;

            current_lba += sectors as u64;
            remaining = rest;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bridge fake that records per-call sector counts
    struct RecordingDisk {
        image: Vec<u8>,
        calls: Vec<u16>,
    }

    impl RecordingDisk {
        fn new(sectors: usize) -> Self {
            let mut image = vec![0u8; sectors * SECTOR_SIZE];
            for (i, byte) in image.iter_mut().enumerate() {
                *byte = (i / SECTOR_SIZE) as u8;
            }
            Self {
                image,
                calls: Vec::new(),
            }
        }
    }

    impl DiskServices for RecordingDisk {
        fn read_sectors(
            &mut self,
            _drive: u8,
            lba: u64,
            count: u16,
            buf: &mut [u8],
        ) -> core::result::Result<(), DiskError> {
            assert!(count <= MAX_SECTORS_PER_TRANSFER);
            assert_eq!(buf.len(), count as usize * SECTOR_SIZE);
            self.calls.push(count);

            let start = lba as usize * SECTOR_SIZE;
            let end = start + buf.len();
            if end > self.image.len() {
                return Err(DiskError::OutOfRange);
            }
            buf.copy_from_slice(&self.image[start..end]);
            Ok(())
        }
    }

    #[test]
    fn test_small_read_is_single_call() {
        let mut bridge = RecordingDisk::new(16);
        let mut channel = DiskChannel::new(&mut bridge, 0x80);

        let mut buf = [0u8; 2 * SECTOR_SIZE];
        channel.read(3, &mut buf).unwrap();

        assert_eq!(buf[0], 3);
        assert_eq!(buf[SECTOR_SIZE], 4);
        assert_eq!(bridge.calls, vec![2]);
    }

    #[test]
    fn test_large_read_is_split_in_lba_order() {
        let mut bridge = RecordingDisk::new(300);
        let mut channel = DiskChannel::new(&mut bridge, 0x80);

        let mut buf = vec![0u8; 300 * SECTOR_SIZE];
        channel.read(0, &mut buf).unwrap();

        assert_eq!(bridge.calls, vec![127, 127, 46]);
        for sector in 0..300 {
            assert_eq!(buf[sector * SECTOR_SIZE], sector as u8, "sector {sector}");
        }
    }

    #[test]
    fn test_partial_sector_buffer_is_rejected() {
        let mut bridge = RecordingDisk::new(4);
        let mut channel = DiskChannel::new(&mut bridge, 0x80);

        let mut buf = [0u8; 100];
        assert_eq!(
            channel.read(0, &mut buf),
            Err(BootError::DiskIo(DiskError::BufferMismatch))
        );
    }

    #[test]
    fn test_bridge_failure_propagates() {
        let mut bridge = RecordingDisk::new(4);
        let mut channel = DiskChannel::new(&mut bridge, 0x80);

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(
            channel.read(100, &mut buf),
            Err(BootError::DiskIo(DiskError::OutOfRange))
        );
    }
}
