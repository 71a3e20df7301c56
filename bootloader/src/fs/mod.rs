//! Filesystem layer - read-only FAT32 volume access

pub mod fat32;
