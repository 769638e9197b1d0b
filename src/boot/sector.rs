//! On-disk boot-sector layout (C3), read side.
//!
//! Field layout and the `#[repr(C)]` + `Pod`/`Zeroable` treatment come
//! straight from the teacher crate's formatter-side `BootSector` — the
//! checker reads the identical 512-byte structure, just with validation and
//! repair instead of construction.

use bytemuck::{Pod, Zeroable};
use endify::Endify;

use crate::bitmap::FIRST_CLUSTER;

pub const BOOT_SIGNATURE: u16 = 0xAA55;
pub const FILESYSTEM_NAME: [u8; 8] = *b"EXFAT   ";

bitflags::bitflags! {
    /// Volume status flags (spec §6, `vol_flags` @106).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct VolumeFlags: u16 {
        const ACTIVE_FAT = 1 << 0;
        /// Bit 1: set whenever writes are in progress (§5).
        const VOLUME_DIRTY = 1 << 1;
        const MEDIA_FAILURE = 1 << 2;
        const CLEAR_TO_ZERO = 1 << 3;
    }
}

/// The Main/Backup Boot Sector of an exFAT volume (spec §6).
///
/// Loaded with `bytemuck::from_bytes` and converted from on-disk
/// little-endian to native endianness with a single `Endify::from_le`,
/// the same pattern the teacher crate's `Root::open` uses.
#[derive(Debug, Clone, Copy, Pod, Zeroable, Endify)]
#[repr(C)]
pub struct BootSector {
    pub jump_boot: [u8; 3],
    pub filesystem_name: [u8; 8],
    pub _reserved: [u8; 53],
    pub partition_offset: u64,
    pub volume_length: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub cluster_heap_offset: u32,
    pub cluster_count: u32,
    pub first_cluster_of_root_directory: u32,
    pub volume_serial_number: u32,
    /// Low byte minor, high byte major (spec §6: must be `0x0100`).
    pub file_system_revision: u16,
    pub volume_flags: u16,
    pub bytes_per_sector_shift: u8,
    pub sectors_per_cluster_shift: u8,
    pub number_of_fats: u8,
    pub drive_select: u8,
    pub percent_in_use: u8,
    pub _reserved2: [u8; 7],
    pub boot_code: [u8; 390],
    pub boot_signature: u16,
}

impl BootSector {
    pub fn bytes_per_sector(&self) -> u32 {
        1 << self.bytes_per_sector_shift
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        1 << self.sectors_per_cluster_shift
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector() * self.sectors_per_cluster()
    }

    pub fn volume_flags(&self) -> VolumeFlags {
        VolumeFlags::from_bits_truncate(self.volume_flags)
    }

    /// `true` if `cluster` lies within `[2, 2 + cluster_count)` (spec §3's "heap").
    pub fn in_heap(&self, cluster: u32) -> bool {
        cluster >= FIRST_CLUSTER && cluster < FIRST_CLUSTER + self.cluster_count
    }

    /// Byte offset of the start of `cluster` within the device, or `None`
    /// if `cluster` is outside the heap.
    pub fn cluster_offset(&self, cluster: u32) -> Option<u64> {
        if !self.in_heap(cluster) {
            return None;
        }
        let heap_offset = self.cluster_heap_offset as u64 * self.bytes_per_sector() as u64;
        let index = (cluster - FIRST_CLUSTER) as u64;
        Some(heap_offset + index * self.bytes_per_cluster() as u64)
    }

    /// Byte offset of FAT entry `cluster` in the active FAT.
    pub fn fat_entry_offset(&self, cluster: u32) -> Option<u64> {
        let fat_offset_bytes = self.fat_offset as u64 * self.bytes_per_sector() as u64;
        fat_offset_bytes.checked_add(4u64.checked_mul(cluster as u64)?)
    }

    pub fn major_revision(&self) -> u8 {
        (self.file_system_revision >> 8) as u8
    }

    pub fn minor_revision(&self) -> u8 {
        (self.file_system_revision & 0xFF) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BootSector {
        BootSector {
            jump_boot: [0xEB, 0x76, 0x90],
            filesystem_name: FILESYSTEM_NAME,
            _reserved: [0; 53],
            partition_offset: 0,
            volume_length: 524288,
            fat_offset: 2048,
            fat_length: 510,
            cluster_heap_offset: 4096,
            cluster_count: 65024,
            first_cluster_of_root_directory: 6,
            volume_serial_number: 0,
            file_system_revision: 0x0100,
            volume_flags: 0,
            bytes_per_sector_shift: 9,
            sectors_per_cluster_shift: 3,
            number_of_fats: 1,
            drive_select: 0x80,
            percent_in_use: 0,
            _reserved2: [0; 7],
            boot_code: [0xF4; 390],
            boot_signature: BOOT_SIGNATURE,
        }
    }

    #[test]
    fn derived_geometry() {
        let bs = sample();
        assert_eq!(bs.bytes_per_sector(), 512);
        assert_eq!(bs.sectors_per_cluster(), 8);
        assert_eq!(bs.bytes_per_cluster(), 4096);
    }

    #[test]
    fn heap_membership_and_offsets() {
        let bs = sample();
        assert!(!bs.in_heap(0));
        assert!(!bs.in_heap(1));
        assert!(bs.in_heap(2));
        assert!(bs.in_heap(2 + bs.cluster_count - 1));
        assert!(!bs.in_heap(2 + bs.cluster_count));

        let base = bs.cluster_heap_offset as u64 * bs.bytes_per_sector() as u64;
        assert_eq!(bs.cluster_offset(2), Some(base));
        assert_eq!(bs.cluster_offset(3), Some(base + bs.bytes_per_cluster() as u64));
    }

    #[test]
    fn revision_split() {
        let bs = sample();
        assert_eq!(bs.major_revision(), 1);
        assert_eq!(bs.minor_revision(), 0);
    }
}
