//! On-disk directory-entry layout (C3) — http://ntfs.com/exfat-directory-structure.htm
//!
//! Field layout is lifted straight from the teacher crate's
//! `dir::entry::DirEntry` and its variant structs; what changed is the
//! purpose each accessor serves. The teacher only ever constructs entries
//! (`FileEntry::new()` etc. are `unimplemented!()` there); the checker only
//! ever reads and re-checksums them, so the constructors are gone and the
//! checksum routine now has a companion that *verifies* instead of just
//! producing a value to stamp at format time.

use std::mem::transmute;

use bitflags::bitflags;
use enumeric::range_enum;

use crate::error::DirEntryError;

pub mod iterator;

pub(crate) const VOLUME_GUID_ENTRY_TYPE: u8 = 0xA0;

/// A generic exFAT directory entry — one 32-byte slot in a directory
/// stream. `#[range_enum]` dispatches on the first byte, same as the
/// teacher's `DirEntry`.
#[derive(Copy, Clone)]
#[repr(C, u8)]
#[range_enum]
pub enum DirEntry {
    EndOfDirectory([u8; 31]) = 0x0,
    #[range(0x1..0x80)]
    Unused([u8; 31]),
    Invalid = 0x80,
    // critical primary:
    Bitmap(BitmapEntry),
    UpcaseTable(UpcaseTableEntry),
    VolumeLabel(VolumeLabelEntry),
    File(FileEntry) = 0x85,
    // benign primary:
    VolumeGuid(VolumeGuidEntry) = VOLUME_GUID_ENTRY_TYPE,
    // critical secondary:
    StreamExtension(StreamExtensionEntry) = 0xC0,
    FileName(FileNameEntry),
    // benign secondary:
    VendorExtension(VendorExtensionEntry) = 0xE0,
    VendorAllocation(VendorAllocationEntry),
}

impl TryFrom<[u8; 32]> for DirEntry {
    type Error = DirEntryError;

    fn try_from(value: [u8; 32]) -> Result<Self, DirEntryError> {
        let r#type = value[0];
        match r#type {
            0x0..=0x83 | 0x85 | 0xA0 | 0xC0..=0xC1 | 0xE0..=0xE1 => {
                Ok(unsafe { transmute::<[u8; 32], DirEntry>(value) })
            }
            _ => Err(DirEntryError::InvalidEntryType(r#type)),
        }
    }
}

impl DirEntry {
    pub fn bytes(&self) -> [u8; 32] {
        assert_eq!(size_of::<DirEntry>(), 32);
        unsafe { transmute::<DirEntry, [u8; 32]>(*self) }
    }

    pub fn entry_type(&self) -> u8 {
        // SAFETY: `Self` is `repr(u8)`, laid out as a `repr(C)` union whose
        // members all carry the discriminant as their first byte.
        unsafe { *<*const _>::from(self).cast::<u8>() }
    }

    /// `InUse` bit (0x80) set — an entry that is neither free nor a marker.
    pub fn regular(&self) -> bool {
        self.entry_type() >= 0x81
    }

    /// A `0x01..0x80` marker left behind by a deleted entry.
    pub fn unused(&self) -> bool {
        self.entry_type() > 0x0 && self.entry_type() < 0x80
    }

    /// Primary entries have bit 6 of the type clear.
    pub fn primary(&self) -> bool {
        ((self.entry_type() & 0x40) >> 6) == 0
    }

    /// Computes the running 16-bit directory-entry-set checksum, one entry
    /// at a time — `input` is the accumulator from the previous entry in the
    /// set (`0` for the first). `is_set_primary` must be `true` only for the
    /// very first entry of the set (the `File` entry), whose own
    /// `SetChecksum` field (bytes 2-3) is excluded from the sum it protects;
    /// every other entry, including secondaries, contributes all 32 bytes.
    pub fn checksum(&self, input: u16, is_set_primary: bool) -> u16 {
        let bytes = self.bytes();

        let mut sum = input.rotate_right(1);
        sum = sum.wrapping_add(bytes[0] as u16);
        sum = sum.rotate_right(1);
        sum = sum.wrapping_add(bytes[1] as u16);

        let start = if is_set_primary { 4 } else { 2 };

        for b in bytes[start..].iter() {
            sum = sum.rotate_right(1);
            sum = sum.wrapping_add(*b as u16);
        }

        sum
    }
}

/// Whether a cluster-allocating entry's `FirstCluster`/`DataLength` pair is
/// internally well-formed, independent of whether the FAT backs it up
/// (spec §4.4 treats that as a separate, per-chain check).
pub trait ClusterAllocation {
    fn valid(&self) -> bool;
}

fn allocation_plausible(first_cluster: u32, data_len: u64) -> bool {
    !(first_cluster == 0 && data_len != 0) && (first_cluster == 0 || first_cluster >= 2)
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct BitmapEntry {
    pub flags: u8,
    pub _reserved: [u8; 18],
    pub first_cluster: u32,
    pub data_len: u64,
}

impl BitmapEntry {
    pub fn index(&self) -> u8 {
        self.flags & 1
    }
}

impl ClusterAllocation for BitmapEntry {
    fn valid(&self) -> bool {
        allocation_plausible(self.first_cluster, self.data_len)
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UpcaseTableEntry {
    pub _reserved1: [u8; 3],
    pub table_checksum: u32,
    pub _reserved2: [u8; 12],
    pub first_cluster: u32,
    pub data_len: u64,
}

impl ClusterAllocation for UpcaseTableEntry {
    fn valid(&self) -> bool {
        allocation_plausible(self.first_cluster, self.data_len)
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VolumeLabelEntry {
    pub character_count: u8,
    pub volume_label: [u8; 22],
    pub _reserved: u64,
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FileAttributes: u16 {
        const READ_ONLY = 0x0001;
        const HIDDEN = 0x0002;
        const SYSTEM = 0x0004;
        const DIRECTORY = 0x0010;
        const ARCHIVE = 0x0020;
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct FileEntry {
    pub secondary_count: u8,
    pub set_checksum: u16,
    pub file_attributes: u16,
    pub _reserved1: u16,
    pub create_timestamp: u32,
    pub last_modified_timestamp: u32,
    pub last_accessed_timestamp: u32,
    pub create_10ms_increment: u8,
    pub last_modified_10ms_increment: u8,
    pub create_utc_offset: u8,
    pub last_modified_utc_offset: u8,
    pub last_accessed_utc_offset: u8,
    pub _reserved2: [u8; 7],
}

impl FileEntry {
    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_bits_truncate(self.file_attributes)
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VolumeGuidEntry {
    pub secondary_count: u8,
    pub set_checksum: u16,
    pub general_primary_flag: u16,
    pub volume_guid: u128,
    pub _reserved: [u8; 10],
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct GeneralSecondaryFlags: u8 {
        const ALLOCATION_POSSIBLE = 0b01;
        const NO_FAT_CHAIN = 0b10;
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct StreamExtensionEntry {
    pub general_secondary_flags: u8,
    pub _reserved1: u8,
    /// Length of the filename, in UTF-16 code units.
    pub name_length: u8,
    pub name_hash: u16,
    pub _reserved2: u16,
    pub valid_data_length: u64,
    pub _reserved3: u32,
    pub first_cluster: u32,
    pub data_len: u64,
}

impl StreamExtensionEntry {
    pub fn flags(&self) -> GeneralSecondaryFlags {
        GeneralSecondaryFlags::from_bits_truncate(self.general_secondary_flags)
    }
}

impl ClusterAllocation for StreamExtensionEntry {
    fn valid(&self) -> bool {
        allocation_plausible(self.first_cluster, self.data_len)
            && self.name_length > 0
            && self.valid_data_length <= self.data_len
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct FileNameEntry {
    pub general_secondary_flags: u8,
    pub file_name: [u8; 30],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VendorExtensionEntry {
    pub general_secondary_flag: u8,
    pub vendor_guid: u128,
    pub vendor_defined: [u8; 14],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default)]
pub struct VendorAllocationEntry {
    pub general_secondary_flag: u8,
    pub vendor_guid: u128,
    pub vendor_defined: u16,
    pub first_cluster: u32,
    pub data_len: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(r#type: u8) -> [u8; 32] {
        let mut b = [0u8; 32];
        b[0] = r#type;
        b
    }

    #[test]
    fn end_of_directory_parses() {
        let entry = DirEntry::try_from(entry_bytes(0x00)).unwrap();
        assert!(!entry.regular());
        assert!(!entry.unused());
    }

    #[test]
    fn unused_marker_parses() {
        let entry = DirEntry::try_from(entry_bytes(0x05)).unwrap();
        assert!(entry.unused());
        assert!(!entry.regular());
    }

    #[test]
    fn unrecognized_type_errors() {
        let err = DirEntry::try_from(entry_bytes(0x90)).unwrap_err();
        assert_eq!(err, DirEntryError::InvalidEntryType(0x90));
    }

    #[test]
    fn primary_secondary_dispatch() {
        let file = DirEntry::try_from(entry_bytes(0x85)).unwrap();
        assert!(file.primary());
        let stream = DirEntry::try_from(entry_bytes(0xC0)).unwrap();
        assert!(!stream.primary());
    }

    #[test]
    fn checksum_excludes_set_checksum_field_on_primary() {
        let mut bytes = entry_bytes(0x85);
        bytes[2] = 0xAB;
        bytes[3] = 0xCD;
        let with_checksum = DirEntry::try_from(bytes).unwrap();

        bytes[2] = 0;
        bytes[3] = 0;
        let without = DirEntry::try_from(bytes).unwrap();

        assert_eq!(with_checksum.checksum(0, true), without.checksum(0, true));
    }

    #[test]
    fn checksum_includes_byte_two_and_three_on_secondary() {
        let mut bytes = entry_bytes(0xC0);
        bytes[2] = 0xAB;
        let with_byte = DirEntry::try_from(bytes).unwrap();
        bytes[2] = 0;
        let without = DirEntry::try_from(bytes).unwrap();

        assert_ne!(with_byte.checksum(0, false), without.checksum(0, false));
    }
}
