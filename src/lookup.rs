//! Streaming lookup filter (C8, spec §4.5).
//!
//! A single-pass scan of one directory's entries, stopping at the first
//! entry matching a predicate or at end-of-chain. Spec §9 calls the
//! source's callback a "function-pointer filter" and suggests a tagged
//! variant of the small closed set actually in use; this checker only ever
//! needs one member of that set before the general walk starts — "the
//! first regular entry of type T" (looking up the root directory's
//! `ALLOC_BITMAP` and `UPCASE_TABLE` entries, spec §4 data flow) — so
//! [`Predicate`] has exactly that variant.

use crate::boot::sector::BootSector;
use crate::dentry::iterator::DirEntryIterator;
use crate::dentry::DirEntry;
use crate::device::BlockDevice;
use crate::error::IteratorError;

/// The closed set of match rules this checker's lookups use.
pub enum Predicate {
    /// The first *regular* (in-use) entry whose type tag equals this.
    ByType(u8),
}

impl Predicate {
    fn matches_type(&self, entry: &DirEntry) -> bool {
        match self {
            Predicate::ByType(t) => entry.entry_type() == *t,
        }
    }
}

/// One matched entry plus the device offset its primary entry lives at, so
/// a caller can patch it in place without re-scanning.
pub struct LookupHit {
    pub offset: u64,
    pub entry: DirEntry,
}

/// Outcome of one [`find`] scan.
pub struct LookupResult {
    pub hit: Option<LookupHit>,
    /// Device offset of the first free (`LAST` or deleted) slot encountered
    /// before the match (or before end-of-chain, on a miss) — spec §4.5:
    /// "records the device offset of the first free slot encountered for
    /// later use by creation paths".
    pub first_free_slot: Option<u64>,
}

/// Scans `chain` for the first entry matching `predicate`.
pub fn find<D: BlockDevice>(
    device: &D,
    boot: &BootSector,
    chain: Vec<u32>,
    predicate: Predicate,
) -> Result<LookupResult, IteratorError<D>> {
    let mut it = DirEntryIterator::new(device, boot, chain)?;
    let mut first_free_slot = None;

    loop {
        if it.is_eof() {
            return Ok(LookupResult {
                hit: None,
                first_free_slot,
            });
        }
        let offset = it.device_offset();
        let entry = it.get(0)?;

        if let DirEntry::EndOfDirectory(_) = entry {
            if first_free_slot.is_none() {
                first_free_slot = offset;
            }
            return Ok(LookupResult {
                hit: None,
                first_free_slot,
            });
        }
        if entry.unused() {
            if first_free_slot.is_none() {
                first_free_slot = offset;
            }
            it.advance(1)?;
            continue;
        }
        if predicate.matches_type(&entry) {
            return Ok(LookupResult {
                hit: Some(LookupHit {
                    offset: offset.unwrap_or_default(),
                    entry,
                }),
                first_free_slot,
            });
        }
        it.advance(1)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::sector::{BOOT_SIGNATURE, FILESYSTEM_NAME};
    use crate::device::test_support::MemDevice;

    fn sample_boot() -> BootSector {
        BootSector {
            jump_boot: [0xEB, 0x76, 0x90],
            filesystem_name: FILESYSTEM_NAME,
            _reserved: [0; 53],
            partition_offset: 0,
            volume_length: 100_000,
            fat_offset: 8,
            fat_length: 16,
            cluster_heap_offset: 24,
            cluster_count: 1000,
            first_cluster_of_root_directory: 2,
            volume_serial_number: 0,
            file_system_revision: 0x0100,
            volume_flags: 0,
            bytes_per_sector_shift: 9,
            sectors_per_cluster_shift: 3,
            number_of_fats: 1,
            drive_select: 0x80,
            percent_in_use: 0,
            _reserved2: [0; 7],
            boot_code: [0; 390],
            boot_signature: BOOT_SIGNATURE,
        }
    }

    #[test]
    fn finds_first_matching_type_and_records_free_slot() {
        let boot = sample_boot();
        let dev = MemDevice::new(200_000);
        let heap_base = boot.cluster_heap_offset as u64 * boot.bytes_per_sector() as u64;

        // slot 0: deleted marker, slot 1: bitmap entry.
        let mut deleted = [0u8; 32];
        deleted[0] = 0x05;
        dev.write_at(heap_base, &deleted).unwrap();
        let mut bitmap_entry = [0u8; 32];
        bitmap_entry[0] = 0x81;
        dev.write_at(heap_base + 32, &bitmap_entry).unwrap();

        let result = find(&dev, &boot, vec![2], Predicate::ByType(0x81)).unwrap();
        let hit = result.hit.unwrap();
        assert_eq!(hit.entry.entry_type(), 0x81);
        assert_eq!(result.first_free_slot, Some(heap_base));
    }

    #[test]
    fn miss_returns_none_and_last_free_slot() {
        let boot = sample_boot();
        let dev = MemDevice::new(200_000);
        let heap_base = boot.cluster_heap_offset as u64 * boot.bytes_per_sector() as u64;
        // Cluster is all zero already (EndOfDirectory at slot 0).

        let result = find(&dev, &boot, vec![2], Predicate::ByType(0x81)).unwrap();
        assert!(result.hit.is_none());
        assert_eq!(result.first_free_slot, Some(heap_base));
    }
}
