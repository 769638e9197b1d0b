//! Post-walk FAT/bitmap reconciliation (C11, spec §4.7).
//!
//! Only runs when the walk truncated at least one chain
//! (`RepairPolicy::dirty_fat`). Walks the FAT cluster by cluster: any
//! cluster the walk never claimed in `alloc_bitmap` but that the FAT still
//! marks allocated is an orphan — spec §8 scenario 3's "Orphan tail" — and
//! gets freed, coalescing the writes into one flush per dirtied FAT sector
//! rather than one per freed entry. The on-disk allocation bitmap is then
//! diffed sector by sector against the walk's `alloc_bitmap`, rewriting only
//! the sectors that actually disagree, and finally `VolumeDirty` is cleared
//! and the device `fsync`'d (spec §5's ordering guarantee (iii)).

use std::collections::BTreeSet;

use crate::bitmap::ClusterBitmap;
use crate::boot::sector::BootSector;
use crate::device::BlockDevice;
use crate::error::FatError;
use crate::fat::{Fat, FAT_ENTRY_FREE};

/// Outcome of one reconciliation pass, folded into the run's overall
/// [`crate::exit::ExitStatus`] by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fat_entries_freed: u32,
    /// Distinct FAT sectors actually rewritten (freed clusters sharing a
    /// sector are coalesced into one write).
    pub fat_sectors_rewritten: u32,
    /// Distinct on-disk bitmap sectors actually rewritten — not the
    /// bitmap's total sector count, only the ones that differed.
    pub bitmap_sectors_rewritten: u32,
}

/// Frees every FAT entry `alloc_bitmap` no longer claims, then rewrites any
/// disk-bitmap sector that disagrees with `alloc_bitmap`.
///
/// `disk_bitmap_offset` is the byte offset of the on-disk allocation bitmap
/// (the `ALLOC_BITMAP` entry's `first_cluster`, resolved to a device
/// offset by the caller, since a bitmap's own chain is exempt from this same
/// reconciliation — it's always referenced, by definition, in `alloc_bitmap`
/// itself).
pub fn run<D: BlockDevice>(
    device: &D,
    boot: &BootSector,
    fat: &mut Fat,
    alloc_bitmap: &ClusterBitmap,
    disk_bitmap_offset: u64,
) -> Result<ReconcileReport, FatError<D>> {
    let mut report = ReconcileReport::default();
    let bytes_per_sector = boot.bytes_per_sector();

    let mut dirty_fat_sectors = BTreeSet::new();
    for cluster in alloc_bitmap.clusters() {
        if alloc_bitmap.get(cluster) {
            continue;
        }
        if fat.raw(cluster) != Some(FAT_ENTRY_FREE) {
            fat.set(cluster, FAT_ENTRY_FREE);
            dirty_fat_sectors.insert(fat.sector_of(cluster, bytes_per_sector));
            report.fat_entries_freed += 1;
        }
    }
    for sector in &dirty_fat_sectors {
        fat.flush_sector(device, *sector, bytes_per_sector)?;
    }
    report.fat_sectors_rewritten = dirty_fat_sectors.len() as u32;

    let mut on_disk = vec![0u8; alloc_bitmap.byte_len()];
    device
        .read_exact_at(disk_bitmap_offset, &mut on_disk)
        .map_err(FatError::Io)?;

    let sector_size = bytes_per_sector as usize;
    let wanted = alloc_bitmap.as_bytes();
    for start in (0..alloc_bitmap.byte_len()).step_by(sector_size) {
        let end = (start + sector_size).min(alloc_bitmap.byte_len());
        if wanted[start..end] != on_disk[start..end] {
            device
                .write_all_at(disk_bitmap_offset + start as u64, &wanted[start..end])
                .map_err(FatError::Io)?;
            report.bitmap_sectors_rewritten += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::sector::{BOOT_SIGNATURE, FILESYSTEM_NAME};
    use crate::device::test_support::MemDevice;
    use crate::fat::FAT_ENTRY_EOF;

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
            cluster_count: 10,
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
    fn orphan_tail_is_freed_and_bitmap_rewritten() {
        let boot = sample_boot();
        let dev = MemDevice::new(200_000);
        let fat_base = boot.fat_offset as u64 * boot.bytes_per_sector() as u64;
        let zeros = vec![0u8; (boot.cluster_count as usize + 2) * 4];
        dev.write_at(fat_base, &zeros).unwrap();

        // File chain: 2 -> EOF (accepted). Orphan tail: 3,4,5 unreferenced
        // but still chained in the FAT.
        dev.write_at(fat_base + 2 * 4, &FAT_ENTRY_EOF.to_le_bytes()).unwrap();
        dev.write_at(fat_base + 3 * 4, &4u32.to_le_bytes()).unwrap();
        dev.write_at(fat_base + 4 * 4, &5u32.to_le_bytes()).unwrap();
        dev.write_at(fat_base + 5 * 4, &FAT_ENTRY_EOF.to_le_bytes()).unwrap();

        let mut fat = Fat::load(&dev, &boot).unwrap();

        let mut alloc_bitmap = ClusterBitmap::new(boot.cluster_count);
        alloc_bitmap.set(2); // only cluster 2 is actually referenced

        let disk_bitmap_offset = 1 << 20;
        dev.write_all_at(disk_bitmap_offset, &vec![0xFFu8; alloc_bitmap.byte_len()])
            .unwrap();

        let report = run(&dev, &boot, &mut fat, &alloc_bitmap, disk_bitmap_offset).unwrap();
        assert_eq!(report.fat_entries_freed, 3);
        // Clusters 3,4,5 all live in the FAT's first sector here.
        assert_eq!(report.fat_sectors_rewritten, 1);

        let reloaded = Fat::load(&dev, &boot).unwrap();
        assert_eq!(reloaded.raw(3), Some(FAT_ENTRY_FREE));
        assert_eq!(reloaded.raw(4), Some(FAT_ENTRY_FREE));
        assert_eq!(reloaded.raw(5), Some(FAT_ENTRY_FREE));
        assert_eq!(reloaded.raw(2), Some(FAT_ENTRY_EOF));

        let mut rewritten = vec![0u8; alloc_bitmap.byte_len()];
        dev.read_exact_at(disk_bitmap_offset, &mut rewritten).unwrap();
        assert_eq!(rewritten, alloc_bitmap.as_bytes());
    }

    #[test]
    fn matching_bitmap_is_left_untouched() {
        let boot = sample_boot();
        let dev = MemDevice::new(200_000);
        let fat_base = boot.fat_offset as u64 * boot.bytes_per_sector() as u64;
        let zeros = vec![0u8; (boot.cluster_count as usize + 2) * 4];
        dev.write_at(fat_base, &zeros).unwrap();
        let mut fat = Fat::load(&dev, &boot).unwrap();

        let alloc_bitmap = ClusterBitmap::new(boot.cluster_count);
        let disk_bitmap_offset = 4096;
        dev.write_all_at(disk_bitmap_offset, alloc_bitmap.as_bytes()).unwrap();

        let report = run(&dev, &boot, &mut fat, &alloc_bitmap, disk_bitmap_offset).unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    #[test]
    fn only_the_differing_bitmap_sector_is_rewritten() {
        let boot = sample_boot();
        let dev = MemDevice::new(200_000);
        let fat_base = boot.fat_offset as u64 * boot.bytes_per_sector() as u64;
        let zeros = vec![0u8; (boot.cluster_count as usize + 2) * 4];
        dev.write_at(fat_base, &zeros).unwrap();
        let mut fat = Fat::load(&dev, &boot).unwrap();

        // A bitmap padded out to two sectors' worth of bytes; only the
        // first sector's bytes actually disagree with what's on disk.
        let sector_size = boot.bytes_per_sector() as usize;
        let mut bits = ClusterBitmap::new(boot.cluster_count).as_bytes().to_vec();
        bits.resize(sector_size * 2, 0);
        bits[0] = 0b0000_0001; // cluster 2 claimed
        let alloc_bitmap = ClusterBitmap::from_bytes(bits.clone(), boot.cluster_count);

        let disk_bitmap_offset = 8192;
        let mut on_disk = bits;
        on_disk[0] = 0; // first sector disagrees; second sector already matches
        dev.write_all_at(disk_bitmap_offset, &on_disk).unwrap();

        let report = run(&dev, &boot, &mut fat, &alloc_bitmap, disk_bitmap_offset).unwrap();
        assert_eq!(report.bitmap_sectors_rewritten, 1);

        let mut rewritten = vec![0u8; alloc_bitmap.byte_len()];
        dev.read_exact_at(disk_bitmap_offset, &mut rewritten).unwrap();
        assert_eq!(rewritten, alloc_bitmap.as_bytes());
    }
}
