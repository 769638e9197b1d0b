//! Top-level volume driver (spec §3's `Exfat`, §4's overall data flow).
//!
//! Ties the lower modules together in the order spec §4 lays out: load and
//! validate the boot region (C5), load the FAT (C3/C4), resolve the root
//! directory's own chain (fatal if broken — there's no file entry to
//! truncate a directory against), look up the `ALLOC_BITMAP` and
//! `UPCASE_TABLE` entries the walk needs before it can cross-check anything
//! (C8/C12), run the directory walk (C7), and — if the walk truncated any
//! chain — reconcile the FAT and on-disk bitmap against what the walk
//! actually found (C11). `VolumeDirty` brackets the whole writable portion
//! of the run, per spec §5's ordering guarantee.

use crate::bitmap::ClusterBitmap;
use crate::boot::sector::BootSector;
use crate::cluster::{resolve_chain, ChainShape, ClusterCursor};
use crate::dentry::DirEntry;
use crate::device::BlockDevice;
use crate::error::{BootError, CheckError, FatError};
use crate::exit::ExitStatus;
use crate::fat::{Fat, NextCluster};
use crate::inode::ExfatInode;
use crate::lookup::{self, Predicate};
use crate::policy::{Decision, FaultCode, FsckOptions, Prompter, RepairPolicy};
use crate::reconcile;
use crate::upcase;
use crate::walk::{self, WalkContext, WalkReport};

/// Everything one completed (or cancelled) run produced: the collapsed
/// exit-code inputs plus the walk's own counters, for a verbose CLI to print.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub status: ExitStatus,
    pub walk: WalkReport,
}

/// Runs a full check (and, depending on `options.mode`, repair) of the
/// volume backing `device`. `prompter` is only consulted in
/// [`crate::policy::RepairMode::Ask`].
pub fn check<D: BlockDevice, P: Prompter>(
    device: &D,
    options: &FsckOptions,
    prompter: P,
) -> Result<CheckReport, CheckError<D>> {
    let mut policy = RepairPolicy::new(options.mode, prompter);

    let mut sector = load_boot_region(device, &mut policy)?;
    let mut fat = Fat::load(device, &sector).map_err(CheckError::Fat)?;

    let root_chain = resolve_root_chain(&sector, &fat)?;
    let cluster_size = sector.bytes_per_cluster() as u64;
    let root = ExfatInode::new_root(
        sector.first_cluster_of_root_directory,
        root_chain.len() as u64 * cluster_size,
    );

    let mut alloc_bitmap = ClusterBitmap::new(sector.cluster_count);
    for &cluster in &root_chain {
        alloc_bitmap.set(cluster);
    }

    let bitmap_entry = match lookup::find(device, &sector, root_chain.clone(), Predicate::ByType(0x81))
        .map_err(CheckError::Iterator)?
        .hit
    {
        Some(hit) => match hit.entry {
            DirEntry::Bitmap(entry) => entry,
            _ => unreachable!("ByType(0x81) only matches DirEntry::Bitmap"),
        },
        None => return Err(CheckError::MissingRequiredEntry("ALLOC_BITMAP")),
    };

    let bitmap_chain = resolve_chain(
        &sector,
        &fat,
        bitmap_entry.first_cluster,
        ChainShape::FatChained,
        bitmap_entry.data_len,
    )
    .map_err(|_| CheckError::MissingRequiredEntry("ALLOC_BITMAP"))?;
    if bitmap_chain.is_empty() {
        return Err(CheckError::MissingRequiredEntry("ALLOC_BITMAP"));
    }
    for &cluster in &bitmap_chain {
        alloc_bitmap.set(cluster);
    }

    let disk_bitmap_offset = sector
        .cluster_offset(bitmap_chain[0])
        .ok_or(CheckError::MissingRequiredEntry("ALLOC_BITMAP"))?;
    let disk_bitmap = {
        let mut cursor = ClusterCursor::new(&sector, bitmap_chain.clone(), bitmap_entry.data_len);
        let mut raw = vec![0u8; bitmap_entry.data_len as usize];
        cursor
            .read_exact(device, &mut raw)
            .map_err(|e| CheckError::Fat(FatError::Io(e)))?;
        ClusterBitmap::from_bytes(raw, sector.cluster_count)
    };

    let upcase_entry = match lookup::find(device, &sector, root_chain.clone(), Predicate::ByType(0x82))
        .map_err(CheckError::Iterator)?
        .hit
    {
        Some(hit) => match hit.entry {
            DirEntry::UpcaseTable(entry) => entry,
            _ => unreachable!("ByType(0x82) only matches DirEntry::UpcaseTable"),
        },
        None => return Err(CheckError::MissingRequiredEntry("UPCASE_TABLE")),
    };
    let (_upcase_table, upcase_chain) =
        upcase::load(device, &sector, &fat, &upcase_entry).map_err(CheckError::Upcase)?;
    for cluster in upcase_chain {
        alloc_bitmap.set(cluster);
    }

    let writable = options.mode.writable();
    if writable {
        crate::boot::set_volume_dirty(device, &mut sector, true).map_err(CheckError::Boot)?;
    }

    let mut ctx = WalkContext {
        device,
        boot: &sector,
        fat: &mut fat,
        alloc_bitmap: &mut alloc_bitmap,
        disk_bitmap: &disk_bitmap,
        policy: &mut policy,
    };
    let walk_report = walk::run(&mut ctx, root)?;

    if policy.dirty_fat {
        reconcile::run(device, &sector, &mut fat, &alloc_bitmap, disk_bitmap_offset).map_err(CheckError::Fat)?;
    }

    if writable {
        crate::boot::set_volume_dirty(device, &mut sector, false).map_err(CheckError::Boot)?;
    }

    Ok(CheckReport {
        status: ExitStatus {
            fixed_count: policy.fixed_count,
            errors_left: policy.left_count,
            cancelled: policy.cancelled,
            operational_error: false,
        },
        walk: walk_report,
    })
}

/// Loads the main boot region, falling back to the backup copy for the one
/// `FormatRecoverable` class (spec §4.1's `BS_BOOT_REGION`) when the policy
/// authorizes it. Anything else — wrong magic, unsupported revision, an
/// unrecoverable class, or a declined/cancelled repair — is fatal.
fn load_boot_region<D: BlockDevice, P: Prompter>(
    device: &D,
    policy: &mut RepairPolicy<P>,
) -> Result<BootSector, CheckError<D>> {
    match crate::boot::load(device, crate::boot::MAIN_BOOT_OFFSET, 512) {
        Ok(loaded) => Ok(loaded.sector),
        Err(e) if e.is_recoverable() => match policy.decide(FaultCode::BsBootRegion) {
            Decision::Fix => {
                let restored = crate::boot::restore_from_backup(device, 512).map_err(CheckError::Boot)?;
                policy.mark_fixed();
                Ok(restored.sector)
            }
            Decision::Leave | Decision::Cancel => Err(CheckError::Boot(BootError::UnrecoverableBootRegion)),
        },
        Err(e) => Err(CheckError::Boot(e)),
    }
}

/// Resolves the root directory's own cluster chain directly against the
/// FAT, rather than through [`resolve_chain`]: the root has no stream
/// extension to carry a declared size, and spec §4.3 treats any break in
/// its chain (a cycle, an out-of-range link, landing on a free/bad entry
/// before `EOF`) as fatal rather than a repairable fault.
fn resolve_root_chain<D: BlockDevice>(boot: &BootSector, fat: &Fat) -> Result<Vec<u32>, CheckError<D>> {
    let mut chain = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut cluster = boot.first_cluster_of_root_directory;

    loop {
        if !boot.in_heap(cluster) || !seen.insert(cluster) {
            return Err(CheckError::Boot(BootError::InvalidRootCluster(cluster)));
        }
        chain.push(cluster);
        match fat.next(cluster, boot.cluster_count) {
            NextCluster::Next(n) => cluster = n,
            NextCluster::Eof => return Ok(chain),
            NextCluster::Free | NextCluster::Bad | NextCluster::OutOfRange(_) => {
                return Err(CheckError::Boot(BootError::InvalidRootCluster(cluster)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::checksum::BootChecksum;
    use crate::boot::sector::{BOOT_SIGNATURE, FILESYSTEM_NAME};
    use crate::device::test_support::MemDevice;
    use crate::policy::{FixedPrompter, RepairMode};

    fn write_boot_region(device: &MemDevice, offset_sectors: u64, sector0: Vec<u8>) {
        let sector_size = 512usize;
        device.write_all_at(offset_sectors * sector_size as u64, &sector0).unwrap();

        let mut checksum = BootChecksum::new(sector_size as u16);
        checksum.feed_sector(&sector0, true);

        for i in 1..11u64 {
            let sector = vec![0u8; sector_size];
            device
                .write_all_at((offset_sectors + i) * sector_size as u64, &sector)
                .unwrap();
            checksum.feed_sector(&sector, false);
        }

        let checksum_sector = checksum.fill_sector(sector_size);
        device
            .write_all_at((offset_sectors + 11) * sector_size as u64, &checksum_sector)
            .unwrap();
    }

    fn sample_sector0() -> Vec<u8> {
        let bs = BootSector {
            jump_boot: [0xEB, 0x76, 0x90],
            filesystem_name: FILESYSTEM_NAME,
            _reserved: [0; 53],
            partition_offset: 0,
            volume_length: 200,
            fat_offset: 24,
            fat_length: 1,
            cluster_heap_offset: 25,
            cluster_count: 20,
            first_cluster_of_root_directory: 2,
            volume_serial_number: 0x1234,
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
        };
        let bs = endify::Endify::to_le(bs);
        let mut bytes = bytemuck::bytes_of(&bs).to_vec();
        bytes.resize(512, 0);
        bytes
    }

    /// A minimal but complete clean volume: root directory holding only an
    /// `ALLOC_BITMAP` and `UPCASE_TABLE` entry, no files, matching spec §8's
    /// "clean volume" scenario.
    fn clean_volume() -> MemDevice {
        let dev = MemDevice::new(64 * 512 * 8);
        write_boot_region(&dev, crate::boot::MAIN_BOOT_OFFSET, sample_sector0());

        let fat_base = 24u64 * 512;
        let mut fat_entries = vec![0u32; 22];
        fat_entries[2] = crate::fat::FAT_ENTRY_EOF; // root
        fat_entries[3] = crate::fat::FAT_ENTRY_EOF; // bitmap
        fat_entries[4] = crate::fat::FAT_ENTRY_EOF; // upcase table
        for (i, v) in fat_entries.iter().enumerate() {
            dev.write_at(fat_base + i as u64 * 4, &v.to_le_bytes()).unwrap();
        }

        let heap_base = 25u64 * 512;
        let cluster_size = 4096u64;

        // Root directory, cluster 2: ALLOC_BITMAP then UPCASE_TABLE then
        // end-of-directory (the rest of the cluster is already zero).
        let mut bitmap_dentry = [0u8; 32];
        bitmap_dentry[0] = 0x81;
        bitmap_dentry[20..24].copy_from_slice(&3u32.to_le_bytes()); // first_cluster
        bitmap_dentry[24..32].copy_from_slice(&3u64.to_le_bytes()); // data_len (3 bytes for 20 clusters)
        dev.write_at(heap_base, &bitmap_dentry).unwrap();

        let upcase_raw: Vec<u8> = {
            let mut r = Vec::new();
            r.extend_from_slice(&0xFFFFu16.to_le_bytes());
            r.extend_from_slice(&4u16.to_le_bytes());
            r
        };
        let upcase_checksum = upcase::checksum(&upcase_raw);
        let mut upcase_dentry = [0u8; 32];
        upcase_dentry[0] = 0x82;
        upcase_dentry[4..8].copy_from_slice(&upcase_checksum.to_le_bytes());
        upcase_dentry[20..24].copy_from_slice(&4u32.to_le_bytes()); // first_cluster
        upcase_dentry[24..32].copy_from_slice(&(upcase_raw.len() as u64).to_le_bytes());
        dev.write_at(heap_base + 32, &upcase_dentry).unwrap();

        // Bitmap cluster (3): 3 bytes covering clusters 2..22, all set.
        dev.write_at(heap_base + cluster_size, &[0xFFu8, 0xFF, 0xFF]).unwrap();

        // Up-case table cluster (4): the raw compressed bytes written above.
        dev.write_at(heap_base + 2 * cluster_size, &upcase_raw).unwrap();

        dev
    }

    #[test]
    fn clean_volume_checks_with_no_faults() {
        let dev = clean_volume();
        let options = FsckOptions {
            mode: RepairMode::Yes,
        };
        let report = check(&dev, &options, FixedPrompter(Decision::Fix)).unwrap();

        assert_eq!(report.status.fixed_count, 0);
        assert_eq!(report.status.errors_left, 0);
        assert!(!report.status.cancelled);
        assert_eq!(report.walk.dir_count, 1);
        assert_eq!(report.walk.file_count, 0);

        // VolumeDirty must be clear again once the run completes.
        let mut flags = [0u8; 2];
        dev.read_at(106, &mut flags).unwrap();
        let flags = u16::from_le_bytes(flags);
        assert_eq!(flags & 0b10, 0);
    }

    #[test]
    fn broken_root_chain_is_fatal() {
        let dev = MemDevice::new(64 * 512 * 8);
        write_boot_region(&dev, crate::boot::MAIN_BOOT_OFFSET, sample_sector0());
        // FAT left entirely zeroed: root's first cluster (2) maps to FREE,
        // not a continuation or EOF.
        let options = FsckOptions {
            mode: RepairMode::No,
        };
        let err = check(&dev, &options, FixedPrompter(Decision::Leave)).unwrap_err();
        assert!(matches!(err, CheckError::Boot(BootError::InvalidRootCluster(2))));
    }
}
