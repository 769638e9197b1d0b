//! Boot-region validator (C5, spec §4.1).
//!
//! Loads the 12-sector boot region (boot sector + 8 extended boot sectors +
//! OEM sector + reserved sector + checksum sector), verifies the running
//! checksum and the individual field ranges, and — if authorized — restores
//! the primary region from the fixed backup index.

use bytemuck::{bytes_of_mut, Zeroable};

use crate::boot::checksum::BootChecksum;
use crate::boot::sector::{BootSector, BOOT_SIGNATURE, FILESYSTEM_NAME};
use crate::device::BlockDevice;
use crate::error::BootError;

/// Sector offset of the main boot region.
pub const MAIN_BOOT_OFFSET: u64 = 0;
/// Sector offset of the backup boot region (spec §4.1: "fixed backup index").
pub const BACKUP_BOOT_OFFSET: u64 = 12;
/// Sectors making up one boot region: 1 boot sector + 8 extended boot
/// sectors + 1 OEM sector + 1 reserved sector + 1 checksum sector.
pub const BOOT_REGION_SECTORS: u64 = 12;

pub const MAX_CLUSTER_SIZE: u32 = 32 * 1024 * 1024;

/// The parsed and range-checked boot sector, plus the device size it was
/// validated against (kept around so `restore_from_backup` doesn't need to
/// re-probe it).
pub struct LoadedBoot {
    pub sector: BootSector,
}

/// Reads `BOOT_REGION_SECTORS` sectors starting at `offset_sectors` and
/// checks the running checksum of the first 11 against every 32-bit word of
/// the 12th, per spec §4.1 / §8's "Boot-region checksum" property.
fn read_and_checksum<D: BlockDevice>(
    device: &D,
    sector_size: u32,
    offset_sectors: u64,
) -> Result<(Vec<u8>, Vec<Vec<u8>>), BootError<D>> {
    let mut checksum = BootChecksum::new(sector_size as u16);
    let mut sector0 = vec![0u8; sector_size as usize];
    device
        .read_exact_at(offset_sectors * sector_size as u64, &mut sector0)
        .map_err(BootError::Io)?;
    checksum.feed_sector(&sector0, true);

    let mut rest = Vec::with_capacity(10);
    for i in 1..11u64 {
        let mut sector = vec![0u8; sector_size as usize];
        device
            .read_exact_at((offset_sectors + i) * sector_size as u64, &mut sector)
            .map_err(BootError::Io)?;
        checksum.feed_sector(&sector, false);
        rest.push(sector);
    }

    let mut checksum_sector = vec![0u8; sector_size as usize];
    device
        .read_exact_at((offset_sectors + 11) * sector_size as u64, &mut checksum_sector)
        .map_err(BootError::Io)?;

    if let Err(stored) = checksum.verify(&checksum_sector) {
        return Err(BootError::ChecksumMismatch {
            computed: checksum.get(),
            stored,
        });
    }

    Ok((sector0, rest))
}

/// Validates the field ranges spec §4.1 names, independent of the checksum.
fn validate_fields<D: BlockDevice>(
    sector: &BootSector,
    device_size: u64,
) -> Result<(), BootError<D>> {
    if sector.filesystem_name != FILESYSTEM_NAME {
        return Err(BootError::WrongFilesystem);
    }
    if sector.boot_signature != BOOT_SIGNATURE {
        return Err(BootError::MissingBootSignature);
    }
    if !(9..=12).contains(&sector.bytes_per_sector_shift) {
        return Err(BootError::InvalidBytesPerSectorShift(
            sector.bytes_per_sector_shift,
        ));
    }
    if sector.bytes_per_cluster() as u64 > MAX_CLUSTER_SIZE as u64 {
        return Err(BootError::InvalidSectorsPerClusterShift(
            sector.sectors_per_cluster_shift,
        ));
    }
    if sector.file_system_revision != 0x0100 {
        return Err(BootError::UnsupportedRevision {
            major: sector.major_revision(),
            minor: sector.minor_revision(),
        });
    }
    if sector.number_of_fats != 1 {
        return Err(BootError::InvalidNumberOfFats(sector.number_of_fats));
    }

    let volume_bytes = sector.volume_length * sector.bytes_per_sector() as u64;
    if volume_bytes > device_size {
        return Err(BootError::VolumeExceedsDevice(volume_bytes, device_size));
    }

    let heap_bytes = sector.cluster_count as u64 * sector.bytes_per_cluster() as u64;
    if heap_bytes > device_size {
        return Err(BootError::HeapExceedsDevice(heap_bytes, device_size));
    }

    let root = sector.first_cluster_of_root_directory;
    if root < 2 || root > sector.cluster_count + 1 {
        return Err(BootError::InvalidRootCluster(root));
    }

    Ok(())
}

/// Loads and validates the boot region at `offset_sectors` (spec §4.1's
/// `load`). `sector_size_hint` is used only to size the first read before
/// the real `bytes_per_sector_shift` is known; callers pass `512` normally
/// since every valid exFAT sector size is a multiple of it.
pub fn load<D: BlockDevice>(
    device: &D,
    offset_sectors: u64,
    sector_size_hint: u32,
) -> Result<LoadedBoot, BootError<D>> {
    let device_size = device.size().map_err(BootError::Io)?;

    let (sector0, _rest) = read_and_checksum(device, sector_size_hint, offset_sectors)?;

    let mut sector = BootSector::zeroed();
    bytes_of_mut(&mut sector).copy_from_slice(&sector0[..core::mem::size_of::<BootSector>()]);
    let sector = endify::Endify::from_le(sector);

    validate_fields(&sector, device_size)?;

    Ok(LoadedBoot { sector })
}

/// Restores the primary boot region from the fixed backup copy (spec §4.1):
/// reads the 12 backup sectors, forces `percent_in_use` of sector 0 to
/// `0xFF`, writes them over the primary region, and `fsync`s.
pub fn restore_from_backup<D: BlockDevice>(device: &D, sector_size: u32) -> Result<LoadedBoot, BootError<D>> {
    let (mut sector0, rest) = read_and_checksum(device, sector_size, BACKUP_BOOT_OFFSET)?;

    // percent_in_use is byte offset 112 of sector 0.
    sector0[112] = 0xFF;

    device
        .write_all_at(MAIN_BOOT_OFFSET * sector_size as u64, &sector0)
        .map_err(BootError::Io)?;
    for (i, sector) in rest.iter().enumerate() {
        device
            .write_all_at((MAIN_BOOT_OFFSET + 1 + i as u64) * sector_size as u64, sector)
            .map_err(BootError::Io)?;
    }

    // Recompute and write the checksum sector so the restored primary region
    // is internally consistent (it now differs from the backup at byte 112).
    let mut checksum = BootChecksum::new(sector_size as u16);
    checksum.feed_sector(&sector0, true);
    for sector in &rest {
        checksum.feed_sector(sector, false);
    }
    let checksum_sector = checksum.fill_sector(sector_size as usize);
    device
        .write_all_at((MAIN_BOOT_OFFSET + 11) * sector_size as u64, &checksum_sector)
        .map_err(BootError::Io)?;

    device.fsync().map_err(BootError::Io)?;

    let device_size = device.size().map_err(BootError::Io)?;
    let mut sector = BootSector::zeroed();
    bytes_of_mut(&mut sector).copy_from_slice(&sector0[..core::mem::size_of::<BootSector>()]);
    let sector = endify::Endify::from_le(sector);
    validate_fields(&sector, device_size)?;

    Ok(LoadedBoot { sector })
}

/// Sets or clears the `VolumeDirty` bit on-disk and fsyncs — the operation
/// that brackets every writable run (spec §5's ordering guarantee (ii)/(iii)).
pub fn set_volume_dirty<D: BlockDevice>(
    device: &D,
    sector: &mut BootSector,
    dirty: bool,
) -> Result<(), BootError<D>> {
    use crate::boot::sector::VolumeFlags;

    let mut flags = VolumeFlags::from_bits_truncate(sector.volume_flags);
    flags.set(VolumeFlags::VOLUME_DIRTY, dirty);
    sector.volume_flags = flags.bits();

    // vol_flags lives at byte offset 106, a u16.
    device
        .write_all_at(106, &sector.volume_flags.to_le_bytes())
        .map_err(BootError::Io)?;
    device.fsync().map_err(BootError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;

    fn write_boot_region(device: &MemDevice, offset_sectors: u64, mut sector0: Vec<u8>) {
        let sector_size = 512usize;
        sector0.resize(sector_size, 0);
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
            volume_length: 2048,
            fat_offset: 24,
            fat_length: 8,
            cluster_heap_offset: 40,
            cluster_count: 100,
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
            boot_code: [0xF4; 390],
            boot_signature: BOOT_SIGNATURE,
        };
        let bs = endify::Endify::to_le(bs);
        bytemuck::bytes_of(&bs).to_vec()
    }

    #[test]
    fn load_valid_region() {
        let dev = MemDevice::new(2048 * 512);
        write_boot_region(&dev, MAIN_BOOT_OFFSET, sample_sector0());

        let loaded = load(&dev, MAIN_BOOT_OFFSET, 512).unwrap();
        assert_eq!(loaded.sector.cluster_count, 100);
    }

    #[test]
    fn load_rejects_bad_checksum() {
        let dev = MemDevice::new(2048 * 512);
        write_boot_region(&dev, MAIN_BOOT_OFFSET, sample_sector0());
        // Corrupt a byte outside the skipped mutable range.
        dev.write_at(0, &[0xFF]).unwrap();

        let err = load(&dev, MAIN_BOOT_OFFSET, 512).unwrap_err();
        assert!(matches!(err, BootError::ChecksumMismatch { .. }));
    }

    #[test]
    fn restore_from_backup_recovers_primary() {
        let dev = MemDevice::new(4096 * 512);
        write_boot_region(&dev, MAIN_BOOT_OFFSET, vec![0u8; 512]);
        write_boot_region(&dev, BACKUP_BOOT_OFFSET, sample_sector0());

        let loaded = restore_from_backup(&dev, 512).unwrap();
        assert_eq!(loaded.sector.cluster_count, 100);
        assert_eq!(loaded.sector.percent_in_use, 0xFF);

        // Restoring again from the (now self-consistent) primary works too.
        let reloaded = load(&dev, MAIN_BOOT_OFFSET, 512).unwrap();
        assert_eq!(reloaded.sector.percent_in_use, 0xFF);
    }
}
