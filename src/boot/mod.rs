//! Boot region: on-disk layout, checksum, and load/validate/repair (C5).

pub mod checksum;
pub mod sector;
pub mod validator;

pub use checksum::BootChecksum;
pub use sector::{BootSector, VolumeFlags, BOOT_SIGNATURE, FILESYSTEM_NAME};
pub use validator::{load, restore_from_backup, set_volume_dirty, LoadedBoot, BACKUP_BOOT_OFFSET, MAIN_BOOT_OFFSET};
