//! Error taxonomy for the checker core (spec §7).
//!
//! One enum per subsystem, `thiserror`-derived, with `#[from]` threading a
//! lower-level failure up to whichever caller needs to report it — the same
//! shape as the teacher crate's `RootError` / `FatLoadError` /
//! `EntryReaderError` chain. Two kinds from spec §7, `CorruptionFound` and
//! `CorruptionFixed`, are not error variants at all: they are bookkeeping
//! outcomes, carried as counters on [`crate::walk::WalkReport`] and
//! [`crate::exit::ExitStatus`] instead.

use crate::device::BlockDevice;

/// Boot-region load/validate failures (C5). The `FormatInvalid` members
/// here are fatal; `BootError::Checksum` and the field-range variants are
/// `FormatRecoverable` in spec terms and get a chance at
/// [`crate::boot::validator::restore_from_backup`] before the caller treats
/// them as fatal.
#[derive(Debug, thiserror::Error)]
pub enum BootError<D: BlockDevice> {
    #[error("I/O error loading boot region: {0:?}")]
    Io(D::Err),
    #[error("boot sector is missing the \"EXFAT   \" signature")]
    WrongFilesystem,
    #[error("boot signature (0xAA55) missing at sector end")]
    MissingBootSignature,
    #[error("bytes-per-sector-shift {0} out of range [9, 12]")]
    InvalidBytesPerSectorShift(u8),
    #[error("sectors-per-cluster-shift {0} exceeds the maximum for this sector size")]
    InvalidSectorsPerClusterShift(u8),
    #[error("file system revision {major}.{minor} is not the supported 1.0")]
    UnsupportedRevision { major: u8, minor: u8 },
    #[error("number of FATs {0} is not 1")]
    InvalidNumberOfFats(u8),
    #[error("vol_length * sector_size ({0}) exceeds device size ({1})")]
    VolumeExceedsDevice(u64, u64),
    #[error("clu_count * cluster_size ({0}) exceeds device size ({1})")]
    HeapExceedsDevice(u64, u64),
    #[error("root directory cluster {0} is outside the heap")]
    InvalidRootCluster(u32),
    #[error("boot-region checksum mismatch: computed {computed:#x}, stored {stored:#x}")]
    ChecksumMismatch { computed: u32, stored: u32 },
    #[error("boot region is corrupt and no repair was authorized")]
    UnrecoverableBootRegion,
}

impl<D: BlockDevice> BootError<D> {
    /// Whether this variant is the single `FormatRecoverable` class spec §4.1
    /// defines for the boot region (`BS_BOOT_REGION`): bad checksum or a
    /// field out of range, where a backup copy might still restore the
    /// volume. Everything else (wrong magic, unsupported revision, I/O) is
    /// `FormatInvalid` and unconditionally fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BootError::ChecksumMismatch { .. }
                | BootError::InvalidBytesPerSectorShift(_)
                | BootError::InvalidSectorsPerClusterShift(_)
                | BootError::VolumeExceedsDevice(..)
                | BootError::HeapExceedsDevice(..)
                | BootError::InvalidRootCluster(_)
        )
    }
}

/// FAT load/access failures (C3/C4).
#[derive(Debug, thiserror::Error)]
pub enum FatError<D: BlockDevice> {
    #[error("I/O error reading FAT: {0:?}")]
    Io(D::Err),
    #[error("FAT offset overflowed while computing byte address")]
    OffsetOverflow,
    #[error("cluster {0} is outside the heap range")]
    ClusterOutOfRange(u32),
}

/// Directory-entry parsing failures (C3).
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryError {
    #[error("unrecognized directory entry type {0:#x}")]
    InvalidEntryType(u8),
}

/// Streaming directory-entry iterator failures (C6).
#[derive(Debug, thiserror::Error)]
pub enum IteratorError<D: BlockDevice> {
    #[error("I/O error in directory iterator: {0:?}")]
    Io(D::Err),
    #[error("{0}")]
    Entry(#[from] DirEntryError),
    #[error("chain ended before the requested entry")]
    Eof,
}

/// File-entry-set parsing failures (the `read_file` step of C7).
#[derive(Debug, thiserror::Error)]
pub enum FileParseError<D: BlockDevice> {
    #[error("primary file entry is missing its stream extension")]
    NoStreamExtension,
    #[error("primary file entry is missing its name entries")]
    NoFileName,
    #[error("stream extension name_length does not match name entry count")]
    WrongNameEntryCount,
    #[error("file name entry contains invalid UTF-16")]
    InvalidFileName,
    #[error("{0}")]
    Iterator(#[from] IteratorError<D>),
}

/// Upcase table load failures (C12).
#[derive(Debug, thiserror::Error)]
pub enum UpcaseError<D: BlockDevice> {
    #[error("{0}")]
    Iterator(#[from] IteratorError<D>),
    #[error("I/O error reading upcase table: {0:?}")]
    Io(D::Err),
    #[error("upcase table start cluster {0} is outside the heap")]
    InvalidStartCluster(u32),
    #[error("upcase table size {0} is zero, not a multiple of 2, or exceeds 65536 * 2 bytes")]
    InvalidSize(u64),
    #[error("upcase table checksum mismatch: computed {computed:#x}, stored {stored:#x}")]
    ChecksumMismatch { computed: u32, stored: u32 },
}

/// A detected metadata fault, classified by the codes of spec §4.1 and §4.4.
/// `FormatRecoverable` errors become one of these; [`crate::policy::RepairPolicy`]
/// decides whether to fix them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    BsBootRegion,
    FileFirstClus,
    FileSmallerSize,
    FileDuplicatedClus,
    FileInvalidClus,
    FileLargerSize,
    FileZeroNofat,
    FileValidSize,
    DeChecksum,
}

impl FaultCode {
    /// Short machine-readable name, as printed in fsck-style diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            FaultCode::BsBootRegion => "BS_BOOT_REGION",
            FaultCode::FileFirstClus => "FILE_FIRST_CLUS",
            FaultCode::FileSmallerSize => "FILE_SMALLER_SIZE",
            FaultCode::FileDuplicatedClus => "FILE_DUPLICATED_CLUS",
            FaultCode::FileInvalidClus => "FILE_INVALID_CLUS",
            FaultCode::FileLargerSize => "FILE_LARGER_SIZE",
            FaultCode::FileZeroNofat => "FILE_ZERO_NOFAT",
            FaultCode::FileValidSize => "FILE_VALID_SIZE",
            FaultCode::DeChecksum => "DE_CHECKSUM",
        }
    }
}

/// Top-level error surfaced by a directory walk or the cluster-chain validator.
///
/// User cancellation (spec §5's `ASK`-mode `CANCEL`) is not represented
/// here: it never aborts the run with an `Err`, it flips
/// `RepairPolicy::cancelled` and lets the walk unwind normally so a
/// directory tree that was already consistent up to that point is still
/// reported, folded into `ExitStatus::cancelled` by [`crate::volume::check`].
#[derive(Debug, thiserror::Error)]
pub enum CheckError<D: BlockDevice> {
    #[error("{0}")]
    Boot(#[from] BootError<D>),
    #[error("{0}")]
    Fat(#[from] FatError<D>),
    #[error("{0}")]
    Iterator(#[from] IteratorError<D>),
    #[error("{0}")]
    FileParse(#[from] FileParseError<D>),
    #[error("{0}")]
    Upcase(#[from] UpcaseError<D>),
    #[error("root directory is missing its required {0} entry")]
    MissingRequiredEntry(&'static str),
}
