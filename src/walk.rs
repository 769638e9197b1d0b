//! Directory walk (C7, spec §4.3).
//!
//! BFS over a work list of directory inodes seeded with the root. Each
//! directory is scanned with the directory-entry iterator (C6); `File` entry
//! sets are parsed and handed to the cluster-chain validator (C9) together
//! with the repair policy (C10); a non-empty subdirectory is linked into the
//! tree and queued for its own scan, everything else (plain files, empty
//! directories) is validated and then dropped — file inodes exist only to
//! carry chain validation (spec §3). Once a directory's scan finishes with
//! no surviving children, it's pruned immediately
//! ([`inode::prune_if_childless`]), turning the tree into a stack bounded by
//! filesystem depth rather than file count.

use crate::bitmap::ClusterBitmap;
use crate::boot::sector::BootSector;
use crate::chain::{self, ChainInput};
use crate::cluster::{resolve_chain, ChainShape};
use crate::dentry::iterator::DirEntryIterator;
use crate::dentry::{DirEntry, FileAttributes, FileEntry, GeneralSecondaryFlags, StreamExtensionEntry};
use crate::device::BlockDevice;
use crate::error::{CheckError, FaultCode, FileParseError};
use crate::fat::Fat;
use crate::inode::{self, ExfatInode, InodeRef};
use crate::policy::{Decision, Prompter, RepairPolicy};

/// Running totals one walk accumulates (spec §8 scenario 1's
/// `dir_count`/`file_count`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub dir_count: u32,
    pub file_count: u32,
    /// UTF-16 volume label, up to 11 code units (spec §4.3), if a
    /// `VolumeLabel` entry was found in the root directory.
    pub volume_label: Option<Vec<u16>>,
}

/// One fully parsed `File` entry set (primary + stream + name secondaries).
struct ParsedFile {
    attr: FileAttributes,
    stream: StreamExtensionEntry,
    checksum_ok: bool,
    computed_checksum: u16,
    set_len: usize,
}

/// Reads the `File` primary at the iterator's current position (index 0)
/// plus its `secondary_count` trailing secondaries, verifying the stored
/// checksum along the way. Only peeks (`get`, never `advance`) — the
/// iterator is left exactly where it started so a caller can still patch
/// any entry of the set by index before moving past it.
fn read_file<D: BlockDevice>(
    it: &DirEntryIterator<'_, D>,
    file: FileEntry,
) -> Result<ParsedFile, FileParseError<D>> {
    let primary = DirEntry::File(file);
    let mut running = primary.checksum(0, true);

    let secondary_count = file.secondary_count as usize;
    if secondary_count == 0 {
        return Err(FileParseError::NoStreamExtension);
    }

    let stream_entry = it.get(1).map_err(FileParseError::Iterator)?;
    let DirEntry::StreamExtension(stream) = stream_entry else {
        return Err(FileParseError::NoStreamExtension);
    };
    running = stream_entry.checksum(running, false);

    let expected_names = (stream.name_length as usize).div_ceil(15);
    if expected_names == 0 || secondary_count != 1 + expected_names {
        return Err(FileParseError::WrongNameEntryCount);
    }

    let mut units = Vec::with_capacity(stream.name_length as usize);
    for i in 0..expected_names {
        let name_entry = it.get(2 + i).map_err(FileParseError::Iterator)?;
        let DirEntry::FileName(name) = name_entry else {
            return Err(FileParseError::NoFileName);
        };
        running = name_entry.checksum(running, false);
        for chunk in name.file_name.chunks_exact(2) {
            units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
    }
    units.truncate(stream.name_length as usize);
    if String::from_utf16(&units).is_err() {
        return Err(FileParseError::InvalidFileName);
    }

    Ok(ParsedFile {
        attr: file.attributes(),
        stream,
        checksum_ok: running == file.set_checksum,
        computed_checksum: running,
        set_len: 1 + secondary_count,
    })
}

/// Rewrites the stored `SetChecksum` field of the `File` primary at index 0.
fn patch_primary_checksum<D: BlockDevice>(
    it: &mut DirEntryIterator<'_, D>,
    new_checksum: u16,
) -> Result<(), FileParseError<D>> {
    let raw = it.get_dirty(0).map_err(FileParseError::Iterator)?;
    raw[2..4].copy_from_slice(&new_checksum.to_le_bytes());
    Ok(())
}

/// Rewrites the `valid_data_length`/`data_len`/(optionally) `first_cluster`
/// fields of the `StreamExtension` secondary at index 1.
fn patch_stream_fields<D: BlockDevice>(
    it: &mut DirEntryIterator<'_, D>,
    size: u64,
    valid_size: u64,
    clear_start_cluster: bool,
) -> Result<(), FileParseError<D>> {
    let raw = it.get_dirty(1).map_err(FileParseError::Iterator)?;
    raw[8..16].copy_from_slice(&valid_size.to_le_bytes());
    raw[24..32].copy_from_slice(&size.to_le_bytes());
    if clear_start_cluster {
        raw[20..24].copy_from_slice(&0u32.to_le_bytes());
    }
    Ok(())
}

fn clear_contiguous_flag<D: BlockDevice>(it: &mut DirEntryIterator<'_, D>) -> Result<(), FileParseError<D>> {
    let raw = it.get_dirty(1).map_err(FileParseError::Iterator)?;
    // Byte 0 of the 32-byte entry is the type tag; GeneralSecondaryFlags is
    // the next byte (spec §6's stream-entry field list starts counting
    // after the type tag).
    raw[1] &= !(GeneralSecondaryFlags::NO_FAT_CHAIN.bits());
    Ok(())
}

/// Everything the walk needs threaded through one call: geometry, the
/// loaded FAT, the two bitmaps, and the repair policy.
pub struct WalkContext<'a, D: BlockDevice, P: Prompter> {
    pub device: &'a D,
    pub boot: &'a BootSector,
    pub fat: &'a mut Fat,
    pub alloc_bitmap: &'a mut ClusterBitmap,
    pub disk_bitmap: &'a ClusterBitmap,
    pub policy: &'a mut RepairPolicy<P>,
}

/// Runs the directory walk starting at `root`, whose chain has already been
/// resolved and marked into `alloc_bitmap` by the caller (spec §4.3: an
/// invalid root chain is fatal, not a repairable fault, so it's handled
/// before this function is ever called).
pub fn run<D: BlockDevice, P: Prompter>(
    ctx: &mut WalkContext<'_, D, P>,
    root: InodeRef,
) -> Result<WalkReport, CheckError<D>> {
    let mut report = WalkReport {
        dir_count: 1,
        ..WalkReport::default()
    };
    let mut work: std::collections::VecDeque<InodeRef> = std::collections::VecDeque::new();
    work.push_back(root);

    'outer: while let Some(dir) = work.pop_front() {
        let (first_cluster, size, contiguous) = {
            let dir = dir.borrow();
            (dir.first_cluster, dir.size, dir.contiguous)
        };
        let shape = if contiguous {
            ChainShape::Contiguous
        } else {
            ChainShape::FatChained
        };
        let chain = resolve_chain(ctx.boot, ctx.fat, first_cluster, shape, size)
            .unwrap_or_default();
        let mut it = DirEntryIterator::new(ctx.device, ctx.boot, chain)?;

        loop {
            if it.is_eof() {
                break;
            }
            let offset = it.device_offset().unwrap_or_default();
            let entry = it.get(0)?;

            match entry {
                DirEntry::EndOfDirectory(_) => break,
                DirEntry::Unused(_) => {
                    it.advance(1)?;
                }
                DirEntry::File(file) => {
                    let parsed = match read_file(&it, file) {
                        Ok(p) => p,
                        Err(_) => {
                            // Spec §1: a file whose entry set can't be parsed
                            // is logged and skipped, never invented.
                            log::warn!("unparseable file entry set at offset {offset:#x}, skipping");
                            it.advance(1)?;
                            continue;
                        }
                    };

                    if !parsed.checksum_ok {
                        match ctx.policy.decide(FaultCode::DeChecksum) {
                            Decision::Fix => {
                                patch_primary_checksum(&mut it, parsed.computed_checksum)?;
                                ctx.policy.mark_fixed();
                            }
                            Decision::Leave => {}
                            Decision::Cancel => break 'outer,
                        }
                    }

                    let child = ExfatInode::new_child(&dir);
                    {
                        let mut c = child.borrow_mut();
                        c.first_cluster = parsed.stream.first_cluster;
                        c.size = parsed.stream.data_len;
                        c.valid_size = parsed.stream.valid_data_length;
                        c.attr = parsed.attr;
                        c.contiguous = parsed.stream.flags().contains(GeneralSecondaryFlags::NO_FAT_CHAIN);
                        c.dentry_offset = offset;
                    }

                    let input = ChainInput {
                        first_cluster: parsed.stream.first_cluster,
                        size: parsed.stream.data_len,
                        valid_size: parsed.stream.valid_data_length,
                        contiguous: child.borrow().contiguous,
                    };
                    let cluster_size = ctx.boot.bytes_per_cluster() as u64;
                    let check = chain::check(
                        ctx.fat,
                        ctx.alloc_bitmap,
                        ctx.disk_bitmap,
                        cluster_size,
                        ctx.boot.cluster_count,
                        input,
                    );

                    apply_chain_repairs(ctx, &mut it, &check)?;

                    if check.zero_nofat {
                        if ctx.policy.decide(FaultCode::FileZeroNofat) == Decision::Fix {
                            clear_contiguous_flag(&mut it)?;
                            ctx.policy.mark_fixed();
                            child.borrow_mut().contiguous = false;
                        }
                    }

                    if let Some(fault) = check.structural {
                        child.borrow_mut().size = fault.new_size;
                        child.borrow_mut().valid_size = fault.new_valid_size;
                        if fault.eof_after.is_none() {
                            child.borrow_mut().first_cluster = 0;
                        }
                    } else if check.valid_size_fault {
                        child.borrow_mut().valid_size = child.borrow().size;
                    }

                    it.advance(parsed.set_len)?;

                    if !child.borrow().is_dir() || check.chain.is_empty() {
                        report.file_count += 1;
                        // Transient: dropped at end of scope, spec §3.
                    } else {
                        report.dir_count += 1;
                        dir.borrow_mut().children.push(child.clone());
                        work.push_back(child);
                    }
                }
                DirEntry::VolumeLabel(label) => {
                    let count = (label.character_count as usize).min(11);
                    let units = label.volume_label[..count * 2]
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect();
                    report.volume_label = Some(units);
                    it.advance(1)?;
                }
                DirEntry::Bitmap(_) | DirEntry::UpcaseTable(_) => {
                    it.advance(1)?;
                }
                DirEntry::VolumeGuid(_) | DirEntry::VendorExtension(_) | DirEntry::VendorAllocation(_) => {
                    it.advance(1)?;
                }
                DirEntry::StreamExtension(_) | DirEntry::FileName(_) | DirEntry::Invalid => {
                    log::warn!("unexpected entry type {:#x} at offset {offset:#x}", entry.entry_type());
                    it.advance(1)?;
                }
            }
        }

        it.flush()?;
        inode::prune_if_childless(&dir);

        if ctx.policy.cancelled {
            break;
        }
    }

    Ok(report)
}

/// Applies a detected chain fault's repair, if the policy authorizes it.
/// Patches happen in place at the stream secondary's index (1) while the
/// iterator still sits at the entry set's primary; the caller advances past
/// the whole set afterward regardless of what happened here.
fn apply_chain_repairs<D: BlockDevice, P: Prompter>(
    ctx: &mut WalkContext<'_, D, P>,
    it: &mut DirEntryIterator<'_, D>,
    check: &chain::ChainCheck,
) -> Result<(), CheckError<D>> {
    if let Some(fault) = check.structural {
        match ctx.policy.decide(fault.code) {
            Decision::Fix => {
                patch_stream_fields(it, fault.new_size, fault.new_valid_size, fault.eof_after.is_none())?;
                if let Some(last) = fault.eof_after {
                    ctx.fat.set(last, crate::fat::FAT_ENTRY_EOF);
                    ctx.fat.flush_entry(ctx.device, last)?;
                }
                ctx.policy.mark_fixed_fat();
            }
            Decision::Leave => {}
            Decision::Cancel => ctx.policy.cancelled = true,
        }
    } else if check.valid_size_fault {
        match ctx.policy.decide(FaultCode::FileValidSize) {
            Decision::Fix => {
                let raw = it.get(1).map_err(FileParseError::Iterator)?;
                let DirEntry::StreamExtension(stream) = raw else {
                    unreachable!("index 1 of a File entry set is always its stream secondary");
                };
                patch_stream_fields(it, stream.data_len, stream.data_len, false)?;
                ctx.policy.mark_fixed();
            }
            Decision::Leave => {}
            Decision::Cancel => ctx.policy.cancelled = true,
        }
    }
    Ok(())
}
