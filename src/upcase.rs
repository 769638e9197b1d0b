//! Up-case table load and verification (C12).
//!
//! The on-disk table is a run-length-compressed mapping from every UTF-16
//! code unit to its upper-case form: a literal run of mapped characters,
//! interrupted by a `0xFFFF` marker followed by a 16-bit repeat count of
//! identity-mapped characters starting at the current index (spec §6's
//! "Up-case Table" description). The teacher crate only ever *writes* the
//! well-known default table (`format::mod.rs`'s `write_upcase_table`); the
//! checker has to decompress whatever table is actually on disk and verify
//! it against the stream extension's stored checksum before trusting any
//! name comparison against it.

use crate::boot::sector::BootSector;
use crate::cluster::{resolve_chain, ChainShape, ClusterCursor};
use crate::dentry::iterator::DirEntryIterator;
use crate::dentry::DirEntry;
use crate::device::BlockDevice;
use crate::error::UpcaseError;
use crate::fat::Fat;

const TABLE_ENTRIES: usize = 0x10000;
const ESCAPE: u16 = 0xFFFF;

/// A fully decompressed case-folding table, one `u16` per UTF-16 code unit.
#[derive(Debug, Clone)]
pub struct UpcaseTable {
    map: Vec<u16>,
}

impl UpcaseTable {
    /// Looks up the upper-case form of `unit`; identity if the table didn't
    /// cover it (shouldn't happen for a well-formed table, which always
    /// spans all 65536 code units, but a corrupt compressed stream can
    /// under-run).
    pub fn upper(&self, unit: u16) -> u16 {
        self.map.get(unit as usize).copied().unwrap_or(unit)
    }

    pub fn fold(&self, units: &[u16]) -> Vec<u16> {
        units.iter().map(|&u| self.upper(u)).collect()
    }
}

/// Decompresses a raw upcase-table byte stream into a [`UpcaseTable`].
/// `raw` must have an even length; trailing odd byte, if any, is dropped.
fn decompress(raw: &[u8]) -> Vec<u16> {
    let mut map = Vec::with_capacity(TABLE_ENTRIES);
    let mut code_point: u32 = 0;
    let mut words = raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));

    while let Some(word) = words.next() {
        if word == ESCAPE {
            let Some(count) = words.next() else { break };
            for _ in 0..count {
                map.push(code_point as u16);
                code_point += 1;
            }
        } else {
            map.push(word);
            code_point += 1;
        }
    }

    map
}

/// Loads, decompresses, and checksum-verifies the up-case table named by a
/// root-directory `UpcaseTable` entry. Returns the resolved cluster chain
/// alongside the table so the caller can mark those clusters in
/// `alloc_bitmap` (spec §4.6) before the general walk starts.
pub fn load<D: BlockDevice>(
    device: &D,
    boot: &BootSector,
    fat: &Fat,
    entry: &crate::dentry::UpcaseTableEntry,
) -> Result<(UpcaseTable, Vec<u32>), UpcaseError<D>> {
    if entry.first_cluster != 0 && !boot.in_heap(entry.first_cluster) {
        return Err(UpcaseError::InvalidStartCluster(entry.first_cluster));
    }
    if entry.data_len == 0 || entry.data_len % 2 != 0 || entry.data_len > TABLE_ENTRIES as u64 * 2 {
        return Err(UpcaseError::InvalidSize(entry.data_len));
    }

    let chain = resolve_chain(boot, fat, entry.first_cluster, ChainShape::FatChained, entry.data_len)
        .map_err(|_| UpcaseError::InvalidStartCluster(entry.first_cluster))?;

    let mut cursor = ClusterCursor::new(boot, chain.clone(), entry.data_len);
    let mut raw = vec![0u8; entry.data_len as usize];
    cursor.read_exact(device, &mut raw).map_err(UpcaseError::Io)?;

    let computed = checksum(&raw);
    if computed != entry.table_checksum {
        return Err(UpcaseError::ChecksumMismatch {
            computed,
            stored: entry.table_checksum,
        });
    }

    Ok((
        UpcaseTable {
            map: decompress(&raw),
        },
        chain,
    ))
}

/// The 32-bit rotate-right running checksum spec §6 defines for the up-case
/// table's raw (compressed) bytes — distinct from the directory-entry-set
/// checksum in [`crate::dentry::DirEntry::checksum`].
pub fn checksum(raw: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for &b in raw {
        sum = (sum & 1) * 0x8000_0000 + (sum >> 1) + b as u32;
    }
    sum
}

/// Scans a directory stream for its `UpcaseTable` entry (root directory
/// only, spec §6) — a thin convenience over [`DirEntryIterator`] since the
/// up-case table is always looked up before the general directory walk
/// starts.
pub fn find_entry<D: BlockDevice>(
    device: &D,
    boot: &BootSector,
    chain: Vec<u32>,
) -> Result<Option<crate::dentry::UpcaseTableEntry>, UpcaseError<D>> {
    let mut it = DirEntryIterator::new(device, boot, chain).map_err(UpcaseError::Iterator)?;
    loop {
        if it.is_eof() {
            return Ok(None);
        }
        let entry = it.get(0).map_err(UpcaseError::Iterator)?;
        if let DirEntry::UpcaseTable(table) = entry {
            return Ok(Some(table));
        }
        if let DirEntry::EndOfDirectory(_) = entry {
            return Ok(None);
        }
        it.advance(1).map_err(UpcaseError::Iterator)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_run_decompresses_sequentially() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ESCAPE.to_le_bytes());
        raw.extend_from_slice(&3u16.to_le_bytes());
        let table = decompress(&raw);
        assert_eq!(table, vec![0, 1, 2]);
    }

    #[test]
    fn literal_mapping_overrides_identity() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0x0041u16.to_le_bytes()); // 'A' maps to itself
        raw.extend_from_slice(&0x0041u16.to_le_bytes()); // 'a' -> 'A' at index 1, say
        let table = decompress(&raw);
        assert_eq!(table, vec![0x0041, 0x0041]);
    }

    #[test]
    fn checksum_is_order_sensitive() {
        let a = checksum(&[1, 2, 3]);
        let b = checksum(&[3, 2, 1]);
        assert_ne!(a, b);
    }
}
