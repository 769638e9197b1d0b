//! Cluster-chain validator (C9, spec §4.4).
//!
//! Walks a file's cluster chain one link at a time, cross-checking each
//! cluster against the on-disk allocation bitmap (`disk_bitmap`, is this
//! cluster actually marked allocated?) and the in-memory one the walk is
//! building up (`alloc_bitmap`, has some *other* inode already claimed it?),
//! and reconciles the result against the stream extension's declared size.
//! Detection only: this module decides *what* is wrong and where the chain
//! should be cut, but never touches the device or the FAT directly — that's
//! [`crate::walk`]'s job once [`crate::policy::RepairPolicy`] has signed off,
//! mirroring the split the teacher crate draws between `cluster::reader`
//! (read access) and the formatter's own write path.

use checked_num::CheckedU64;

use crate::bitmap::ClusterBitmap;
use crate::error::FaultCode;
use crate::fat::{Fat, NextCluster};

/// The file-inode facts [`check`] needs; a subset of [`crate::inode::ExfatInode`]
/// so this module doesn't have to depend on the tree shape.
#[derive(Debug, Clone, Copy)]
pub struct ChainInput {
    pub first_cluster: u32,
    pub size: u64,
    pub valid_size: u64,
    pub contiguous: bool,
}

/// One of the five chain-shape faults spec §4.4 tabulates, plus the new
/// metadata a truncation repair would write.
#[derive(Debug, Clone, Copy)]
pub struct StructuralFault {
    pub code: FaultCode,
    pub new_size: u64,
    pub new_valid_size: u64,
    /// The last cluster that remains part of the (truncated) chain — its FAT
    /// entry must be forced to `EOF`. `None` when the chain is truncated to
    /// nothing (`FILE_FIRST_CLUS`): there is no cluster left to terminate.
    pub eof_after: Option<u32>,
}

/// Everything [`check`] found for one file. `chain` is always the accepted
/// (pre-fault) prefix — the clusters that genuinely belong to this file
/// regardless of whether a repair is later authorized, so callers can mark
/// [`ClusterBitmap`] bits unconditionally.
#[derive(Debug, Clone)]
pub struct ChainCheck {
    pub chain: Vec<u32>,
    pub structural: Option<StructuralFault>,
    pub zero_nofat: bool,
    pub valid_size_fault: bool,
}

impl ChainCheck {
    fn empty_ok() -> Self {
        Self {
            chain: Vec::new(),
            structural: None,
            zero_nofat: false,
            valid_size_fault: false,
        }
    }
}

/// Validates one file's chain against `fat`/`alloc_bitmap`/`disk_bitmap`,
/// marking every accepted cluster into `alloc_bitmap` as it goes (spec §4.4:
/// "for every cluster accepted into the chain, set its bit in alloc_bitmap").
pub fn check(
    fat: &Fat,
    alloc_bitmap: &mut ClusterBitmap,
    disk_bitmap: &ClusterBitmap,
    cluster_size: u64,
    heap_clusters: u32,
    input: ChainInput,
) -> ChainCheck {
    if input.size == 0 && input.first_cluster == 0 {
        if input.contiguous {
            return ChainCheck {
                zero_nofat: true,
                ..ChainCheck::empty_ok()
            };
        }
        return ChainCheck::empty_ok();
    }

    if (input.size == 0 && input.first_cluster != 0)
        || (input.size > 0 && !in_heap(input.first_cluster, heap_clusters))
    {
        return ChainCheck {
            structural: Some(StructuralFault {
                code: FaultCode::FileFirstClus,
                new_size: 0,
                new_valid_size: 0,
                eof_after: None,
            }),
            zero_nofat: input.contiguous,
            ..ChainCheck::empty_ok()
        };
    }

    let cluster_size = cluster_size.max(1);
    let max_count: u64 = ((CheckedU64::new(input.size) + (cluster_size - 1)) / cluster_size)
        .ok_or(())
        .unwrap_or(u64::MAX / cluster_size);

    let mut chain = Vec::new();
    let mut cluster = input.first_cluster;
    let mut structural = None;

    loop {
        if !disk_bitmap.get(cluster) {
            structural = Some(truncate(FaultCode::FileInvalidClus, &chain, cluster_size));
            break;
        }
        if alloc_bitmap.get(cluster) {
            structural = Some(truncate(FaultCode::FileDuplicatedClus, &chain, cluster_size));
            break;
        }
        alloc_bitmap.set(cluster);
        chain.push(cluster);

        if chain.len() as u64 == max_count {
            if !input.contiguous {
                match fat.next(cluster, heap_clusters) {
                    NextCluster::Eof => {}
                    _ => structural = Some(truncate(FaultCode::FileSmallerSize, &chain, cluster_size)),
                }
            }
            break;
        }

        let next = if input.contiguous {
            let candidate = cluster + 1;
            if in_heap(candidate, heap_clusters) {
                NextCluster::Next(candidate)
            } else {
                NextCluster::OutOfRange(candidate)
            }
        } else {
            fat.next(cluster, heap_clusters)
        };

        match next {
            NextCluster::Next(n) => cluster = n,
            NextCluster::Eof => {
                structural = Some(truncate(FaultCode::FileLargerSize, &chain, cluster_size));
                break;
            }
            NextCluster::Free | NextCluster::Bad | NextCluster::OutOfRange(_) => {
                structural = Some(truncate(FaultCode::FileInvalidClus, &chain, cluster_size));
                break;
            }
        }
    }

    ChainCheck {
        chain,
        structural,
        zero_nofat: false,
        valid_size_fault: input.valid_size > input.size,
    }
}

fn in_heap(cluster: u32, heap_clusters: u32) -> bool {
    cluster >= crate::bitmap::FIRST_CLUSTER && cluster < crate::bitmap::FIRST_CLUSTER + heap_clusters
}

fn truncate(code: FaultCode, accepted: &[u32], cluster_size: u64) -> StructuralFault {
    let new_size = accepted.len() as u64 * cluster_size;
    StructuralFault {
        code,
        new_size,
        new_valid_size: new_size,
        eof_after: accepted.last().copied(),
    }
}
