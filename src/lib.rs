//! # exfat-fsck
//!
//! A consistency checker and repair tool for the exFAT filesystem.
//!
//! The core is generic over a [`device::BlockDevice`], so the same checking
//! logic runs against a real block device or an in-memory one built for
//! tests.

/// Bit-per-cluster allocation bitmap.
pub mod bitmap;
/// Boot region: layout, checksum, load/validate/repair.
pub mod boot;
/// Cluster-chain validator: reconciles a file's chain with size and bitmaps.
pub mod chain;
/// Cluster-chain resolution and a byte-level cursor over one.
pub mod cluster;
/// Directory-entry on-disk layout.
pub mod dentry;
/// Positioned I/O abstraction over the backing store.
pub mod device;
pub mod error;
/// Exit-code taxonomy.
pub mod exit;
/// FAT entries and chain lookups.
pub mod fat;
/// In-memory directory tree built by the walk.
pub mod inode;
/// Streaming directory lookup.
pub mod lookup;
/// Repair-decision policy.
pub mod policy;
/// Post-walk FAT/bitmap reconciliation.
pub mod reconcile;
/// Upcase (case-folding) table.
pub mod upcase;
/// Top-level volume driver tying the checker together.
pub mod volume;
/// Directory walk: BFS over the inode tree, dispatching by entry type.
pub mod walk;

pub const GB: u32 = 1024 * 1024 * 1024;
pub const MB: u32 = 1024 * 1024;
pub const KB: u16 = 1024;
