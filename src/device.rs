//! Block device shim (C2).
//!
//! Spec §1 treats the actual device — open, read-at-offset, write-at-offset,
//! fsync, size/sector-size probe — as an external collaborator. The core
//! still needs to be generic over it, the same way the teacher crate is
//! generic over [`std::fs::File`] through its own `disk::ReadOffset` /
//! `disk::WriteSeek` traits. `BlockDevice` merges both directions plus
//! `fsync`, since the checker both reads and repairs.

use std::fmt::Debug;

/// Positioned I/O against the volume's backing store, plus durability.
///
/// All writes the checker issues are sector-aligned; reads may be
/// cluster-aligned (spec §6). Short I/O is always a fatal [`IoFault`]-class
/// error: callers should return `Err` rather than retry if the device
/// returns fewer bytes than requested, since a filesystem checker allowing
/// a partial, un-flagged write is worse than aborting.
pub trait BlockDevice {
    type Err: Debug + 'static;

    /// Total size of the device, in bytes.
    fn size(&self) -> Result<u64, Self::Err>;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, Self::Err>;
    fn fsync(&self) -> Result<(), Self::Err>;

    fn unexpected_eof() -> Self::Err;

    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> Result<(), Self::Err> {
        while !buf.is_empty() {
            match self.read_at(offset, buf)? {
                0 => return Err(Self::unexpected_eof()),
                n => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
            }
        }
        Ok(())
    }

    fn write_all_at(&self, mut offset: u64, mut buf: &[u8]) -> Result<(), Self::Err> {
        while !buf.is_empty() {
            match self.write_at(offset, buf)? {
                0 => return Err(Self::unexpected_eof()),
                n => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
            }
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl BlockDevice for std::fs::File {
    type Err = std::io::Error;

    fn size(&self) -> Result<u64, Self::Err> {
        Ok(self.metadata()?.len())
    }

    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, Self::Err> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }
    #[cfg(windows)]
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, Self::Err> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }

    fn fsync(&self) -> Result<(), Self::Err> {
        self.sync_all()
    }

    fn unexpected_eof() -> Self::Err {
        std::io::Error::from(std::io::ErrorKind::UnexpectedEof)
    }
}

impl<T: BlockDevice> BlockDevice for std::sync::Arc<T> {
    type Err = T::Err;

    fn size(&self) -> Result<u64, Self::Err> {
        self.as_ref().size()
    }
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Err> {
        self.as_ref().read_at(offset, buf)
    }
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize, Self::Err> {
        self.as_ref().write_at(offset, buf)
    }
    fn fsync(&self) -> Result<(), Self::Err> {
        self.as_ref().fsync()
    }
    fn unexpected_eof() -> Self::Err {
        T::unexpected_eof()
    }
}
