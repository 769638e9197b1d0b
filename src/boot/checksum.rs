//! Boot-region checksum (C5, spec §4.1).
//!
//! The algorithm is a rotate-right-by-one running sum fed one byte at a
//! time, unchanged from the teacher crate's formatter-side
//! `boot::checksum::Checksum` — only the mutable fields of the *first*
//! sector (volume flags, percent-in-use) are skipped, and only there.

/// Offsets within sector 0 that are mutated by ordinary operation
/// (`vol_flags` low/high byte and `perc_in_use`) and therefore excluded
/// from the checksum.
const MUTABLE_OFFSETS: [u16; 3] = [106, 107, 112];

#[derive(Copy, Clone, Debug)]
pub struct BootChecksum {
    inner: u32,
    sector_size: u16,
}

impl BootChecksum {
    pub fn new(sector_size: u16) -> Self {
        Self {
            inner: 0,
            sector_size,
        }
    }

    /// Feeds one sector's worth of bytes into the running checksum. Pass
    /// `skip_mutable = true` only for sector 0 of the 11-sector run.
    pub fn feed_sector(&mut self, sector: &[u8], skip_mutable: bool) {
        assert_eq!(sector.len(), self.sector_size as usize);
        for i in 0..self.sector_size {
            if skip_mutable && MUTABLE_OFFSETS.contains(&i) {
                continue;
            }
            self.inner = (self.inner & 1) * 0x8000_0000 + (self.inner >> 1) + sector[i as usize] as u32;
        }
    }

    /// Current checksum value, little-endian (the form it's stored in on disk).
    pub fn get(&self) -> u32 {
        self.inner.to_le()
    }

    /// Verifies that every 32-bit little-endian word of the 12th sector
    /// equals the running checksum. Returns the first mismatching stored
    /// word on failure.
    pub fn verify(&self, checksum_sector: &[u8]) -> Result<(), u32> {
        let expected = self.get();
        for word in checksum_sector.chunks_exact(4) {
            let stored = u32::from_le_bytes(word.try_into().unwrap());
            if stored != expected {
                return Err(stored);
            }
        }
        Ok(())
    }

    /// Fills a 12th-sector-sized buffer with the current checksum, repeated
    /// as 32-bit little-endian words — the layout `restore_from_backup` and
    /// the formatter both write.
    pub fn fill_sector(&self, sector_size: usize) -> Vec<u8> {
        let word = self.get().to_le_bytes();
        let mut out = Vec::with_capacity(sector_size);
        while out.len() < sector_size {
            out.extend_from_slice(&word);
        }
        out
    }
}
