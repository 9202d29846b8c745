//! # Piece Work Units
//!
//! Pieces are the verification units of a torrent. Workers pull [`PieceWork`]
//! assignments off the shared queue, download the blocks, and hand back a
//! [`PieceResult`] with the verified bytes.

use boring::sha::Sha1;

/// A piece waiting to be downloaded.
#[derive(Debug, Clone)]
pub struct PieceWork {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Expected SHA-1 hash of the piece
    pub hash: [u8; 20],
    /// Actual length of this piece in bytes (the last piece may be short)
    pub length: u32,
}

/// A completed piece carrying its downloaded bytes.
#[derive(Debug)]
pub struct PieceResult {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Complete piece data
    pub data: Vec<u8>,
}

impl PieceWork {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> PieceWork {
        PieceWork {
            index,
            hash,
            length,
        }
    }

    /// Check downloaded bytes against the expected piece hash.
    pub fn verify(&self, data: &[u8]) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finish() == self.hash
    }
}

impl PieceResult {
    pub fn new(index: u32, data: Vec<u8>) -> PieceResult {
        PieceResult { index, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_matching_data() {
        let data = b"piece payload";
        let mut hasher = Sha1::new();
        hasher.update(data);
        let work = PieceWork::new(0, hasher.finish(), data.len() as u32);

        assert!(work.verify(data));
        assert!(!work.verify(b"piece paylo4d"));
    }
}
