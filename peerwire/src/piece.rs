use sha1::{Digest, Sha1};
use crate::ID;

// A piece waiting to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {

    pub idx: usize,

    // SHA1 hash given in the metainfo.
    pub hash: ID,

    // Length of piece in bytes, the last piece may be shorter.
    pub len: usize,

}

// Verified piece data received from a peer.
#[derive(Debug)]
pub struct PieceResult {
    pub idx: usize,
    pub data: Vec<u8>,
}

impl PieceWork {

    // Hash the piece data and compare with hash given in metainfo.
    // Returns the actual digest on mismatch.
    pub fn verify(&self, data: &[u8]) -> Result<(), ID> {
        let digest = hash(data);
        if digest == self.hash {
            Ok(())
        } else {
            Err(digest)
        }
    }
}

pub fn hash(data: &[u8]) -> ID {
    Sha1::digest(data).into()
}

// Lengths of every piece of a torrent.
pub fn piece_lens(total_len: usize, piece_len: usize) -> impl Iterator<Item = usize> {
    let num_pieces = (total_len + piece_len - 1) / piece_len;
    (0..num_pieces).map(move |idx| {
        if idx == num_pieces - 1 {
            total_len - idx * piece_len
        } else {
            piece_len
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_hash() {
        assert_eq!(hash(b"abc"), hex!("a9993e364706816aba3e25717850c26c9cd0d89d"));
    }

    #[test]
    fn test_verify() {
        let work = PieceWork { idx: 0, hash: hash(b"piece data"), len: 10 };
        assert!(work.verify(b"piece data").is_ok());
        assert_eq!(work.verify(b"piece dat4"), Err(hash(b"piece dat4")));
    }

    #[test]
    fn test_piece_lens() {
        assert_eq!(piece_lens(10, 4).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(piece_lens(12, 4).collect::<Vec<_>>(), vec![4, 4, 4]);
        assert_eq!(piece_lens(1, 4).collect::<Vec<_>>(), vec![1]);
        assert_eq!(piece_lens(0, 4).count(), 0);
    }
}
