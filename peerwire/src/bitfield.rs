use bitvec::{order::Msb0, vec::BitVec};

/* The bitfield message is variable length, where X is the length of the bitfield.
The payload is a bitfield representing the pieces that have been successfully downloaded.
The high bit in the first byte corresponds to piece index 0.
Bits that are cleared indicated a missing piece, and set bits indicate a valid and available piece.
Spare bits at the end are set to zero. */

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitfield(BitVec<u8, Msb0>);

impl Bitfield {

    // Empty bitfield with room for `num_pieces`, rounded up to whole bytes.
    pub fn new(num_pieces: usize) -> Self {
        Self(BitVec::repeat(false, (num_pieces + 7) / 8 * 8))
    }

    // Number of addressable bits, always a multiple of 8.
    pub fn capacity(&self) -> usize {
        self.0.len()
    }

    pub fn count_ones(&self) -> usize {
        self.0.count_ones()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_raw_slice()
    }

    pub fn has_piece(&self, idx: usize) -> bool {
        self.0.get(idx).map(|bit| *bit).unwrap_or(false)
    }

    pub fn set_piece(&mut self, idx: usize) {
        if let Some(mut bit) = self.0.get_mut(idx) {
            *bit = true;
        }
    }
}

impl From<Vec<u8>> for Bitfield {
    fn from(bytes: Vec<u8>) -> Self {
        Self(BitVec::from_vec(bytes))
    }
}

impl From<&[u8]> for Bitfield {
    fn from(bytes: &[u8]) -> Self {
        Self(BitVec::from_slice(bytes))
    }
}
