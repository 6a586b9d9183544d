// A block is the unit of transfer on the wire, a sub-range of a piece.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct BlockInfo {

    // Index of piece that the block is contained in.
    pub piece_idx: usize,

    // Offset in bytes of block within piece.
    pub offset: usize,

    pub len: usize,

}

// Length of the block at `block_idx`, the last block of a piece may be shorter.
pub fn block_len(piece_len: usize, block_size: usize, block_idx: usize) -> usize {
    block_size.min(piece_len - (block_idx * block_size))
}

pub fn num_blocks(piece_len: usize, block_size: usize) -> usize {
    (piece_len + (block_size - 1)) / block_size
}

// Iterates over the blocks of a piece in increasing offset order.
pub fn blocks(piece_idx: usize, piece_len: usize, block_size: usize) -> impl Iterator<Item = BlockInfo> {
    (0..num_blocks(piece_len, block_size)).map(move |i| BlockInfo {
        piece_idx,
        offset: i * block_size,
        len: block_len(piece_len, block_size, i),
    })
}
