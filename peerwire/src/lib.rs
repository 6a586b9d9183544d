mod config;
mod bitfield;
mod block;
mod piece;
mod queue;
mod torrent;
pub mod p2p;
pub mod peers;

#[cfg(test)]
mod test_util;

// Most commonly used block size - 16KB.
const BLOCK_SIZE: usize = 0x4000;

// 20 byte SHA1 hash, used for info hashes, piece hashes and peer ids.
pub type ID = [u8; 20];

// Re-exports
pub use config::{Config, random_peer_id};
pub use bitfield::Bitfield;
pub use block::BlockInfo;
pub use piece::{PieceWork, PieceResult};
pub use queue::PieceWorkQueue;
pub use torrent::{download, DownloadError, Torrent, TorrentContext};
