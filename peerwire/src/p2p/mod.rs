use crate::ID;

mod session;
mod worker;
pub mod message;
pub mod handshake;
pub mod state;

pub use session::PeerSession;
pub use worker::{PeerWorker, WorkerEvent, WorkerTx, WorkerRx};

use message::MessageError;

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect: {0}")]
    ConnectFailure(std::io::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("malformed handshake")]
    MalformedHandshake,

    #[error("handshake provided incorrect info-hash: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    InfoHashMismatch { expected: ID, actual: ID },

    #[error("peer closed the connection")]
    Disconnected,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("protocol violation: {0}")]
    Protocol(#[from] MessageError),

    #[error("bitfield sent after introduction")]
    UnexpectedBitfield,

    #[error("piece {idx} failed hash check: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    HashMismatch { idx: usize, expected: ID, actual: ID },

    #[error("peer does not have piece {0}")]
    PieceUnavailable(usize),

    #[error("choked while downloading piece {0}")]
    Choked(usize),

    #[error("session cancelled")]
    Cancelled,

    #[error("peer task failed: {0}")]
    TaskFailed(String),
}

impl PeerError {
    // Whether the session can carry on with another piece after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PeerError::Choked(_) | PeerError::PieceUnavailable(_) | PeerError::HashMismatch { .. }
        )
    }
}
