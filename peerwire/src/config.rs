use std::time::Duration;
use rand::{distributions::Alphanumeric, Rng};
use crate::{BLOCK_SIZE, ID};

#[derive(Debug, Clone)]
pub struct Config {

    // Time allowed to open a TCP connection to a peer.
    pub connect_timeout: Duration,

    // Time allowed for the whole handshake exchange.
    pub handshake_timeout: Duration,

    // Time allowed for the peer's bitfield to arrive after the handshake.
    pub bitfield_timeout: Duration,

    // Time allowed for any single read once the session is established.
    pub read_timeout: Duration,

    // Time allowed for a message to be written and flushed to the peer.
    pub write_timeout: Duration,

    // Maximum number of unanswered block requests per peer.
    pub max_backlog: usize,

    // Largest block requested in a single message.
    pub block_size: usize,

    // Maximum number of peer sessions running at once.
    pub max_peers: usize,

    // Pieces failing verification a peer may send before it is dropped.
    pub max_hash_failures: usize,

    // Chokes in a row, with no piece completed in between, before a peer is dropped.
    pub max_chokes: usize,

}

const CLIENT_PREFIX: &[u8; 8] = b"-PW0100-";

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            bitfield_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_backlog: 5,
            block_size: BLOCK_SIZE,
            max_peers: 50,
            max_hash_failures: 2,
            max_chokes: 3,
        }
    }
}

impl Config {

    // Limits that would stop a download from making progress.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.block_size == 0 {
            return Err("block size is zero");
        }
        if self.max_backlog == 0 {
            return Err("max backlog is zero");
        }
        if self.max_peers == 0 {
            return Err("max peers is zero");
        }
        Ok(())
    }
}

// Azureus-style peer id, client prefix followed by random alphanumerics.
pub fn random_peer_id() -> ID {
    let mut id = [0; 20];
    id[..8].copy_from_slice(CLIENT_PREFIX);
    let mut rng = rand::thread_rng();
    for b in id[8..].iter_mut() {
        *b = rng.sample(Alphanumeric);
    }
    id
}
