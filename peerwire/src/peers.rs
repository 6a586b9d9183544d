use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PeerListError {

    #[error("compact peer list length {0} is not a multiple of 6")]
    Malformed(usize),

}

// Tracker's compact model, a string whose length is a multiple of 6.
// The first 4 bytes of each peer are the IP address and the last 2 bytes the port,
// all in network (big-endian) byte order.
pub fn parse_compact(raw: &[u8]) -> Result<Vec<SocketAddr>, PeerListError> {
    if raw.len() % 6 != 0 {
        return Err(PeerListError::Malformed(raw.len()));
    }

    Ok(raw
        .chunks_exact(6)
        .map(|raw| {
            SocketAddrV4::new(
                Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]),
                u16::from_be_bytes([raw[4], raw[5]]),
            ).into()
        })
        .collect())
}
