use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::ID;
use super::PeerError;

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol:   Bytes,
    pub reserved:   [u8; 8],
    pub info_hash:  ID,
    pub peer_id:    ID,
}

impl Handshake {
    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            protocol:   Bytes::from_static(&PROTOCOL),
            reserved:   [0; 8],
            info_hash,
            peer_id,
        }
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(49 + item.protocol.len());
        dst.put_u8(item.protocol.len() as u8);
        dst.extend_from_slice(&item.protocol);
        dst.extend_from_slice(&item.reserved);
        dst.extend_from_slice(&item.info_hash);
        dst.extend_from_slice(&item.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        if src.is_empty() {
            return Ok(None);
        }

        let protocol_len = src[0] as usize;
        if protocol_len == 0 {
            return Err(PeerError::MalformedHandshake);
        }

        let handshake_len = 1 + protocol_len + 8 + 20 + 20;
        if src.len() < handshake_len {
            // Handshake not fully recieved.
            src.reserve(handshake_len - src.len());
            return Ok(None);
        }

        src.advance(1);
        let protocol = src.split_to(protocol_len).freeze();

        let mut reserved = [0; 8];
        src.copy_to_slice(&mut reserved);

        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);

        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            protocol,
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_encoding() {
        let info_hash = *b"\x86\xd4\xc8\x00\x24\xa4\x69\xbe\x4c\x50\xbc\x5a\x10\x2c\xf7\x17\x80\x31\x00\x74";
        let peer_id = *b"-TR2940-k8hj0wgej6ch";
        let mut dst = BytesMut::new();
        HandshakeCodec.encode(Handshake::new(info_hash, peer_id), &mut dst).unwrap();

        let mut expected = vec![19];
        expected.extend_from_slice(b"BitTorrent protocol");
        expected.extend_from_slice(&[0; 8]);
        expected.extend_from_slice(&info_hash);
        expected.extend_from_slice(&peer_id);
        assert_eq!(dst.len(), 68);
        assert_eq!(&dst[..], &expected[..]);
    }

    #[test]
    fn test_handshake_round_trip() {
        for seed in [0u8, 1, 0x7f, 0xff] {
            let info_hash: ID = std::array::from_fn(|i| seed.wrapping_add(i as u8));
            let peer_id: ID = std::array::from_fn(|i| seed.wrapping_mul(i as u8));
            let mut buf = BytesMut::new();
            HandshakeCodec.encode(Handshake::new(info_hash, peer_id), &mut buf).unwrap();
            let handshake = HandshakeCodec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(&handshake.protocol[..], &PROTOCOL[..]);
            assert_eq!(handshake.info_hash, info_hash);
            assert_eq!(handshake.peer_id, peer_id);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_handshake_decoding_with_incomplete_data() {
        let mut src = BytesMut::new();
        src.put_u8(19);
        src.extend_from_slice(b"BitTorrent protocol");
        src.extend_from_slice(&[0; 8]);
        src.extend_from_slice(&[1; 20]);
        assert!(HandshakeCodec.decode(&mut src).unwrap().is_none());

        // Rest of the handshake arrives.
        src.extend_from_slice(&[2; 20]);
        let handshake = HandshakeCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(handshake.info_hash, [1; 20]);
        assert_eq!(handshake.peer_id, [2; 20]);
    }

    #[test]
    fn test_handshake_decoding_zero_protocol_len() {
        let mut src = BytesMut::from(&[0u8; 68][..]);
        assert!(matches!(HandshakeCodec.decode(&mut src), Err(PeerError::MalformedHandshake)));
    }

    #[test]
    fn test_handshake_decoding_custom_protocol() {
        let mut src = BytesMut::new();
        src.put_u8(3);
        src.extend_from_slice(b"foo");
        src.extend_from_slice(&[0; 8]);
        src.extend_from_slice(&[3; 20]);
        src.extend_from_slice(&[4; 20]);
        let handshake = HandshakeCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&handshake.protocol[..], b"foo");
        assert_eq!(handshake.info_hash, [3; 20]);
        assert_eq!(handshake.peer_id, [4; 20]);
    }

    #[test]
    fn test_handshake_decoding_with_extra_data() {
        let mut src = BytesMut::new();
        HandshakeCodec.encode(Handshake::new([5; 20], [6; 20]), &mut src).unwrap();
        // Bitfield message sent in the same segment.
        src.extend_from_slice(&[0, 0, 0, 2, 5, 0xff]);

        let handshake = HandshakeCodec.decode(&mut src).unwrap();
        assert!(handshake.is_some());
        assert_eq!(&src[..], &[0, 0, 0, 2, 5, 0xff]);
    }
}
