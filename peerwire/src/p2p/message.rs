use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::{block::BlockInfo, Bitfield};
use super::PeerError;

// Largest frame accepted from a peer: a max sized block plus the piece header,
// or a bitfield for a torrent of up to 8M pieces.
pub const MAX_FRAME_LEN: usize = (1 << 20) + 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {

    // No further requests will be satisfied.
    Choke = 0,

    // Requests from the peer will be served.
    Unchoke = 1,

    // The sender wants to request blocks.
    Interested = 2,

    NotInterested = 3,

    // The sender has a piece, referenced by the piece index.
    Have = 4,

    // Every piece the sender has, usually sent right after the handshake.
    Bitfield = 5,

    // Request for a block: piece index, begin offset, length.
    Request = 6,

    // A block: piece index, begin offset, then the data.
    Piece = 7,

    // Cancels a previous request, same payload as request.
    Cancel = 8,

}

impl TryFrom<u8> for MessageId {
    type Error = MessageError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            id => return Err(MessageError::UnknownId(id)),
        })
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageId::Choke => "choke",
            MessageId::Unchoke => "unchoke",
            MessageId::Interested => "interested",
            MessageId::NotInterested => "not interested",
            MessageId::Have => "have",
            MessageId::Bitfield => "bitfield",
            MessageId::Request => "request",
            MessageId::Piece => "piece",
            MessageId::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {

    #[error("unknown message id: {0}")]
    UnknownId(u8),

    #[error("frame length {0} exceeds maximum")]
    FrameTooLarge(usize),

    // An actual id of None is a keep alive.
    #[error("expected {expected} message, got {actual:?}")]
    UnexpectedId { expected: MessageId, actual: Option<MessageId> },

    #[error("{id} payload too short: {len} < {min}")]
    PayloadTooShort { id: MessageId, len: usize, min: usize },

    #[error("{id} payload length {actual}, expected {expected}")]
    InvalidPayloadLength { id: MessageId, expected: usize, actual: usize },

    #[error("expected piece index {expected}, got {actual}")]
    UnexpectedIndex { expected: usize, actual: usize },

    #[error("begin offset {begin} out of range for piece of length {len}")]
    OffsetOutOfRange { begin: usize, len: usize },

    #[error("{data_len} bytes at offset {begin} overflow piece of length {len}")]
    PayloadOverflow { begin: usize, data_len: usize, len: usize },

}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Bytes,
}

// What a peer can put on the wire once the handshake is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {

    // A zero length frame, advises peers not to close the connection.
    KeepAlive,

    Message(Message),

}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        Frame::Message(msg)
    }
}

impl Message {

    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self { id, payload: payload.into() }
    }

    fn empty(id: MessageId) -> Self {
        Self::new(id, Bytes::new())
    }

    pub fn choke() -> Self { Self::empty(MessageId::Choke) }

    pub fn unchoke() -> Self { Self::empty(MessageId::Unchoke) }

    pub fn interested() -> Self { Self::empty(MessageId::Interested) }

    pub fn not_interested() -> Self { Self::empty(MessageId::NotInterested) }

    // have: <len=0005><id=4><piece index>
    pub fn have(idx: usize) -> Self {
        Self::new(MessageId::Have, (idx as u32).to_be_bytes().to_vec())
    }

    // bitfield: <len=0001+X><id=5><bitfield>
    pub fn bitfield(bitfield: &Bitfield) -> Self {
        Self::new(MessageId::Bitfield, bitfield.as_bytes().to_vec())
    }

    // request: <len=0013><id=6><index><begin><length>
    pub fn request(block: BlockInfo) -> Self {
        Self::new(MessageId::Request, block_payload(block))
    }

    // piece: <len=0009+X><id=7><index><begin><block>
    pub fn piece(idx: usize, begin: usize, data: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(8 + data.len());
        payload.put_u32(idx as u32);
        payload.put_u32(begin as u32);
        payload.extend_from_slice(data);
        Self::new(MessageId::Piece, payload.freeze())
    }

    // cancel: <len=0013><id=8><index><begin><length>
    pub fn cancel(block: BlockInfo) -> Self {
        Self::new(MessageId::Cancel, block_payload(block))
    }

    fn expect_id(&self, expected: MessageId) -> Result<(), MessageError> {
        if self.id != expected {
            return Err(MessageError::UnexpectedId { expected, actual: Some(self.id) });
        }
        Ok(())
    }

    fn expect_len(&self, expected: usize) -> Result<(), MessageError> {
        if self.payload.len() != expected {
            return Err(MessageError::InvalidPayloadLength {
                id: self.id,
                expected,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    pub fn parse_have(&self) -> Result<usize, MessageError> {
        self.expect_id(MessageId::Have)?;
        self.expect_len(4)?;
        Ok((&self.payload[..]).get_u32() as usize)
    }

    // Copies the block into `buf` at its begin offset, returning the number of bytes copied.
    pub fn parse_piece(&self, idx: usize, buf: &mut [u8]) -> Result<usize, MessageError> {
        self.expect_id(MessageId::Piece)?;
        if self.payload.len() < 8 {
            return Err(MessageError::PayloadTooShort {
                id: self.id,
                len: self.payload.len(),
                min: 8,
            });
        }

        let mut payload = &self.payload[..];
        let piece_idx = payload.get_u32() as usize;
        if piece_idx != idx {
            return Err(MessageError::UnexpectedIndex { expected: idx, actual: piece_idx });
        }
        let begin = payload.get_u32() as usize;
        if begin >= buf.len() {
            return Err(MessageError::OffsetOutOfRange { begin, len: buf.len() });
        }
        let data = payload;
        if begin + data.len() > buf.len() {
            return Err(MessageError::PayloadOverflow {
                begin,
                data_len: data.len(),
                len: buf.len(),
            });
        }

        buf[begin..begin + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    pub fn parse_request(&self) -> Result<BlockInfo, MessageError> {
        self.expect_id(MessageId::Request)?;
        self.parse_block_info()
    }

    pub fn parse_cancel(&self) -> Result<BlockInfo, MessageError> {
        self.expect_id(MessageId::Cancel)?;
        self.parse_block_info()
    }

    fn parse_block_info(&self) -> Result<BlockInfo, MessageError> {
        self.expect_len(12)?;
        let mut payload = &self.payload[..];
        Ok(BlockInfo {
            piece_idx: payload.get_u32() as usize,
            offset: payload.get_u32() as usize,
            len: payload.get_u32() as usize,
        })
    }
}

fn block_payload(block: BlockInfo) -> Bytes {
    let mut payload = BytesMut::with_capacity(12);
    payload.put_u32(block.piece_idx as u32);
    payload.put_u32(block.offset as u32);
    payload.put_u32(block.len as u32);
    payload.freeze()
}

pub struct MessageCodec;

impl Encoder<Frame> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {

            // [0, 0, 0, 0]
            Frame::KeepAlive => dst.put_u32(0),

            // <len=0001+X><id><payload>
            Frame::Message(msg) => {
                dst.reserve(5 + msg.payload.len());
                dst.put_u32(1 + msg.payload.len() as u32);
                dst.put_u8(msg.id as u8);
                dst.extend_from_slice(&msg.payload);
            },
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Frame;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // Can't read message length.
        if src.len() < 4 { return Ok(None); }

        let msg_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if msg_len > MAX_FRAME_LEN {
            return Err(MessageError::FrameTooLarge(msg_len).into());
        }

        if src.len() < 4 + msg_len {
            // Haven't recieved all of message.
            src.reserve(4 + msg_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        if msg_len == 0 { return Ok(Some(Frame::KeepAlive)); }

        let id = src.get_u8();
        let payload = src.split_to(msg_len - 1).freeze();
        // Frame is consumed before the id is checked, so the stream stays aligned.
        let id = MessageId::try_from(id)?;

        Ok(Some(Frame::Message(Message { id, payload })))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id {
            MessageId::Have => match self.parse_have() {
                Ok(idx) => write!(f, "have piece idx: {}", idx),
                Err(_) => write!(f, "have [{}]", self.payload.len()),
            },
            MessageId::Request | MessageId::Cancel => match self.parse_block_info() {
                Ok(block) => write!(f, "{} for block {{ piece idx: {}, offset: {}, length: {} }}",
                    self.id,
                    block.piece_idx,
                    block.offset,
                    block.len,
                ),
                Err(_) => write!(f, "{} [{}]", self.id, self.payload.len()),
            },
            MessageId::Piece if self.payload.len() >= 8 => {
                let mut header = &self.payload[..8];
                write!(f, "block data {{ piece idx: {}, offset: {}, length: {} }}",
                    header.get_u32(),
                    header.get_u32(),
                    self.payload.len() - 8,
                )
            },
            id if self.payload.is_empty() => write!(f, "{}", id),
            id => write!(f, "{} [{}]", id, self.payload.len()),
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::KeepAlive => write!(f, "keep alive"),
            Frame::Message(msg) => msg.fmt(f),
        }
    }
}
