// In-process peers for exercising sessions, workers and downloads.
use std::{
    io,
    net::SocketAddr,
    sync::{atomic::{AtomicUsize, Ordering}, Arc},
};
use tokio::{io::{AsyncRead, AsyncWrite}, net::TcpListener};
use tokio_util::codec::Framed;
use futures::{SinkExt, StreamExt};
use crate::{
    p2p::{self, handshake::*, message::*},
    Bitfield,
    ID,
};

pub const INFO_HASH: ID = [0xab; 20];
pub const REMOTE_ID: ID = *b"-MK0001-mockmockmock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Reliable,
    // Serves a single block then closes the connection.
    DisconnectAfterFirstBlock,
    // Every block is served with its bits flipped.
    Corrupt,
    // Chokes once after the first block, dropping the rest of that piece's requests.
    ChokeMidPiece,
    // Answers every request with a choke followed by an unchoke.
    ChokeFlapping,
}

#[derive(Debug, Clone)]
pub struct MockPeer {
    info_hash: ID,
    pieces: Arc<Vec<Vec<u8>>>,
    have: Bitfield,
    behaviour: Behaviour,
    // Block requests received across every connection.
    requests: Arc<AtomicUsize>,
}

impl MockPeer {

    // A seeder holding every piece.
    pub fn new(info_hash: ID, pieces: &[Vec<u8>], behaviour: Behaviour) -> Self {
        let mut have = Bitfield::new(pieces.len());
        for idx in 0..pieces.len() {
            have.set_piece(idx);
        }
        Self {
            info_hash,
            pieces: Arc::new(pieces.to_vec()),
            have,
            behaviour,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    // Accepts connections on an ephemeral local port, serving each one.
    pub async fn listen(&self) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let peer = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(peer.clone().serve(stream));
            }
        });
        Ok(address)
    }

    pub async fn serve<S>(self, stream: S) -> p2p::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut socket = Framed::new(stream, HandshakeCodec);
        match socket.next().await {
            Some(handshake) => handshake?,
            None => return Ok(()),
        };
        // Answers with its own info hash whatever was asked for.
        socket.send(Handshake::new(self.info_hash, REMOTE_ID)).await?;

        let mut socket = socket.map_codec(|_| MessageCodec);
        socket.send(Message::bitfield(&self.have).into()).await?;
        socket.send(Message::unchoke().into()).await?;

        let mut served = 0;
        let mut choked = false;
        // Requests for this piece were sent before our choke and are dropped.
        let mut discarding = None;
        while let Some(frame) = socket.next().await {
            let msg = match frame? {
                Frame::Message(msg) if msg.id == MessageId::Request => msg,
                _ => continue,
            };
            self.requests.fetch_add(1, Ordering::SeqCst);
            let block = msg.parse_request()?;

            match self.behaviour {
                Behaviour::DisconnectAfterFirstBlock if served == 1 => return Ok(()),
                Behaviour::ChokeFlapping => {
                    socket.feed(Message::choke().into()).await?;
                    socket.send(Message::unchoke().into()).await?;
                    continue;
                },
                _ => {},
            }

            if discarding == Some(block.piece_idx) {
                continue;
            }
            discarding = None;

            let mut data = self.pieces[block.piece_idx][block.offset..block.offset + block.len].to_vec();
            if self.behaviour == Behaviour::Corrupt {
                data.iter_mut().for_each(|b| *b = !*b);
            }
            socket.send(Message::piece(block.piece_idx, block.offset, &data).into()).await?;
            served += 1;

            if self.behaviour == Behaviour::ChokeMidPiece && !choked {
                choked = true;
                discarding = Some(block.piece_idx);
                socket.feed(Message::choke().into()).await?;
                socket.send(Message::unchoke().into()).await?;
            }
        }
        Ok(())
    }
}

// Shows logs for a test run with --nocapture.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
