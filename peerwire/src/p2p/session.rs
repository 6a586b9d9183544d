use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{io::{AsyncRead, AsyncWrite}, net::TcpStream, time};
use tokio_util::codec::Framed;
use futures::{SinkExt, StreamExt};
use crate::{
    block::{self, BlockInfo},
    piece::PieceWork,
    torrent::TorrentContext,
    Bitfield,
    ID,
};
use super::{*, handshake::*, message::*, state::*};

// One established connection to a peer, past the handshake and bitfield exchange.
pub struct PeerSession<S = TcpStream> {

    // The peer's IP address.
    address: SocketAddr,

    // Context is a read only state accessible by all peers.
    torrent_ctx: Arc<TorrentContext>,

    socket: Framed<S, MessageCodec>,

    // Id the peer sent in its handshake.
    peer_id: ID,

    // Bitfield of pieces the peer currently has.
    bitfield: Bitfield,

    state: SessionState,

}

impl PeerSession<TcpStream> {

    pub async fn connect(address: SocketAddr, torrent_ctx: Arc<TorrentContext>) -> Result<Self> {
        let timeout = torrent_ctx.config.connect_timeout;
        let stream = time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| PeerError::ConnectFailure(io::ErrorKind::TimedOut.into()))?
            .map_err(PeerError::ConnectFailure)?;
        tracing::trace!("outbound connection successful");
        Self::establish(address, stream, torrent_ctx).await
    }
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{

    // Runs the handshake and waits for the peer's bitfield, then declares interest.
    pub async fn establish(address: SocketAddr, stream: S, torrent_ctx: Arc<TorrentContext>) -> Result<Self> {

        let mut state = SessionState::default();
        state.transition(ConnState::Handshaking);

        let mut socket = Framed::new(stream, HandshakeCodec);
        let timeout = torrent_ctx.config.handshake_timeout;
        let handshake = time::timeout(timeout, exchange_handshake(&mut socket, &torrent_ctx))
            .await
            .map_err(|_| PeerError::HandshakeTimeout)??;
        tracing::info!("handshake successful, peer connected");

        // Switch codec, keeping anything the peer sent after its handshake.
        let socket = socket.map_codec(|_| MessageCodec);
        let mut session = PeerSession {
            address,
            torrent_ctx,
            socket,
            peer_id: handshake.peer_id,
            bitfield: Bitfield::default(),
            state,
        };

        session.receive_bitfield().await?;
        session.announce_interest().await?;
        Ok(session)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn peer_id(&self) -> &ID {
        &self.peer_id
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    // The first message after the handshake must be the peer's bitfield.
    async fn receive_bitfield(&mut self) -> Result<()> {
        self.state.transition(ConnState::AwaitingBitfield);
        let timeout = self.torrent_ctx.config.bitfield_timeout;

        match self.read_frame(timeout, "bitfield").await? {
            Frame::Message(msg) if msg.id == MessageId::Bitfield => {
                self.bitfield = Bitfield::from(msg.payload.to_vec());
                tracing::info!("peer has {} pieces", self.bitfield.count_ones());
                self.state.transition(ConnState::Idle);
                Ok(())
            },
            Frame::Message(msg) => Err(MessageError::UnexpectedId {
                expected: MessageId::Bitfield,
                actual: Some(msg.id),
            }.into()),
            Frame::KeepAlive => Err(MessageError::UnexpectedId {
                expected: MessageId::Bitfield,
                actual: None,
            }.into()),
        }
    }

    async fn announce_interest(&mut self) -> Result<()> {
        self.feed_message(Message::unchoke()).await?;
        self.feed_message(Message::interested()).await?;
        self.flush().await?;
        self.state.interested = true;
        self.state.transition(ConnState::Interested);
        Ok(())
    }

    // Reads messages until the peer unchokes us.
    pub async fn wait_unchoked(&mut self) -> Result<()> {
        let timeout = self.torrent_ctx.config.read_timeout;
        while self.state.peer_choking {
            if let Frame::Message(msg) = self.read_frame(timeout, "unchoke").await? {
                self.handle_msg(msg)?;
            }
        }
        Ok(())
    }

    // Downloads and verifies a whole piece, pipelining block requests.
    pub async fn download_piece(&mut self, work: &PieceWork) -> Result<Vec<u8>> {

        if !self.bitfield.has_piece(work.idx) {
            return Err(PeerError::PieceUnavailable(work.idx));
        }

        self.state.transition(ConnState::Downloading);
        let timeout = self.torrent_ctx.config.read_timeout;
        let block_size = self.torrent_ctx.config.block_size;

        let mut buf = vec![0; work.len];
        let mut blocks = block::blocks(work.idx, work.len, block_size);
        let mut downloaded = 0;
        self.state.backlog = 0;

        while downloaded < work.len {

            if !self.state.peer_choking {
                self.make_requests(&mut blocks).await?;
            }

            let msg = match self.read_frame(timeout, "block").await? {
                Frame::Message(msg) => msg,
                Frame::KeepAlive => continue,
            };

            match msg.id {
                MessageId::Piece => {
                    downloaded += msg.parse_piece(work.idx, &mut buf)?;
                    self.state.backlog = self.state.backlog.saturating_sub(1);
                },
                MessageId::Choke => {
                    // Peer discards our outstanding requests.
                    self.state.peer_choking = true;
                    self.state.backlog = 0;
                    self.state.chokes += 1;
                    self.state.transition(ConnState::Interested);
                    return Err(PeerError::Choked(work.idx));
                },
                _ => self.handle_msg(msg)?,
            }
        }

        if let Err(actual) = work.verify(&buf) {
            self.state.hash_failures += 1;
            self.state.transition(ConnState::Interested);
            return Err(PeerError::HashMismatch { idx: work.idx, expected: work.hash, actual });
        }

        tracing::info!("piece {} verified", work.idx);
        self.state.chokes = 0;
        self.send_message(Message::have(work.idx)).await?;
        self.state.transition(ConnState::Interested);
        Ok(buf)
    }

    // Queue requests up to the backlog limit, in increasing offset order.
    async fn make_requests(&mut self, blocks: &mut impl Iterator<Item = BlockInfo>) -> Result<()> {
        let max_backlog = self.torrent_ctx.config.max_backlog;
        let mut sent = 0;
        while self.state.backlog < max_backlog {
            let Some(block) = blocks.next() else { break };
            self.feed_message(Message::request(block)).await?;
            self.state.backlog += 1;
            sent += 1;
        }
        if sent > 0 {
            self.flush().await?;
        }
        Ok(())
    }

    // Messages that can arrive at any point once introduced.
    fn handle_msg(&mut self, msg: Message) -> Result<()> {
        match msg.id {

            MessageId::Choke => self.state.peer_choking = true,

            MessageId::Unchoke => self.state.peer_choking = false,

            MessageId::Have => {
                let idx = msg.parse_have()?;
                self.bitfield.set_piece(idx);
            },

            // Bitfield can only be sent directly after handshake.
            MessageId::Bitfield => {
                tracing::warn!("unexpected bitfield");
                return Err(PeerError::UnexpectedBitfield);
            },

            // A block left over from a piece we gave up on.
            MessageId::Piece => tracing::warn!("unexpected block: {}", msg),

            // Nothing is uploaded, so upload related messages are ignored.
            MessageId::Interested
            | MessageId::NotInterested
            | MessageId::Request
            | MessageId::Cancel => tracing::trace!("ignoring: {}", msg),
        }
        Ok(())
    }

    async fn read_frame(&mut self, timeout: Duration, waiting_for: &'static str) -> Result<Frame> {
        match time::timeout(timeout, self.socket.next()).await {
            Err(_) => Err(PeerError::Timeout(waiting_for)),
            Ok(None) => Err(PeerError::Disconnected),
            Ok(Some(frame)) => {
                let frame = frame?;
                tracing::trace!("read: {}", frame);
                Ok(frame)
            },
        }
    }

    // Logs a message and sends to peer.
    #[inline(always)]
    async fn send_message(&mut self, msg: Message) -> Result<()> {
        tracing::debug!("send: {}", msg);
        let timeout = self.torrent_ctx.config.write_timeout;
        time::timeout(timeout, self.socket.send(msg.into()))
            .await
            .map_err(|_| PeerError::Timeout("write"))?
    }

    // Buffers a message without flushing.
    #[inline(always)]
    async fn feed_message(&mut self, msg: Message) -> Result<()> {
        tracing::trace!("send: {}", msg);
        let timeout = self.torrent_ctx.config.write_timeout;
        time::timeout(timeout, self.socket.feed(msg.into()))
            .await
            .map_err(|_| PeerError::Timeout("write"))?
    }

    async fn flush(&mut self) -> Result<()> {
        let timeout = self.torrent_ctx.config.write_timeout;
        time::timeout(timeout, self.socket.flush())
            .await
            .map_err(|_| PeerError::Timeout("write"))?
    }

    // Marks the session as finished after an error it can't recover from.
    pub fn close(&mut self) {
        self.state.transition(ConnState::Closed);
        self.state.backlog = 0;
    }
}

async fn exchange_handshake<S>(
    socket: &mut Framed<S, HandshakeCodec>,
    torrent_ctx: &TorrentContext,
) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::trace!("send handshake");
    socket.send(Handshake::new(torrent_ctx.info_hash, torrent_ctx.client_id)).await?;

    tracing::trace!("waiting for handshake");
    let handshake = match socket.next().await {
        Some(handshake) => handshake?,
        None => return Err(PeerError::Disconnected),
    };
    tracing::debug!("read: {:?}", handshake);

    if handshake.info_hash != torrent_ctx.info_hash {
        return Err(PeerError::InfoHashMismatch {
            expected: torrent_ctx.info_hash,
            actual: handshake.info_hash,
        });
    }
    Ok(handshake)
}
