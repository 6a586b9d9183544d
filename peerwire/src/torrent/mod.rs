use std::{
    collections::{HashMap, HashSet, VecDeque},
    net::SocketAddr,
    sync::Arc,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use crate::{
    p2p::{PeerWorker, WorkerEvent, WorkerRx, WorkerTx},
    piece::{self, PieceResult, PieceWork},
    queue::PieceWorkQueue,
    Bitfield,
    Config,
    ID,
};


#[derive(Debug, thiserror::Error)]
pub enum DownloadError {

    #[error("invalid torrent: {0}")]
    InvalidTorrent(String),

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("download incomplete: {completed} of {total} pieces")]
    DownloadIncomplete { completed: usize, total: usize },

}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

// Everything needed to download a single file from a set of peers.
#[derive(Debug, Clone)]
pub struct Torrent {

    // Addresses as given by the tracker.
    pub peers: Vec<SocketAddr>,

    // Our id, sent in every handshake.
    pub peer_id: ID,

    pub info_hash: ID,

    // SHA1 hash of every piece, in index order.
    pub piece_hashes: Vec<ID>,

    pub piece_len: usize,

    pub total_len: usize,

    pub name: String,

}

impl Torrent {

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    fn validate(&self) -> Result<()> {
        if self.piece_len == 0 {
            return Err(DownloadError::InvalidTorrent("piece length is zero".into()));
        }
        let expected = (self.total_len + self.piece_len - 1) / self.piece_len;
        if self.piece_hashes.len() != expected {
            return Err(DownloadError::InvalidTorrent(format!(
                "{} piece hashes for {} bytes in pieces of {}, expected {}",
                self.piece_hashes.len(), self.total_len, self.piece_len, expected,
            )));
        }
        Ok(())
    }

    // Work for every piece, in index order.
    fn piece_work(&self) -> impl Iterator<Item = PieceWork> + '_ {
        piece::piece_lens(self.total_len, self.piece_len)
            .zip(self.piece_hashes.iter())
            .enumerate()
            .map(|(idx, (len, hash))| PieceWork { idx, hash: *hash, len })
    }
}

// Read only state shared by every peer worker.
#[derive(Debug)]
pub struct TorrentContext {

    pub info_hash: ID,

    // The client ID for this client.
    pub client_id: ID,

    pub config: Config,

}

// Downloads the whole torrent into memory.
// Fails only if every peer is exhausted with pieces still missing.
pub async fn download(torrent: Torrent, config: Option<Config>) -> Result<Vec<u8>> {
    let config = config.unwrap_or_default();
    config.validate().map_err(DownloadError::InvalidConfig)?;
    torrent.validate()?;
    if torrent.total_len == 0 {
        tracing::info!("{} is empty, nothing to download", torrent.name);
        return Ok(Vec::new());
    }
    Download::new(torrent, config).run().await
}

struct Download {

    name: String,

    ctx: Arc<TorrentContext>,

    queue: Arc<PieceWorkQueue>,

    piece_len: usize,

    num_pieces: usize,

    // Assembled file.
    buf: Vec<u8>,

    // Pieces already copied into the buffer.
    written: Bitfield,

    completed: usize,

    // Peers with a running worker.
    workers: HashMap<SocketAddr, JoinHandle<()>>,

    // Peers we know about but haven't connected to.
    available: VecDeque<SocketAddr>,

    worker_tx: WorkerTx,

    worker_rx: WorkerRx,

    cancel: CancellationToken,

}

impl Download {

    fn new(torrent: Torrent, config: Config) -> Self {
        let queue = PieceWorkQueue::new(torrent.piece_work());
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        // Only one worker per address.
        let mut seen = HashSet::new();
        let available = torrent.peers
            .iter()
            .copied()
            .filter(|address| seen.insert(*address))
            .collect();

        Self {
            name: torrent.name,
            ctx: Arc::new(TorrentContext {
                info_hash: torrent.info_hash,
                client_id: torrent.peer_id,
                config,
            }),
            queue: Arc::new(queue),
            piece_len: torrent.piece_len,
            num_pieces: torrent.piece_hashes.len(),
            buf: vec![0; torrent.total_len],
            written: Bitfield::new(torrent.piece_hashes.len()),
            completed: 0,
            workers: HashMap::new(),
            available,
            worker_tx,
            worker_rx,
            cancel: CancellationToken::new(),
        }
    }

    #[tracing::instrument(skip_all, name = "torrent", fields(name = %self.name))]
    async fn run(mut self) -> Result<Vec<u8>> {
        tracing::info!("downloading {} pieces from {} peers", self.num_pieces, self.available.len());
        self.connect_to_peers();

        // Workers always report their pieces before exiting, so nothing is
        // left in the channel once the last one has gone.
        while self.completed < self.num_pieces && !self.workers.is_empty() {
            match self.worker_rx.recv().await {

                Some(WorkerEvent::Piece(res)) => self.write_piece(res),

                Some(WorkerEvent::Exited { address, error }) => {
                    if let Some(handle) = self.workers.remove(&address) {
                        if let Err(e) = handle.await {
                            tracing::error!("peer task {} failed: {}", address, e);
                        }
                    }
                    match error {
                        Some(e) => tracing::debug!("peer {} exited: {}", address, e),
                        None => tracing::debug!("peer {} exited", address),
                    }
                    self.connect_to_peers();
                },

                None => break,
            }
        }

        self.shutdown().await;

        if self.completed < self.num_pieces {
            tracing::warn!("all peers exhausted, {} of {} pieces", self.completed, self.num_pieces);
            return Err(DownloadError::DownloadIncomplete {
                completed: self.completed,
                total: self.num_pieces,
            });
        }
        tracing::info!("download complete");
        Ok(self.buf)
    }

    // Start workers for known peers, up to the concurrency limit.
    fn connect_to_peers(&mut self) {
        let max_peers = self.ctx.config.max_peers;
        while self.workers.len() < max_peers {
            let Some(address) = self.available.pop_front() else { break };
            tracing::trace!("starting worker for {}", address);
            let worker = PeerWorker::new(
                address,
                self.ctx.clone(),
                self.queue.clone(),
                self.worker_tx.clone(),
                self.cancel.clone(),
            );
            self.workers.insert(address, worker.spawn());
        }
    }

    fn write_piece(&mut self, res: PieceResult) {
        if self.written.has_piece(res.idx) {
            tracing::warn!("piece {} already written, discarding", res.idx);
            return;
        }

        let start = res.idx * self.piece_len;
        let end = start + res.data.len();
        if res.idx >= self.num_pieces || end > self.buf.len() {
            tracing::warn!("piece {} out of range, discarding", res.idx);
            return;
        }

        self.buf[start..end].copy_from_slice(&res.data);
        self.written.set_piece(res.idx);
        self.completed += 1;

        let percent = self.completed as f64 / self.num_pieces as f64 * 100.0;
        tracing::info!(
            "piece {} written, {:.2}% complete, {} active peers",
            res.idx, percent, self.workers.len(),
        );
    }

    // Stop every remaining worker and wait for them to exit.
    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.queue.close().await;
        tracing::debug!("stopping {} workers", self.workers.len());
        let handles = self.workers.drain().map(|(_, handle)| handle);
        for res in futures::future::join_all(handles).await {
            if let Err(e) = res {
                tracing::error!("peer task failed: {}", e);
            }
        }
    }
}
