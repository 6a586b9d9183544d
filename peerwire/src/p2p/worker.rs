use std::{net::SocketAddr, sync::Arc};
use tokio::{io::{AsyncRead, AsyncWrite}, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use crate::{
    piece::{PieceResult, PieceWork},
    queue::PieceWorkQueue,
    torrent::TorrentContext,
};
use super::{PeerError, PeerSession, Result};

pub type WorkerTx = mpsc::UnboundedSender<WorkerEvent>;
pub type WorkerRx = mpsc::UnboundedReceiver<WorkerEvent>;

// Events sent from workers to the orchestrator.
#[derive(Debug)]
pub enum WorkerEvent {

    // A piece that passed verification.
    Piece(PieceResult),

    // Worker has finished, error is None if it ran out of work.
    Exited { address: SocketAddr, error: Option<PeerError> },

}

// Drives a single peer session, pulling work from the shared queue.
pub struct PeerWorker {

    address: SocketAddr,

    torrent_ctx: Arc<TorrentContext>,

    queue: Arc<PieceWorkQueue>,

    worker_tx: WorkerTx,

    // Cancelled once every piece has been written.
    cancel: CancellationToken,

}

impl PeerWorker {

    pub fn new(
        address: SocketAddr,
        torrent_ctx: Arc<TorrentContext>,
        queue: Arc<PieceWorkQueue>,
        worker_tx: WorkerTx,
        cancel: CancellationToken,
    ) -> Self {
        Self { address, torrent_ctx, queue, worker_tx, cancel }
    }

    // Runs the worker in its own task. Exited is always sent, even if the task panics.
    pub fn spawn(self) -> JoinHandle<()> {
        let address = self.address;
        let worker_tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let error = match tokio::spawn(self.run()).await {
                Ok(error) => error,
                Err(e) => {
                    tracing::error!("peer task {} failed: {}", address, e);
                    Some(PeerError::TaskFailed(e.to_string()))
                },
            };
            worker_tx.send(WorkerEvent::Exited { address, error }).ok();
        })
    }

    #[tracing::instrument(name = "peer", skip_all, fields(address = %self.address))]
    pub async fn run(self) -> Option<PeerError> {
        match self.connect_and_work().await {
            Ok(()) => {
                tracing::info!("no work left for peer");
                None
            },
            Err(PeerError::Cancelled) => {
                tracing::debug!("worker cancelled");
                Some(PeerError::Cancelled)
            },
            Err(e) => {
                tracing::warn!("session closed: {}", e);
                Some(e)
            },
        }
    }

    async fn connect_and_work(&self) -> Result<()> {
        let mut session = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PeerError::Cancelled),
            session = PeerSession::connect(self.address, self.torrent_ctx.clone()) => session?,
        };
        let res = self.work(&mut session).await;
        if res.is_err() {
            session.close();
        }
        res
    }

    // Downloads pieces until the queue has nothing this peer can supply.
    // Work in progress is returned to the queue on every failure.
    pub async fn work<S>(&self, session: &mut PeerSession<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let max_hash_failures = self.torrent_ctx.config.max_hash_failures;
        let max_chokes = self.torrent_ctx.config.max_chokes;

        loop {

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PeerError::Cancelled),
                res = session.wait_unchoked() => res?,
            }

            let work = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PeerError::Cancelled),
                work = self.queue.take_next(session.bitfield()) => match work {
                    Some(work) => work,
                    None => return Ok(()),
                },
            };
            tracing::debug!("assigned piece {}", work.idx);
            let mut assigned = Assigned::new(self.queue.clone(), work);

            let res = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(PeerError::Cancelled),
                res = session.download_piece(assigned.work()) => res,
            };

            let work = assigned.release();
            match res {
                Ok(data) => {
                    // Result is reported before the queue can wake other workers.
                    self.worker_tx.send(WorkerEvent::Piece(PieceResult { idx: work.idx, data })).ok();
                    self.queue.complete(&work).await;
                },
                Err(e) if e.is_recoverable() => {
                    self.queue.requeue(work).await;
                    let out_of_strikes = match e {
                        PeerError::HashMismatch { .. } => session.state().hash_failures >= max_hash_failures,
                        PeerError::Choked(_) => session.state().chokes >= max_chokes,
                        _ => false,
                    };
                    if out_of_strikes {
                        return Err(e);
                    }
                    tracing::warn!("{}", e);
                },
                Err(e) => {
                    self.queue.requeue(work).await;
                    return Err(e);
                },
            }
        }
    }
}

// A piece handed to this worker. Returned to the queue if the worker
// unwinds before releasing it.
struct Assigned {
    queue: Arc<PieceWorkQueue>,
    work: Option<PieceWork>,
}

impl Assigned {

    fn new(queue: Arc<PieceWorkQueue>, work: PieceWork) -> Self {
        Self { queue, work: Some(work) }
    }

    fn work(&self) -> &PieceWork {
        match &self.work {
            Some(work) => work,
            None => unreachable!("piece already released"),
        }
    }

    fn release(mut self) -> PieceWork {
        match self.work.take() {
            Some(work) => work,
            None => unreachable!("piece already released"),
        }
    }
}

impl Drop for Assigned {
    fn drop(&mut self) {
        let Some(work) = self.work.take() else { return };
        tracing::warn!("worker dropped piece {}, requeueing", work.idx);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let queue = self.queue.clone();
            handle.spawn(async move { queue.requeue(work).await });
        }
    }
}
