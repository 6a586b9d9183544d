use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use crate::{piece::PieceWork, Bitfield};

// Pieces that still need to be downloaded, shared between all peer workers.
#[derive(Debug)]
pub struct PieceWorkQueue {
    state: Mutex<QueueState>,
    // Woken on every requeue, completion and close.
    changed: Notify,
}

#[derive(Debug, Default)]
struct QueueState {

    pending: VecDeque<PieceWork>,

    // Pieces handed out and not yet completed or requeued.
    in_flight: usize,

    closed: bool,

}

impl PieceWorkQueue {

    pub fn new(pieces: impl IntoIterator<Item = PieceWork>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: pieces.into_iter().collect(),
                ..Default::default()
            }),
            changed: Notify::new(),
        }
    }

    // Takes the first pending piece the peer has.
    // Waits while a piece it could download may still be requeued by another worker.
    // Returns None once the queue is closed or the peer can no longer contribute.
    pub async fn take_next(&self, bitfield: &Bitfield) -> Option<PieceWork> {
        loop {
            // Created before inspecting the state so a concurrent notify is not missed.
            let changed = self.changed.notified();
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                if let Some(pos) = state.pending.iter().position(|w| bitfield.has_piece(w.idx)) {
                    state.in_flight += 1;
                    return state.pending.remove(pos);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }
            changed.await;
        }
    }

    // Return a piece after a failed attempt so another worker can pick it up.
    pub async fn requeue(&self, work: PieceWork) {
        let mut state = self.state.lock().await;
        tracing::trace!("requeue piece {}", work.idx);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.pending.push_back(work);
        drop(state);
        self.changed.notify_waiters();
    }

    pub async fn complete(&self, work: &PieceWork) {
        let mut state = self.state.lock().await;
        tracing::trace!("completed piece {}", work.idx);
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.changed.notify_waiters();
    }

    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.changed.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }
}
