#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ConnState {
    #[default]
    Connecting,
    Handshaking,
    AwaitingBitfield,
    // Introduced, not yet told the peer we are interested.
    Idle,
    Interested,
    Downloading,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionState {

    pub conn_state: ConnState,

    // Whether we are interested in the peer's pieces.
    pub interested: bool,

    // Whether the peer is answering our requests.
    pub peer_choking: bool,

    // Requests sent for the current piece and not yet answered.
    pub backlog: usize,

    // Pieces from this peer that failed verification.
    pub hash_failures: usize,

    // Chokes mid-piece since the last verified piece.
    pub chokes: usize,

}

impl Default for SessionState {
    fn default() -> SessionState {
        SessionState {
            conn_state: ConnState::default(),
            interested: false,
            peer_choking: true,
            backlog: 0,
            hash_failures: 0,
            chokes: 0,
        }
    }
}

impl SessionState {

    #[inline(always)]
    pub fn transition(&mut self, to: ConnState) {
        if self.conn_state != to {
            tracing::trace!("state {:?} -> {:?}", self.conn_state, to);
            self.conn_state = to;
        }
    }
}
