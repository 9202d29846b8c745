//! # Download Workers
//!
//! One worker owns one peer session. After connecting and advancing the
//! session to the unchoked state, the worker drains the shared work queue:
//! pull a piece, download it, verify its hash, report the result. A closed
//! and empty queue means the download is complete and the worker exits,
//! releasing its connection.
//!
//! Workers are disposable. The first session error of any kind retires the
//! worker; it reports the piece it was holding (if any) so the scheduler can
//! hand it to a healthier peer. There is no reconnection logic, because a
//! fresh peer costs the same as a repaired one.

use crate::client::{Client, PeerError};
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};

use crossbeam_channel::{Receiver, Sender};

/// What a worker reports back to the scheduler.
pub enum WorkerEvent {
    /// A piece was downloaded and verified.
    Piece(PieceResult),
    /// The session died. Carries the orphaned work, if any was assigned.
    Failed {
        work: Option<PieceWork>,
        error: PeerError,
    },
}

/// Downloads pieces from a single peer.
pub struct Worker {
    /// Address of the remote peer
    peer: Peer,
    /// 20-byte identifier of this client instance
    peer_id: [u8; 20],
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    info_hash: [u8; 20],
    /// Shared queue of pieces still to download
    work: Receiver<PieceWork>,
    /// Results and failure reports back to the scheduler
    events: Sender<WorkerEvent>,
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        work: Receiver<PieceWork>,
        events: Sender<WorkerEvent>,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            work,
            events,
        }
    }

    /// Run the session until the queue is drained or the first error.
    pub fn run(self) {
        let mut client = match self.connect() {
            Ok(client) => client,
            Err(error) => {
                warn!("peer {} unusable: {}", self.peer, error);
                let _ = self.events.send(WorkerEvent::Failed { work: None, error });
                return;
            }
        };

        loop {
            // A closed, empty queue means every piece is accounted for.
            let work = match self.work.recv() {
                Ok(work) => work,
                Err(_) => {
                    debug!("worker for peer {} exiting, no work left", self.peer);
                    return;
                }
            };

            match self.download_piece(&mut client, &work) {
                Ok(data) => {
                    info!("piece {} downloaded from peer {}", work.index, self.peer);
                    let result = PieceResult::new(work.index, data);
                    if self.events.send(WorkerEvent::Piece(result)).is_err() {
                        return;
                    }
                }
                Err(error) => {
                    warn!("peer {} failed piece {}: {}", self.peer, work.index, error);
                    let _ = self.events.send(WorkerEvent::Failed {
                        work: Some(work),
                        error,
                    });
                    return;
                }
            }
        }
    }

    fn connect(&self) -> Result<Client, PeerError> {
        let mut client = Client::connect(self.peer, self.info_hash, self.peer_id)?;
        client.handshake()?;
        client.establish()?;
        Ok(client)
    }

    fn download_piece(&self, client: &mut Client, work: &PieceWork) -> Result<Vec<u8>, PeerError> {
        let data = client.download_piece(work)?;
        if !work.verify(&data) {
            return Err(PeerError::HashMismatch(work.index));
        }
        Ok(data)
    }
}
