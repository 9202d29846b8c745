//! # Peer Session
//!
//! This module drives the client side of the peer wire protocol for one TCP
//! connection. A session advances through a fixed sequence:
//!
//! ```text
//! connect -> handshake -> bitfield received -> interested sent -> unchoked
//! ```
//!
//! after which it can download pieces. The session is deliberately strict:
//! the peer is expected to open with its bitfield (which is discarded, as
//! this client shares nothing and does no availability tracking), and any
//! message that is not the one the sequence calls for ends the session with
//! [`PeerError::UnexpectedMessage`].
//!
//! ## Piece download
//!
//! Pieces are fetched as 16 KiB blocks, one outstanding request at a time.
//! Sequential requests keep the session trivial to reason about; download
//! parallelism comes from running many sessions, not from pipelining within
//! one. Each `piece` response must echo the index and offset of the request
//! it answers.
//!
//! ## Timeouts
//!
//! The connect, the initial sequence, and each block read run under socket
//! deadlines so a silent peer cannot park a worker forever. The socket is
//! released on every exit path when the session is dropped.

use crate::handshake::{Handshake, HANDSHAKE_LEN};
use crate::message::{
    parse_piece_payload, Message, MessageId, MESSAGE_BITFIELD, MESSAGE_INTERESTED, MESSAGE_PIECE,
    MESSAGE_UNCHOKE,
};
use crate::peer::Peer;
use crate::piece::PieceWork;

use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use thiserror::Error;

// TCP connect deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
// Socket deadline through the handshake and initial message sequence.
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);
// Socket deadline for each block round-trip while downloading.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Block granularity of `request` messages (16 KiB).
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Everything that can end a peer session.
///
/// All variants are scoped to one session; the scheduler reacts by retiring
/// the session and handing its unfinished piece to another worker.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("could not connect to peer: {0}")]
    Connect(#[source] io::Error),
    #[error("peer closed the connection")]
    Disconnected,
    #[error("peer sent a mismatched handshake")]
    HandshakeMismatch,
    #[error("unexpected message id {0} from peer")]
    UnexpectedMessage(u8),
    #[error("piece message does not match the outstanding request")]
    PieceFraming,
    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),
    #[error("peer i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// A connection to one remote peer.
pub struct Client {
    peer: Peer,
    peer_id: [u8; 20],
    info_hash: [u8; 20],
    conn: TcpStream,
}

impl Client {
    /// Open a TCP connection to `peer`.
    ///
    /// # Arguments
    ///
    /// * `peer` - Address of the remote peer.
    /// * `info_hash` - 20-byte SHA-1 hash of the torrent's info dictionary.
    /// * `peer_id` - 20-byte identifier of this client instance.
    pub fn connect(peer: Peer, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<Client, PeerError> {
        let addr = SocketAddr::new(IpAddr::V4(peer.ip), peer.port);
        let conn =
            TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(PeerError::Connect)?;

        debug!("connected to peer {}", peer);

        let client = Client {
            peer,
            peer_id,
            info_hash,
            conn,
        };
        client.set_io_timeout(SETUP_TIMEOUT)?;

        Ok(client)
    }

    /// Exchange 68-byte handshakes and return the remote peer's id.
    ///
    /// The response must carry the standard protocol header and our
    /// info-hash; anything else is [`PeerError::HandshakeMismatch`].
    pub fn handshake(&mut self) -> Result<[u8; 20], PeerError> {
        let handshake = Handshake::new(self.info_hash, self.peer_id);
        self.conn.write_all(&handshake.serialize())?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        self.read_exact(&mut buf)?;

        let remote = Handshake::parse(&buf).ok_or(PeerError::HandshakeMismatch)?;
        if remote.info_hash != self.info_hash {
            return Err(PeerError::HandshakeMismatch);
        }

        debug!("handshake complete with peer {}", self.peer);

        Ok(remote.peer_id)
    }

    /// Advance through the initial message sequence.
    ///
    /// The peer's bitfield is read and discarded, `interested` is sent, and
    /// `unchoke` awaited. Afterwards the session is ready to download.
    pub fn establish(&mut self) -> Result<(), PeerError> {
        self.expect_message(MESSAGE_BITFIELD)?;
        self.send_message(&Message::new(MESSAGE_INTERESTED))?;
        self.expect_message(MESSAGE_UNCHOKE)?;

        info!("peer {} unchoked us", self.peer);

        Ok(())
    }

    /// Download one piece and return its assembled bytes.
    ///
    /// Blocks are requested in order with one request outstanding. Every
    /// `piece` response must match the request's index, offset and length,
    /// otherwise the transfer is aborted with [`PeerError::PieceFraming`].
    /// Hash verification is the caller's step.
    pub fn download_piece(&mut self, work: &PieceWork) -> Result<Vec<u8>, PeerError> {
        self.set_io_timeout(DOWNLOAD_TIMEOUT)?;

        let mut data = vec![0u8; work.length as usize];
        let mut begin: u32 = 0;

        while begin < work.length {
            let block_len = BLOCK_SIZE.min(work.length - begin);
            self.send_message(&Message::request(work.index, begin, block_len))?;

            let message = self.expect_message(MESSAGE_PIECE)?;
            let block = parse_piece_payload(&message.payload).ok_or(PeerError::PieceFraming)?;
            if block.index != work.index
                || block.begin != begin
                || block.block.len() as u32 != block_len
            {
                return Err(PeerError::PieceFraming);
            }

            data[begin as usize..(begin + block_len) as usize].copy_from_slice(block.block);

            debug!(
                "piece {} [{}:{}] from peer {}",
                work.index,
                begin,
                begin + block_len,
                self.peer
            );

            begin += block_len;
        }

        Ok(data)
    }

    fn set_io_timeout(&self, timeout: Duration) -> Result<(), PeerError> {
        self.conn.set_read_timeout(Some(timeout))?;
        self.conn.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.conn.write_all(&message.serialize())?;
        Ok(())
    }

    /// Read the next frame, skipping keep-alives.
    fn read_message(&mut self) -> Result<Message, PeerError> {
        loop {
            match Message::read(&mut self.conn) {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => debug!("keep-alive from peer {}", self.peer),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(PeerError::Disconnected)
                }
                Err(e) => return Err(PeerError::Io(e)),
            }
        }
    }

    /// Read the next frame and require it to carry the given id.
    fn expect_message(&mut self, id: MessageId) -> Result<Message, PeerError> {
        let message = self.read_message()?;
        if message.id != id {
            return Err(PeerError::UnexpectedMessage(message.id));
        }
        Ok(message)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), PeerError> {
        self.conn.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => PeerError::Disconnected,
            _ => PeerError::Io(e),
        })
    }
}
