//! # Peer Wire Messages
//!
//! After the handshake, all peer traffic uses length-prefixed frames:
//!
//! ```text
//! <length: u32 big-endian><id: u8><payload: length - 1 bytes>
//! ```
//!
//! A length of zero is a keep-alive and carries neither id nor payload.
//!
//! ## Message Types
//!
//! | ID | Name | Description |
//! |----|------|-------------|
//! | 0 | CHOKE | Peer will not serve requests (no payload) |
//! | 1 | UNCHOKE | Peer will serve requests (no payload) |
//! | 2 | INTERESTED | Client wants to download (no payload) |
//! | 3 | NOT INTERESTED | Client doesn't want to download (no payload) |
//! | 4 | HAVE | Peer obtained a piece (payload: piece index) |
//! | 5 | BITFIELD | Peer's piece availability (payload: bitfield) |
//! | 6 | REQUEST | Request a block (payload: index, begin, length) |
//! | 7 | PIECE | Block data (payload: index, begin, block) |
//! | 8 | CANCEL | Cancel a request (payload: index, begin, length) |
//!
//! This client only ever sends `interested` and `request` and only acts on
//! `unchoke`, `bitfield` and `piece`; the remaining ids are kept for frame
//! identification in logs and errors.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

pub type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;

// Upper bound on a frame we are willing to buffer. Piece frames top out at
// 16 KiB of block data plus headers; bitfields stay far below this even for
// very large torrents.
const MAX_FRAME_LEN: u32 = 1 << 20;

/// One peer wire message.
#[derive(Debug, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Message payload data
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a payload-less message.
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a message with a payload.
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Self {
        Message { id, payload }
    }

    /// Build a `request` message for one block.
    ///
    /// # Arguments
    ///
    /// * `index` - Zero-based piece index.
    /// * `begin` - Byte offset of the block within the piece.
    /// * `length` - Number of block bytes requested.
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
        Message::new_with_payload(MESSAGE_REQUEST, payload)
    }

    /// Serialize into a length-prefixed frame.
    pub fn serialize(&self) -> Vec<u8> {
        let frame_len = self.payload.len() as u32 + 1;
        let mut buf = Vec::with_capacity(4 + frame_len as usize);
        buf.extend_from_slice(&frame_len.to_be_bytes());
        buf.push(self.id);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Read one frame from `reader`.
    ///
    /// Returns `Ok(None)` for a keep-alive. An `UnexpectedEof` error means
    /// the peer hung up between frames.
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Option<Message>> {
        let frame_len = reader.read_u32::<BigEndian>()?;
        if frame_len == 0 {
            return Ok(None);
        }
        if frame_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("oversized frame of {} bytes", frame_len),
            ));
        }

        let id = reader.read_u8()?;
        let mut payload = vec![0; frame_len as usize - 1];
        reader.read_exact(&mut payload)?;

        Ok(Some(Message { id, payload }))
    }
}

/// Decoded payload of a `piece` message.
pub struct PiecePayload<'a> {
    /// Zero-based piece index echoed by the peer
    pub index: u32,
    /// Byte offset of the block within the piece
    pub begin: u32,
    /// The block bytes themselves
    pub block: &'a [u8],
}

/// Split a `piece` payload into its header fields and block bytes.
///
/// Returns `None` when the payload is too short to hold the header.
pub fn parse_piece_payload(payload: &[u8]) -> Option<PiecePayload<'_>> {
    if payload.len() < 8 {
        return None;
    }

    let mut cursor = Cursor::new(&payload[..8]);
    let index = cursor.read_u32::<BigEndian>().ok()?;
    let begin = cursor.read_u32::<BigEndian>().ok()?;

    Some(PiecePayload {
        index,
        begin,
        block: &payload[8..],
    })
}
