//! # BitTorrent Handshake
//!
//! The handshake is the first exchange on a fresh peer connection. Both
//! sides send the same fixed 68-byte message:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte, always 19
//! - **pstr**: the ASCII protocol identifier `"BitTorrent protocol"`
//! - **reserved**: 8 zero bytes (extension bits, unused here)
//! - **info_hash**: 20 bytes identifying the swarm
//! - **peer_id**: 20 bytes identifying the peer
//!
//! The info-hash keeps peers from joining the wrong swarm; a response whose
//! protocol header or info-hash does not match ours is rejected by the
//! session layer.

/// Total size of a serialized handshake.
pub const HANDSHAKE_LEN: usize = 68;

const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";

/// The two variable fields of a handshake message.
pub struct Handshake {
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Build a handshake for the given swarm and local peer id.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake { info_hash, peer_id }
    }

    /// Serialize into the 68-byte wire layout.
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_ID.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_ID);
        // bytes 20..28 stay zero (reserved)
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parse a received handshake.
    ///
    /// Returns `None` when the protocol-string header is not the standard
    /// BitTorrent one. The info-hash comparison is left to the caller.
    pub fn parse(buf: &[u8; HANDSHAKE_LEN]) -> Option<Handshake> {
        if buf[0] as usize != PROTOCOL_ID.len() || &buf[1..20] != PROTOCOL_ID {
            return None;
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Some(Handshake { info_hash, peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_exact_layout() {
        let handshake = Handshake::new([0xab; 20], *b"-RM0001-abcdefghijkl");
        let buf = handshake.serialize();

        assert_eq!(buf.len(), 68);
        assert_eq!(buf[0], 19);
        assert_eq!(&buf[1..20], b"BitTorrent protocol");
        assert_eq!(&buf[20..28], &[0u8; 8]);
        assert_eq!(&buf[28..48], &[0xab; 20]);
        assert_eq!(&buf[48..68], b"-RM0001-abcdefghijkl");
    }

    #[test]
    fn parses_its_own_serialization() {
        let buf = Handshake::new([0x11; 20], [0x22; 20]).serialize();
        let parsed = Handshake::parse(&buf).unwrap();
        assert_eq!(parsed.info_hash, [0x11; 20]);
        assert_eq!(parsed.peer_id, [0x22; 20]);
    }

    #[test]
    fn rejects_foreign_protocol_header() {
        let mut buf = Handshake::new([0x11; 20], [0x22; 20]).serialize();
        buf[1] = b'X';
        assert!(Handshake::parse(&buf).is_none());

        let mut buf = Handshake::new([0x11; 20], [0x22; 20]).serialize();
        buf[0] = 18;
        assert!(Handshake::parse(&buf).is_none());
    }
}
