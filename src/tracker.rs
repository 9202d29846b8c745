//! # Tracker Client
//!
//! The tracker is asked exactly once per run. The announce is a plain HTTP
//! GET on the torrent's `announce` URL whose query carries the info-hash,
//! our peer id, and transfer counters. With `compact=1` the tracker answers
//! with a bencoded dictionary holding:
//!
//! - `interval`: suggested seconds between announces. This client never
//!   re-announces, so the value is logged and otherwise ignored.
//! - `peers`: a binary blob of 6-byte entries, 4 bytes IPv4 and 2 bytes
//!   big-endian port per peer.
//!
//! The info-hash and peer id are raw bytes and must survive URL encoding
//! untouched, so the query string is assembled by hand with every byte
//! percent-encoded.

use crate::bencode::{self, Value};
use crate::peer::Peer;
use crate::torrent::Torrent;

use std::io::Cursor;
use std::net::Ipv4Addr;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;
use url::Url;

// Port advertised to the tracker. Nothing listens on it; this client only
// leeches over outgoing connections.
const PORT: u16 = 6881;
// Announce request deadline.
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);
// Bytes per peer in the compact encoding.
const PEER_SIZE: usize = 6;

/// Announce failures. All of them are fatal for the current run.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("could not parse tracker url: {0}")]
    Url(#[from] url::ParseError),
    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tracker returned HTTP status {0}")]
    Status(u16),
    #[error("malformed tracker response: {0}")]
    Protocol(String),
}

/// A decoded announce response.
pub struct TrackerResponse {
    /// Suggested seconds between announces
    pub interval: i64,
    /// Peers currently in the swarm
    pub peers: Vec<Peer>,
}

/// Announce once and return the tracker's peer list.
pub fn announce(torrent: &Torrent) -> Result<TrackerResponse, TrackerError> {
    let url = build_announce_url(
        torrent.announce(),
        torrent.info_hash(),
        torrent.peer_id(),
        PORT,
        torrent.total_length(),
    )?;

    debug!("announcing to {}", torrent.announce());

    let client = reqwest::blocking::Client::builder()
        .timeout(ANNOUNCE_TIMEOUT)
        .build()?;
    let response = client.get(&url).send()?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(TrackerError::Status(status));
    }

    let body = response.bytes()?;
    let response = parse_response(&body)?;

    debug!(
        "tracker returned {} peers, suggested interval {}s",
        response.peers.len(),
        response.interval
    );

    Ok(response)
}

/// Build the announce URL with the raw binary parameters percent-encoded.
///
/// # Arguments
///
/// * `announce` - The tracker URL from the metainfo.
/// * `info_hash` - The 20-byte SHA-1 hash of the info dictionary.
/// * `peer_id` - The 20-byte id of this client instance.
/// * `port` - Port number reported to the tracker.
/// * `left` - Bytes left to download, the full file size for a fresh run.
fn build_announce_url(
    announce: &str,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    left: u64,
) -> Result<String, TrackerError> {
    /// Each byte is encoded as %XX where XX is the hexadecimal representation
    fn percent_encode_binary(data: &[u8]) -> String {
        const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
        let mut encoded = String::with_capacity(data.len() * 3);

        for &byte in data {
            encoded.push('%');
            encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            encoded.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
        }

        encoded
    }

    // Validate the announce URL before bolting the query on
    let base_url = Url::parse(announce)?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        percent_encode_binary(info_hash),
        percent_encode_binary(peer_id),
        port,
        left
    );

    let mut url = base_url.to_string();
    if url.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(&query);

    Ok(url)
}

fn parse_response(body: &[u8]) -> Result<TrackerResponse, TrackerError> {
    let value = bencode::decode(body).map_err(|e| TrackerError::Protocol(e.to_string()))?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::Protocol("response is not a dictionary".into()))?;

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(Value::as_integer)
        .ok_or_else(|| TrackerError::Protocol("missing interval".into()))?;

    let peers = dict
        .get(b"peers".as_slice())
        .and_then(Value::as_bytes)
        .ok_or_else(|| TrackerError::Protocol("missing peers".into()))?;

    Ok(TrackerResponse {
        interval,
        peers: parse_compact_peers(peers)?,
    })
}

/// Split the compact peer blob into addresses.
fn parse_compact_peers(blob: &[u8]) -> Result<Vec<Peer>, TrackerError> {
    if !blob.len().is_multiple_of(PEER_SIZE) {
        return Err(TrackerError::Protocol(format!(
            "peer list length {} is not a multiple of {}",
            blob.len(),
            PEER_SIZE
        )));
    }

    let mut peers = Vec::with_capacity(blob.len() / PEER_SIZE);
    for entry in blob.chunks_exact(PEER_SIZE) {
        let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
        let mut cursor = Cursor::new(&entry[4..6]);
        let port = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| TrackerError::Protocol(e.to_string()))?;
        peers.push(Peer { ip, port });
    }

    Ok(peers)
}
