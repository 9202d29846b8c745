//! # Torrent Metainfo and Download Coordination
//!
//! This module owns the two ends of a download: parsing the metainfo file
//! into an immutable [`Torrent`], and fanning piece downloads out across
//! peer sessions.
//!
//! ## Metainfo
//!
//! A torrent file is a bencoded dictionary:
//!
//! - **announce**: tracker URL for peer discovery
//! - **info**: dictionary with file information and piece hashes
//!   - **name**: suggested filename
//!   - **length**: total file size (single-file torrents only)
//!   - **piece length**: bytes per piece, the last piece may be shorter
//!   - **pieces**: concatenated 20-byte SHA-1 hashes, one per piece
//!
//! The info-hash identifying the swarm is the SHA-1 of the `info` value's
//! raw bytes exactly as stored in the file. The loader locates that byte
//! span with the offset-reporting bencode decoder and hashes it directly,
//! so no re-encoding step can disturb the digest.
//!
//! ## Download coordination
//!
//! The scheduler is a fan-out over channels:
//!
//! 1. A bounded work queue is pre-filled with every piece.
//! 2. One worker thread is spawned per peer; each drains the queue.
//! 3. Verified pieces come back over an event channel and are copied into
//!    the output buffer at `index * piece_length`. Arrival order does not
//!    matter, placement is by index.
//! 4. A failed worker reports the piece it was holding; the scheduler puts
//!    it back on the queue for another worker, bounded by a retry counter.
//! 5. When the last piece lands, the scheduler drops its queue sender; the
//!    queue closes and idle workers drain out and exit.
//!
//! If every worker dies while pieces are still missing, the event channel
//! closes and the download fails instead of waiting forever.

use crate::bencode::{self, Value};
use crate::client::{Client, PeerError};
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::worker::{Worker, WorkerEvent};

use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{anyhow, Result};
use boring::sha::Sha1;
use crossbeam_channel::{bounded, unbounded};
use indicatif::{ProgressBar, ProgressStyle};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

// Size of SHA-1 hash in bytes
const SHA1_HASH_SIZE: usize = 20;
// Times a piece may be re-enqueued after worker failures before giving up
const MAX_PIECE_RETRIES: u32 = 5;

/// Failures while loading or validating a metainfo file.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("could not read torrent file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid bencode in torrent file: {0}")]
    Bencode(#[from] bencode::BencodeError),
    #[error("malformed metainfo: {0}")]
    Malformed(&'static str),
}

/// Failures of the overall download, beyond any single peer.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download stalled: {remaining} pieces left but no usable peers")]
    Stalled { remaining: usize },
    #[error("piece {index} kept failing, giving up")]
    PieceRetriesExhausted { index: u32 },
}

/// Immutable metadata of a single-file torrent, plus this run's peer id.
pub struct Torrent {
    /// Tracker URL for peer discovery
    announce: String,
    /// Suggested filename from the torrent metadata
    name: String,
    /// 20-byte SHA-1 hash of the raw info dictionary bytes
    info_hash: [u8; 20],
    /// One 20-byte SHA-1 hash per piece
    piece_hashes: Vec<[u8; 20]>,
    /// Size of each piece in bytes (except possibly the last)
    piece_length: u32,
    /// Total size of the file in bytes
    total_length: u64,
    /// 20-byte identifier for this client instance, fresh per run
    peer_id: [u8; 20],
}

impl Torrent {
    /// Load and validate a torrent file.
    pub fn open(path: &Path) -> Result<Torrent, MetainfoError> {
        let buf = fs::read(path)?;
        Torrent::from_bytes(&buf)
    }

    /// Parse metainfo from raw file bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Torrent, MetainfoError> {
        let value = bencode::decode(buf)?;
        let root = value
            .as_dict()
            .ok_or(MetainfoError::Malformed("top-level value is not a dictionary"))?;

        let announce = root
            .get(b"announce".as_slice())
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::Malformed("missing announce URL"))?;
        let announce = String::from_utf8(announce.to_vec())
            .map_err(|_| MetainfoError::Malformed("announce URL is not valid UTF-8"))?;

        let info = root
            .get(b"info".as_slice())
            .and_then(Value::as_dict)
            .ok_or(MetainfoError::Malformed("missing info dictionary"))?;

        let name = info
            .get(b"name".as_slice())
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::Malformed("missing name"))?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| MetainfoError::Malformed("name is not valid UTF-8"))?;

        let total_length = info
            .get(b"length".as_slice())
            .and_then(Value::as_integer)
            .ok_or(MetainfoError::Malformed("missing length"))?;
        if total_length <= 0 {
            return Err(MetainfoError::Malformed("length must be positive"));
        }
        let total_length = total_length as u64;

        let piece_length = info
            .get(b"piece length".as_slice())
            .and_then(Value::as_integer)
            .ok_or(MetainfoError::Malformed("missing piece length"))?;
        if !(1..=u32::MAX as i64).contains(&piece_length) {
            return Err(MetainfoError::Malformed("piece length out of range"));
        }
        let piece_length = piece_length as u32;

        let pieces = info
            .get(b"pieces".as_slice())
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::Malformed("missing piece hashes"))?;
        if !pieces.len().is_multiple_of(SHA1_HASH_SIZE) {
            return Err(MetainfoError::Malformed(
                "piece hash blob length is not a multiple of 20",
            ));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(SHA1_HASH_SIZE)
            .map(|chunk| {
                let mut hash = [0u8; SHA1_HASH_SIZE];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        // Every byte of the file must be covered by exactly one hash
        if piece_hashes.len() as u64 != total_length.div_ceil(piece_length as u64) {
            return Err(MetainfoError::Malformed(
                "piece hash count does not match file length",
            ));
        }

        Ok(Torrent {
            announce,
            name,
            info_hash: info_hash_from_span(buf)?,
            piece_hashes,
            piece_length,
            total_length,
            peer_id: generate_peer_id(),
        })
    }

    pub fn announce(&self) -> &str {
        &self.announce
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info_hash(&self) -> &[u8; 20] {
        &self.info_hash
    }

    pub fn peer_id(&self) -> &[u8; 20] {
        &self.peer_id
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.piece_hashes
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Actual length of one piece, shorter for the final one.
    pub fn piece_len(&self, index: u32) -> u32 {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.total_length);
        (end - begin) as u32
    }

    fn piece_work(&self, index: u32) -> PieceWork {
        PieceWork::new(index, self.piece_hashes[index as usize], self.piece_len(index))
    }

    /// Download the whole file from the given peers.
    ///
    /// Spawns one worker per peer and reassembles verified pieces into a
    /// buffer of `total_length` bytes, in index order regardless of arrival
    /// order.
    pub fn download(&self, peers: &[Peer]) -> Result<Vec<u8>> {
        let piece_count = self.piece_count();

        info!(
            "downloading {:?} ({} pieces) from {} peers",
            self.name,
            piece_count,
            peers.len()
        );

        // Work queue, pre-filled with every piece. The scheduler keeps the
        // only long-lived sender so orphaned pieces can be re-enqueued;
        // dropping it after the last result closes the queue.
        let (work_tx, work_rx) = bounded::<PieceWork>(piece_count);
        for index in 0..piece_count {
            if work_tx.send(self.piece_work(index as u32)).is_err() {
                return Err(anyhow!("work queue closed unexpectedly"));
            }
        }

        let (event_tx, event_rx) = unbounded::<WorkerEvent>();

        for &peer in peers {
            let worker = Worker::new(
                peer,
                self.peer_id,
                self.info_hash,
                work_rx.clone(),
                event_tx.clone(),
            );
            thread::spawn(move || worker.run());
        }

        // Workers own the remaining event senders, so the event channel
        // closing means no worker is left alive.
        drop(event_tx);
        drop(work_rx);

        let pb = ProgressBar::new(self.total_length);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")?
                .progress_chars("#>-"),
        );

        let mut data = vec![0u8; self.total_length as usize];
        let mut retries = vec![0u32; piece_count];
        let mut remaining = piece_count;

        while remaining > 0 {
            let event = match event_rx.recv() {
                Ok(event) => event,
                Err(_) => return Err(DownloadError::Stalled { remaining }.into()),
            };

            match event {
                WorkerEvent::Piece(piece) => {
                    place_piece(&mut data, self.piece_length, &piece);
                    pb.inc(piece.data.len() as u64);
                    remaining -= 1;
                }
                WorkerEvent::Failed {
                    work: Some(work),
                    error,
                } => {
                    warn!("piece {} goes back to the queue: {}", work.index, error);
                    let index = work.index;
                    retries[index as usize] += 1;
                    if retries[index as usize] > MAX_PIECE_RETRIES {
                        return Err(DownloadError::PieceRetriesExhausted { index }.into());
                    }
                    if work_tx.send(work).is_err() {
                        // No receiver left means no worker left
                        return Err(DownloadError::Stalled { remaining }.into());
                    }
                }
                WorkerEvent::Failed { work: None, error } => {
                    debug!("a peer session ended before taking work: {}", error);
                }
            }
        }

        pb.finish_and_clear();

        // Close the queue so idle workers drain out and exit
        drop(work_tx);

        Ok(data)
    }

    /// Download a single piece through one randomly chosen peer.
    pub fn download_piece(&self, peers: &[Peer], index: u32) -> Result<Vec<u8>> {
        if index as usize >= self.piece_count() {
            return Err(anyhow!(
                "piece {} is out of range, torrent has {} pieces",
                index,
                self.piece_count()
            ));
        }

        let peer = peers
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| anyhow!("tracker returned no peers"))?;

        let mut client = Client::connect(*peer, self.info_hash, self.peer_id)?;
        client.handshake()?;
        client.establish()?;

        let work = self.piece_work(index);
        let data = client.download_piece(&work)?;
        if !work.verify(&data) {
            return Err(PeerError::HashMismatch(index).into());
        }

        Ok(data)
    }
}

/// Copy a completed piece into the output buffer at its index offset.
fn place_piece(data: &mut [u8], piece_length: u32, piece: &PieceResult) {
    let begin = piece.index as u64 * piece_length as u64;
    data[begin as usize..begin as usize + piece.data.len()].copy_from_slice(&piece.data);
}

/// SHA-1 of the raw `info` value bytes exactly as stored in the file.
fn info_hash_from_span(buf: &[u8]) -> Result<[u8; 20], MetainfoError> {
    let (start, end) = info_span(buf)?;
    let mut hasher = Sha1::new();
    hasher.update(&buf[start..end]);
    Ok(hasher.finish())
}

/// Locate the byte range of the `info` value within a metainfo file.
fn info_span(buf: &[u8]) -> Result<(usize, usize), MetainfoError> {
    if buf.first() != Some(&b'd') {
        return Err(MetainfoError::Malformed("top-level value is not a dictionary"));
    }

    let mut pos = 1;
    while buf.get(pos) != Some(&b'e') {
        let (key, value_start) = bencode::decode_at(buf, pos)?;
        let key = key
            .as_bytes()
            .ok_or(MetainfoError::Malformed("dictionary key is not a string"))?
            .to_vec();
        let (_, value_end) = bencode::decode_at(buf, value_start)?;

        if key == b"info" {
            return Ok((value_start, value_end));
        }
        pos = value_end;
    }

    Err(MetainfoError::Malformed("missing info dictionary"))
}

/// Generate a fresh 20-byte alphanumeric peer id.
fn generate_peer_id() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    let mut peer_id = [0u8; 20];
    for byte in peer_id.iter_mut() {
        *byte = rng.sample(Alphanumeric);
    }
    peer_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testpeer::{self, Behavior};

    use std::collections::BTreeMap;

    /// Bencode a minimal single-file metainfo.
    fn metainfo_bytes(announce: &str, name: &str, length: i64, piece_length: i64, pieces: &[u8]) -> Vec<u8> {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Value::Integer(length));
        info.insert(b"name".to_vec(), Value::Bytes(name.as_bytes().to_vec()));
        info.insert(b"piece length".to_vec(), Value::Integer(piece_length));
        info.insert(b"pieces".to_vec(), Value::Bytes(pieces.to_vec()));

        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            Value::Bytes(announce.as_bytes().to_vec()),
        );
        root.insert(b"info".to_vec(), Value::Dict(info));

        bencode::encode(&Value::Dict(root))
    }

    fn hash_pieces(file: &[u8], piece_length: usize) -> Vec<u8> {
        let mut hashes = Vec::new();
        for piece in file.chunks(piece_length) {
            let mut hasher = Sha1::new();
            hasher.update(piece);
            hashes.extend_from_slice(&hasher.finish());
        }
        hashes
    }

    /// A torrent for an in-memory file, bypassing the tracker.
    fn torrent_for(file: &[u8], piece_length: u32) -> Torrent {
        let pieces = hash_pieces(file, piece_length as usize);
        let buf = metainfo_bytes(
            "http://tracker.test/announce",
            "test.bin",
            file.len() as i64,
            piece_length as i64,
            &pieces,
        );
        Torrent::from_bytes(&buf).unwrap()
    }

    fn patterned_file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn parses_a_valid_metainfo() {
        let pieces = [0x11u8; 40];
        let buf = metainfo_bytes("http://tracker.test/announce", "test.bin", 520, 512, &pieces);
        let torrent = Torrent::from_bytes(&buf).unwrap();

        assert_eq!(torrent.announce(), "http://tracker.test/announce");
        assert_eq!(torrent.name(), "test.bin");
        assert_eq!(torrent.total_length(), 520);
        assert_eq!(torrent.piece_length(), 512);
        assert_eq!(torrent.piece_count(), 2);
        assert_eq!(torrent.piece_hashes()[0], [0x11; 20]);
    }

    #[test]
    fn info_hash_covers_the_raw_info_span() {
        let pieces = [0x11u8; 20];
        let buf = metainfo_bytes("http://tracker.test/announce", "a", 3, 512, &pieces);

        // the span between the "info" key and the final dict terminator
        let key = b"4:info";
        let key_at = buf
            .windows(key.len())
            .position(|window| window == key)
            .unwrap();
        let span = &buf[key_at + key.len()..buf.len() - 1];

        let mut hasher = Sha1::new();
        hasher.update(span);
        assert_eq!(*Torrent::from_bytes(&buf).unwrap().info_hash(), hasher.finish());
    }

    #[test]
    fn info_hash_tracks_every_info_byte() {
        let pieces = [0x11u8; 20];
        let buf = metainfo_bytes("http://tracker.test/announce", "a", 3, 512, &pieces);
        let hash = *Torrent::from_bytes(&buf).unwrap().info_hash();

        let mut changed = metainfo_bytes("http://tracker.test/announce", "b", 3, 512, &pieces);
        assert_eq!(buf.len(), changed.len());
        let changed_hash = *Torrent::from_bytes(&changed).unwrap().info_hash();
        assert_ne!(hash, changed_hash);

        // a change outside the info dictionary leaves the hash alone
        changed = metainfo_bytes("http://other.test/announce", "a", 3, 512, &pieces);
        assert_eq!(*Torrent::from_bytes(&changed).unwrap().info_hash(), hash);
    }

    #[test]
    fn rejects_malformed_metainfo() {
        let pieces = [0u8; 20];

        let no_announce = {
            let mut info = BTreeMap::new();
            info.insert(b"length".to_vec(), Value::Integer(1));
            info.insert(b"name".to_vec(), Value::Bytes(b"a".to_vec()));
            info.insert(b"piece length".to_vec(), Value::Integer(1));
            info.insert(b"pieces".to_vec(), Value::Bytes(pieces.to_vec()));
            let mut root = BTreeMap::new();
            root.insert(b"info".to_vec(), Value::Dict(info));
            bencode::encode(&Value::Dict(root))
        };
        assert!(matches!(
            Torrent::from_bytes(&no_announce),
            Err(MetainfoError::Malformed(_))
        ));

        // hash blob not a multiple of 20
        let ragged = metainfo_bytes("http://t/a", "a", 3, 512, &[0u8; 30]);
        assert!(matches!(
            Torrent::from_bytes(&ragged),
            Err(MetainfoError::Malformed(_))
        ));

        // one hash too many for the file size
        let overhashed = metainfo_bytes("http://t/a", "a", 3, 512, &[0u8; 40]);
        assert!(matches!(
            Torrent::from_bytes(&overhashed),
            Err(MetainfoError::Malformed(_))
        ));

        assert!(matches!(
            Torrent::from_bytes(b"i42e"),
            Err(MetainfoError::Malformed(_))
        ));
        assert!(matches!(
            Torrent::from_bytes(b"d3:fooe"),
            Err(MetainfoError::Bencode(_))
        ));
    }

    #[test]
    fn piece_len_handles_the_short_tail() {
        // evenly divided: four pieces of 262144
        let torrent = torrent_for(&vec![0u8; 1_048_576], 262_144);
        assert_eq!(torrent.piece_count(), 4);
        for index in 0..4 {
            assert_eq!(torrent.piece_len(index), 262_144);
        }

        // one extra byte: a fifth piece of length 1
        let torrent = torrent_for(&vec![0u8; 1_048_577], 262_144);
        assert_eq!(torrent.piece_count(), 5);
        assert_eq!(torrent.piece_len(3), 262_144);
        assert_eq!(torrent.piece_len(4), 1);
    }

    #[test]
    fn peer_ids_are_alphanumeric_and_fresh() {
        let id = generate_peer_id();
        assert!(id.iter().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(id, generate_peer_id());
    }

    #[test]
    fn placement_ignores_arrival_order() {
        let piece_length = 4u32;
        let file = patterned_file(14); // pieces of 4, 4, 4 and 2 bytes
        let results: Vec<PieceResult> = file
            .chunks(piece_length as usize)
            .enumerate()
            .map(|(index, chunk)| PieceResult::new(index as u32, chunk.to_vec()))
            .collect();

        let mut data = vec![0u8; file.len()];
        for index in [2usize, 0, 3, 1] {
            place_piece(&mut data, piece_length, &results[index]);
        }
        assert_eq!(data, file);
    }

    #[test]
    fn downloads_from_two_peers_and_reassembles() {
        let piece_length = 4096u32;
        let file = patterned_file(4 * 4096 + 5);
        let torrent = torrent_for(&file, piece_length);

        let peers = [
            testpeer::spawn_peer(
                file.clone(),
                piece_length as usize,
                *torrent.info_hash(),
                Behavior::Honest,
            ),
            testpeer::spawn_peer(
                file.clone(),
                piece_length as usize,
                *torrent.info_hash(),
                Behavior::Honest,
            ),
        ];

        assert_eq!(torrent.download(&peers).unwrap(), file);
    }

    #[test]
    fn survives_a_corrupt_peer() {
        let piece_length = 2048u32;
        let file = patterned_file(3 * 2048);
        let torrent = torrent_for(&file, piece_length);

        let peers = [
            testpeer::spawn_peer(
                file.clone(),
                piece_length as usize,
                *torrent.info_hash(),
                Behavior::Corrupt,
            ),
            testpeer::spawn_peer(
                file.clone(),
                piece_length as usize,
                *torrent.info_hash(),
                Behavior::Honest,
            ),
        ];

        assert_eq!(torrent.download(&peers).unwrap(), file);
    }

    #[test]
    fn stalls_without_peers() {
        let torrent = torrent_for(&patterned_file(1024), 512);
        let error = torrent.download(&[]).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DownloadError>(),
            Some(DownloadError::Stalled { remaining: 2 })
        ));
    }

    #[test]
    fn stalls_when_every_peer_fails() {
        let piece_length = 1024u32;
        let file = patterned_file(2 * 1024);
        let torrent = torrent_for(&file, piece_length);

        let peers = [testpeer::spawn_peer(
            file,
            piece_length as usize,
            *torrent.info_hash(),
            Behavior::Corrupt,
        )];

        let error = torrent.download(&peers).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DownloadError>(),
            Some(DownloadError::Stalled { .. })
        ));
    }

    #[test]
    fn downloads_one_piece_alone() {
        let piece_length = 4096u32;
        let file = patterned_file(2 * 4096 + 100);
        let torrent = torrent_for(&file, piece_length);

        let peers = [testpeer::spawn_peer(
            file.clone(),
            piece_length as usize,
            *torrent.info_hash(),
            Behavior::Honest,
        )];

        let data = torrent.download_piece(&peers, 2).unwrap();
        assert_eq!(data, &file[2 * 4096..]);

        assert!(torrent.download_piece(&peers, 3).is_err());
    }
}
