//! # Remora BitTorrent Client
//!
//! A command-line BitTorrent client written in Rust.
//!
//! ## Features
//!
//! - Bencode decoding and canonical encoding
//! - Core BitTorrent peer wire protocol (handshake, block requests)
//! - Multi-peer concurrent downloading with piece verification
//! - Compact tracker announces and magnet link parsing
//! - Progress tracking with visual progress bar
//!
//! ## Architecture
//!
//! The client follows a multi-threaded architecture:
//!
//! - **Main thread**: Parses arguments, loads the torrent, coordinates the download
//! - **Worker threads**: Each handles communication with one peer
//! - **Channels**: Coordinate piece work distribution and result collection

#[macro_use]
extern crate log;

pub mod bencode;
pub mod client;
pub mod handshake;
pub mod magnet;
pub mod message;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
pub mod worker;

#[cfg(test)]
pub(crate) mod testpeer;
