//! Command-line entry point.
//!
//! Each subcommand maps to one stage of the download pipeline, which makes
//! the stages testable against real swarms in isolation: decode bencode,
//! inspect a torrent, list peers, handshake with one peer, fetch one piece,
//! or download the whole file.

use std::fs;
use std::net::SocketAddrV4;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use remora::bencode;
use remora::client::Client;
use remora::magnet::Magnet;
use remora::peer::Peer;
use remora::torrent::Torrent;
use remora::tracker;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A command-line BitTorrent client, written in Rust."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Command {
    /// Print a bencoded value as JSON
    Decode {
        /// The bencoded value
        value: String,
    },
    /// Print the metadata of a torrent file
    Info {
        /// Path to the .torrent file
        file: PathBuf,
    },
    /// Print the peers returned by the tracker
    Peers {
        /// Path to the .torrent file
        file: PathBuf,
    },
    /// Handshake with one peer and print its id
    Handshake {
        /// Path to the .torrent file
        file: PathBuf,
        /// Peer address as ip:port
        peer: String,
    },
    /// Download and verify a single piece
    DownloadPiece {
        /// Output filename for the piece
        #[arg(short)]
        output: PathBuf,
        /// Path to the .torrent file
        file: PathBuf,
        /// Zero-based piece index
        piece: u32,
    },
    /// Download the whole file
    Download {
        /// Output filename
        #[arg(short)]
        output: PathBuf,
        /// Path to the .torrent file
        file: PathBuf,
    },
    /// Print the tracker and info hash of a magnet link
    MagnetParse {
        /// The magnet link
        magnet: String,
    },
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Decode { value } => {
            let (decoded, _) = bencode::decode_prefix(value.as_bytes())?;
            println!("{}", decoded.to_json());
        }
        Command::Info { file } => {
            let torrent = Torrent::open(&file)?;
            println!("Tracker URL: {}", torrent.announce());
            println!("Length: {}", torrent.total_length());
            println!("Info Hash: {}", hex::encode(torrent.info_hash()));
            println!("Piece Length: {}", torrent.piece_length());
            println!("Piece Hashes:");
            for hash in torrent.piece_hashes() {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { file } => {
            let torrent = Torrent::open(&file)?;
            let response = tracker::announce(&torrent)?;
            for peer in response.peers {
                println!("{}", peer);
            }
        }
        Command::Handshake { file, peer } => {
            let torrent = Torrent::open(&file)?;
            let addr: SocketAddrV4 = peer
                .parse()
                .with_context(|| format!("invalid peer address {:?}", peer))?;

            let mut client = Client::connect(Peer::from(addr), *torrent.info_hash(), *torrent.peer_id())?;
            let remote_id = client.handshake()?;
            println!("Peer ID: {}", hex::encode(remote_id));
        }
        Command::DownloadPiece {
            output,
            file,
            piece,
        } => {
            let torrent = Torrent::open(&file)?;
            let response = tracker::announce(&torrent)?;
            let data = torrent.download_piece(&response.peers, piece)?;

            fs::write(&output, data)
                .with_context(|| format!("could not write piece to {}", output.display()))?;
            println!("Piece {} downloaded to {}.", piece, output.display());
        }
        Command::Download { output, file } => {
            let torrent = Torrent::open(&file)?;
            let response = tracker::announce(&torrent)?;
            let data = torrent.download(&response.peers)?;

            fs::write(&output, data)
                .with_context(|| format!("could not write download to {}", output.display()))?;
            println!("Downloaded {} to {}.", file.display(), output.display());
        }
        Command::MagnetParse { magnet } => {
            let magnet = Magnet::parse(&magnet)?;
            println!("Tracker URL: {}", magnet.tracker.as_deref().unwrap_or_default());
            println!("Info Hash: {}", hex::encode(magnet.info_hash));
        }
    }

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let cli = Cli::parse();

    // Run the selected command, eventually exit failure
    if let Err(error) = run(cli) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}
