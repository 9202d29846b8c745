//! A scripted peer for loopback tests.
//!
//! Speaks just enough of the wire protocol to serve pieces of an in-memory
//! file: it answers the handshake, sends a bitfield, waits for `interested`,
//! unchokes, and then serves block requests until the client hangs up.

use crate::handshake::{Handshake, HANDSHAKE_LEN};
use crate::message::{
    Message, MESSAGE_BITFIELD, MESSAGE_INTERESTED, MESSAGE_PIECE, MESSAGE_REQUEST, MESSAGE_UNCHOKE,
};
use crate::peer::Peer;

use std::io::{self, Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use byteorder::{BigEndian, ReadBytesExt};

/// How a scripted peer behaves when serving blocks.
#[derive(Clone, Copy)]
pub enum Behavior {
    /// Serve correct data.
    Honest,
    /// Flip the first byte of every block so piece hashes never match.
    Corrupt,
    /// Answer with an off-by-one `begin` field in the piece header.
    SkewedOffset,
}

/// Start a peer serving `file` on a loopback listener.
///
/// The listener accepts connections until the test ends; each connection is
/// served to completion before the next is accepted.
pub fn spawn_peer(file: Vec<u8>, piece_length: usize, info_hash: [u8; 20], behavior: Behavior) -> Peer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");

    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { return };
            let _ = serve(conn, &file, piece_length, info_hash, behavior);
        }
    });

    Peer {
        ip: std::net::Ipv4Addr::LOCALHOST,
        port: addr.port(),
    }
}

fn serve(
    mut conn: TcpStream,
    file: &[u8],
    piece_length: usize,
    info_hash: [u8; 20],
    behavior: Behavior,
) -> io::Result<()> {
    // Read the client's handshake, reply with our own.
    let mut buf = [0u8; HANDSHAKE_LEN];
    conn.read_exact(&mut buf)?;
    let reply = Handshake::new(info_hash, *b"-RM0001-seeder000000");
    conn.write_all(&reply.serialize())?;

    // A keep-alive first, which the client must skip, then the bitfield;
    // wait for interested and unchoke.
    conn.write_all(&[0, 0, 0, 0])?;
    conn.write_all(&Message::new_with_payload(MESSAGE_BITFIELD, vec![0xff]).serialize())?;
    loop {
        match Message::read(&mut conn)? {
            Some(message) if message.id == MESSAGE_INTERESTED => break,
            _ => continue,
        }
    }
    conn.write_all(&Message::new(MESSAGE_UNCHOKE).serialize())?;

    // Serve block requests until the client closes the connection.
    loop {
        let Some(request) = Message::read(&mut conn)? else {
            continue;
        };
        if request.id != MESSAGE_REQUEST {
            return Ok(());
        }

        let mut cursor = Cursor::new(&request.payload);
        let index = cursor.read_u32::<BigEndian>()?;
        let begin = cursor.read_u32::<BigEndian>()?;
        let length = cursor.read_u32::<BigEndian>()?;

        let start = index as usize * piece_length + begin as usize;
        let mut block = file[start..start + length as usize].to_vec();

        let mut header_begin = begin;
        match behavior {
            Behavior::Honest => {}
            Behavior::Corrupt => block[0] ^= 0xff,
            Behavior::SkewedOffset => header_begin = begin.wrapping_add(1),
        }

        let mut payload = Vec::with_capacity(8 + block.len());
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&header_begin.to_be_bytes());
        payload.extend_from_slice(&block);
        conn.write_all(&Message::new_with_payload(MESSAGE_PIECE, payload).serialize())?;
    }
}
