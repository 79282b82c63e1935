use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::warn;

/// Read granularity for the TCP stream.
pub const READ_CHUNK: usize = 1024;
/// Longest accepted frame; anything larger is discarded whole.
pub const MAX_FRAME_BYTES: usize = 8192;

const MAX_DATAGRAM_BYTES: usize = 2048;

/// Background TCP dial. `TcpStream::connect` blocks on name resolution,
/// so the dial runs on a throwaway thread and the outcome comes back
/// over a channel. Dropping the connector abandons the attempt.
pub struct TcpConnector {
    outcome: Receiver<io::Result<TcpStream>>,
}

impl TcpConnector {
    pub fn spawn(host: String, port: u16) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(dial(&host, port));
        });
        Self { outcome: rx }
    }

    /// Non-blocking check; yields the outcome at most once.
    pub fn poll(&mut self) -> Option<io::Result<TcpStream>> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connect worker vanished",
            ))),
        }
    }
}

fn dial(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))?;
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// What one TCP pump pass produced.
#[derive(Debug, Default)]
pub struct TcpPoll {
    /// Raw bytes read this pass, in arrival order. Framing is the
    /// caller's job; a read may end mid-frame or mid-code-point.
    pub data: Vec<u8>,
    /// Peer performed an orderly shutdown (0-length read).
    pub closed: bool,
}

/// Non-blocking TCP link to the server. Writes are queued and flushed
/// as the socket accepts them; reads drain whatever the kernel has.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    outbound: VecDeque<u8>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            outbound: VecDeque::new(),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn queue_line(&mut self, line: &str) {
        self.outbound.extend(line.as_bytes());
    }

    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    /// Writes queued bytes until the socket pushes back. Returns the
    /// number written this pass; leftovers stay queued.
    pub fn flush(&mut self) -> io::Result<usize> {
        let mut written = 0;
        while !self.outbound.is_empty() {
            let (front, _) = self.outbound.as_slices();
            match self.stream.write(front) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                    written += n;
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }

    /// Drains the socket until it would block.
    pub fn poll(&mut self) -> io::Result<TcpPoll> {
        let mut result = TcpPoll::default();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    result.closed = true;
                    break;
                }
                Ok(n) => result.data.extend_from_slice(&chunk[..n]),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }
}

/// What one UDP pump pass produced.
#[derive(Debug, Default)]
pub struct UdpPoll {
    pub lines: Vec<String>,
    pub bytes_received: usize,
    /// Datagrams from an address other than the server, dropped unread.
    pub rejected: u64,
}

/// Unreliable channel to the same server. The socket binds early; the
/// remote is fixed once the TCP peer address is known. One datagram
/// carries one frame; anything from a different source is ignored.
pub struct UdpTransport {
    socket: UdpSocket,
    remote: Option<SocketAddr>,
}

impl UdpTransport {
    pub fn bind() -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            remote: None,
        })
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote = Some(addr);
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn send_line(&self, line: &str) -> io::Result<usize> {
        let Some(remote) = self.remote else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        self.socket.send_to(line.as_bytes(), remote)
    }

    pub fn poll(&mut self) -> io::Result<UdpPoll> {
        let mut result = UdpPoll::default();
        let mut chunk = [0u8; MAX_DATAGRAM_BYTES];
        loop {
            match self.socket.recv_from(&mut chunk) {
                Ok((n, from)) => {
                    if Some(from) != self.remote {
                        result.rejected += 1;
                        continue;
                    }
                    result.bytes_received += n;
                    let text = String::from_utf8_lossy(&chunk[..n]);
                    let text = text.trim_end_matches(['\n', '\r']);
                    if !text.is_empty() {
                        result.lines.push(text.to_string());
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // Some platforms surface ICMP unreachable as a read
                // error on the next recv; the channel is lossy anyway.
                Err(ref err) if err.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }
}

/// Reassembles newline-delimited frames from arbitrary read chunks.
/// Bytes are buffered raw so a read may split a UTF-8 code point or a
/// frame anywhere.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Removes and returns every complete frame buffered so far. Blank
    /// frames and the tail of an oversized frame are dropped.
    pub fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim_end_matches(['\n', '\r']);
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        if self.buffer.len() > MAX_FRAME_BYTES {
            warn!(
                "Dropping oversized frame ({} bytes buffered without a newline)",
                self.buffer.len()
            );
            self.buffer.clear();
            self.discarding = true;
        }
        lines
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}
