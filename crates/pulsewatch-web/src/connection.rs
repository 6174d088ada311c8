//! Per-connection state: the read/write buffers, parser, granted ACL, and
//! timings tracked for one accepted socket (spec.md §3 "HTTP connection").
//!
//! Mirrors the state-machine shape of a transport connection elsewhere in
//! this codebase, minus the reconnection machinery an HTTP server doesn't
//! need: a connection here lives exactly as long as its socket.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::net::{TcpStream, UnixStream};
use mio::{Interest, Registry, Token};
use uuid::Uuid;

use crate::acl::AclMask;
use crate::bufpool::{BufferPool, PooledBuffer};
use crate::error::HttpError;
use crate::parser::{ParseOutcome, RequestParser};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushResult {
    Complete,
    WouldBlock,
    Empty,
}

/// Either half of the listen-socket split spec.md §6 requires: a TCP stream
/// accepted off an IPv4/IPv6 listener, or a stream accepted off a UNIX
/// domain socket. Read/Write/mio registration all delegate to whichever
/// variant is live; callers above `Connection` never match on this.
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Unix(s) => s.flush(),
        }
    }
}

impl Source for Stream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.register(registry, token, interests),
            Stream::Unix(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.reregister(registry, token, interests),
            Stream::Unix(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.deregister(registry),
            Stream::Unix(s) => s.deregister(registry),
        }
    }
}

impl Stream {
    fn shutdown(&self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.shutdown(std::net::Shutdown::Both),
            Stream::Unix(s) => s.shutdown(std::net::Shutdown::Both),
        }
    }
}

/// Where a connection came from. UNIX domain sockets have no IP/port, so
/// those fields report the conventional `0.0.0.0:0` sentinel in the access
/// log rather than a fabricated address.
#[derive(Clone, Copy, Debug)]
pub enum ClientAddr {
    Tcp(SocketAddr),
    Unix,
}

impl ClientAddr {
    pub fn ip(&self) -> IpAddr {
        match self {
            ClientAddr::Tcp(addr) => addr.ip(),
            ClientAddr::Unix => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            ClientAddr::Tcp(addr) => addr.port(),
            ClientAddr::Unix => 0,
        }
    }
}

/// State of one accepted HTTP connection, keyed by its mio [`Token`].
pub struct Connection {
    pub token: Token,
    stream: Stream,
    pub peer_addr: ClientAddr,

    parser: RequestParser,
    read_buf: [u8; 16 * 1024],

    pool: Arc<BufferPool>,
    pending_write: Option<(PooledBuffer, usize)>,
    pending_file: Option<std::fs::File>,

    /// ACL bits granted by the listener this connection was accepted on.
    pub listener_acl: AclMask,
    /// ACL bits actually resolved for the authenticated caller, always a
    /// subset of `listener_acl`.
    pub granted_acl: AclMask,

    pub transaction_id: String,
    arrived_at: Instant,
    ready_to_send_at: Option<Instant>,
    last_checkpoint: Instant,

    /// Set by a handler that hands the raw socket off to another subsystem
    /// (e.g. a long-lived streaming reply); the server loop must not close
    /// the socket itself when this is set.
    pub keep_socket_open: bool,

    pub requests_served: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl Connection {
    pub fn new(
        token: Token,
        stream: Stream,
        peer_addr: ClientAddr,
        listener_acl: AclMask,
        pool: Arc<BufferPool>,
    ) -> Self {
        let now = Instant::now();
        pool.connection_opened();
        Connection {
            token,
            stream,
            peer_addr,
            parser: RequestParser::new(false),
            read_buf: [0u8; 16 * 1024],
            pool,
            pending_write: None,
            pending_file: None,
            listener_acl,
            granted_acl: listener_acl,
            transaction_id: Uuid::new_v4().simple().to_string(),
            arrived_at: now,
            ready_to_send_at: None,
            last_checkpoint: now,
            keep_socket_open: false,
            requests_served: 0,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    /// Drain what's currently readable and feed it through the request
    /// parser, looping until the socket would block.
    pub fn read_requests(&mut self) -> Result<ParseOutcome, HttpError> {
        loop {
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Ok(ParseOutcome::Incomplete),
                Ok(n) => {
                    self.bytes_received += n as u64;
                    self.touch();
                    let outcome = self.parser.feed(&self.read_buf[..n])?;
                    if !matches!(outcome, ParseOutcome::Incomplete) {
                        return Ok(outcome);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ParseOutcome::Incomplete),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(HttpError::Io(e)),
            }
        }
    }

    /// Prepare for the next request on this connection, retaining any bytes
    /// already buffered past the request boundary just consumed.
    pub fn reset_for_next_request(&mut self) {
        self.parser.reset_for_next_request();
        self.requests_served += 1;
        self.ready_to_send_at = None;
    }

    pub fn queue_response(&mut self, bytes: &[u8]) {
        let mut buf = self.pool.acquire();
        buf.data.extend_from_slice(bytes);
        self.ready_to_send_at = Some(Instant::now());
        self.pending_write = Some((buf, 0));
    }

    /// Queue a file to stream after the currently pending header bytes, read
    /// from disk in bounded `static_files::STATIC_CHUNK_SIZE` chunks rather
    /// than loaded whole into memory.
    pub fn queue_static_file(&mut self, file: std::fs::File) {
        self.pending_file = Some(file);
    }

    /// Write as much of the pending response as the socket accepts without
    /// blocking: header bytes first, then the queued file (if any) in
    /// bounded chunks pulled from disk as each chunk finishes sending.
    pub fn flush_writes(&mut self) -> io::Result<FlushResult> {
        if self.pending_write.is_none() && self.pending_file.is_none() {
            return Ok(FlushResult::Empty);
        }

        if let Some((buf, offset)) = self.pending_write.as_mut() {
            loop {
                match self.stream.write(&buf.data[*offset..]) {
                    Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "connection closed")),
                    Ok(n) => {
                        self.bytes_sent += n as u64;
                        *offset += n;
                        if *offset >= buf.data.len() {
                            let (buf, _) = self.pending_write.take().expect("checked above");
                            self.pool.release(buf);
                            self.touch();
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(FlushResult::WouldBlock),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        if self.pending_file.is_some() {
            return self.flush_pending_file();
        }

        Ok(FlushResult::Complete)
    }

    /// Pull the next bounded chunk from the queued file and write it,
    /// looping across chunks until the socket would block or the file is
    /// exhausted.
    fn flush_pending_file(&mut self) -> io::Result<FlushResult> {
        use std::io::Read as _;

        loop {
            let file = self.pending_file.as_mut().expect("checked by caller");
            let mut chunk = vec![0u8; crate::static_files::STATIC_CHUNK_SIZE];
            let read = file.read(&mut chunk)?;
            if read == 0 {
                self.pending_file = None;
                self.touch();
                return Ok(FlushResult::Complete);
            }
            chunk.truncate(read);

            let mut offset = 0;
            loop {
                match self.stream.write(&chunk[offset..]) {
                    Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "connection closed")),
                    Ok(n) => {
                        self.bytes_sent += n as u64;
                        offset += n;
                        if offset >= chunk.len() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(FlushResult::WouldBlock),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending_write.is_some() || self.pending_file.is_some()
    }

    pub fn touch(&mut self) {
        self.last_checkpoint = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_checkpoint.elapsed()
    }

    pub fn time_since_arrival(&self) -> Duration {
        self.arrived_at.elapsed()
    }

    /// Time spent preparing the response once the request finished parsing,
    /// used for the access log's "prep time" field.
    pub fn prep_duration(&self) -> Option<Duration> {
        self.ready_to_send_at.map(|t| t.duration_since(self.arrived_at))
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.shutdown();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pool.connection_closed();
    }
}
