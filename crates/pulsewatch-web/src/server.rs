//! Non-blocking multi-worker HTTP server (spec.md §4.E "Listener and worker
//! pool"). One `socket2`-built listener is bound per configured address and
//! then duplicated (`try_clone`) into every worker thread, each of which
//! owns its own `mio::Poll` — the kernel balances `accept()`s across the
//! duplicated file descriptors without needing `SO_REUSEPORT`, the same
//! clone-the-listener shape `admin/api/server.rs` uses for its accept
//! thread. No cross-thread command channel: a worker has nothing to do but
//! accept, read, dispatch, and write.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::net::{TcpListener as MioTcpListener, UnixListener as MioUnixListener};
use mio::{Events, Interest, Poll, Registry, Token};

use crate::access_log::{self, AccessLogEntry};
use crate::acl::{AclMask, IpAclCache};
use crate::bufpool::BufferPool;
use crate::connection::{ClientAddr, Connection, FlushResult, Stream};
use crate::dispatch::Dispatcher;
use crate::error::HttpError;
use crate::parser::ParseOutcome;
use crate::response::{Response, ResponseContext};

const LISTENER_TOKEN: Token = Token(0);
const CONNECTION_TOKEN_START: usize = 1;
const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_EVENTS: usize = 256;

/// Bind one listening socket with `SO_REUSEADDR` set, following
/// `admin/api/server.rs::create_tcp_listener`'s construction order.
fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    let listener: std::net::TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Bind a UNIX domain socket listener, removing a stale socket file left
/// behind by a previous run (a fresh bind against an existing path fails
/// with `AddrInUse` otherwise).
fn bind_unix_listener(path: &Path) -> io::Result<StdUnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = StdUnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Either half of the listen-socket split spec.md §6 requires, mirroring
/// `connection::Stream`'s TCP/UNIX delegation.
enum ListenerSocket {
    Tcp(MioTcpListener),
    Unix(MioUnixListener),
}

impl ListenerSocket {
    fn accept(&mut self) -> io::Result<(Stream, ClientAddr)> {
        match self {
            ListenerSocket::Tcp(l) => {
                let (stream, addr) = l.accept()?;
                Ok((Stream::Tcp(stream), ClientAddr::Tcp(addr)))
            }
            ListenerSocket::Unix(l) => {
                let (stream, _addr) = l.accept()?;
                Ok((Stream::Unix(stream), ClientAddr::Unix))
            }
        }
    }
}

impl Source for ListenerSocket {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenerSocket::Tcp(l) => l.register(registry, token, interests),
            ListenerSocket::Unix(l) => l.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ListenerSocket::Tcp(l) => l.reregister(registry, token, interests),
            ListenerSocket::Unix(l) => l.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ListenerSocket::Tcp(l) => l.deregister(registry),
            ListenerSocket::Unix(l) => l.deregister(registry),
        }
    }
}

pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

pub struct ServerConfig {
    pub listeners: Vec<(SocketAddr, AclMask)>,
    pub unix_listeners: Vec<(PathBuf, AclMask)>,
    pub worker_count: usize,
    pub first_request_timeout: Duration,
    pub idle_timeout: Duration,
    /// IP patterns allowed to connect to TCP listeners; empty allows all.
    pub allow_from: Vec<String>,
}

/// Bind every configured listener (TCP and UNIX), `worker_count` times each,
/// and spawn one worker thread per (listener, worker) pair.
pub fn spawn(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> io::Result<ServerHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    let allow_from = Arc::new(config.allow_from);

    for (addr, acl) in config.listeners {
        let bound = bind_listener(addr)?;

        for worker_index in 0..config.worker_count.max(1) {
            let cloned = bound.try_clone()?;
            let listener = ListenerSocket::Tcp(MioTcpListener::from_std(cloned));
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            let allow_from = allow_from.clone();
            let first_request_timeout = config.first_request_timeout;
            let idle_timeout = config.idle_timeout;

            let handle = thread::Builder::new()
                .name(format!("pulsewatch-worker-{addr}-{worker_index}"))
                .spawn(move || {
                    let mut worker =
                        Worker::new(listener, acl, dispatcher, first_request_timeout, idle_timeout, allow_from);
                    if let Err(e) = worker.run(shutdown) {
                        tracing::error!(error = %e, "worker exited with error");
                    }
                })?;
            workers.push(handle);
        }
    }

    for (path, acl) in config.unix_listeners {
        let bound = bind_unix_listener(&path)?;

        for worker_index in 0..config.worker_count.max(1) {
            let cloned = bound.try_clone()?;
            let listener = ListenerSocket::Unix(MioUnixListener::from_std(cloned));
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            let allow_from = allow_from.clone();
            let first_request_timeout = config.first_request_timeout;
            let idle_timeout = config.idle_timeout;
            let path_display = path.display().to_string();

            let handle = thread::Builder::new()
                .name(format!("pulsewatch-worker-{path_display}-{worker_index}"))
                .spawn(move || {
                    let mut worker =
                        Worker::new(listener, acl, dispatcher, first_request_timeout, idle_timeout, allow_from);
                    if let Err(e) = worker.run(shutdown) {
                        tracing::error!(error = %e, "worker exited with error");
                    }
                })?;
            workers.push(handle);
        }
    }

    Ok(ServerHandle { shutdown, workers })
}

struct Worker {
    poll: Poll,
    listener: ListenerSocket,
    listener_acl: AclMask,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<BufferPool>,
    first_request_timeout: Duration,
    idle_timeout: Duration,
    acl_cache: IpAclCache,
    allow_from: Arc<Vec<String>>,
}

impl Worker {
    fn new(
        mut listener: ListenerSocket,
        listener_acl: AclMask,
        dispatcher: Arc<Dispatcher>,
        first_request_timeout: Duration,
        idle_timeout: Duration,
        allow_from: Arc<Vec<String>>,
    ) -> Self {
        let poll = Poll::new().expect("mio::Poll::new");
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .expect("register listener");

        Worker {
            poll,
            listener,
            listener_acl,
            connections: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            dispatcher,
            pool: Arc::new(BufferPool::new()),
            first_request_timeout,
            idle_timeout,
            acl_cache: IpAclCache::new(),
            allow_from,
        }
    }

    fn run(&mut self, shutdown: Arc<AtomicBool>) -> io::Result<()> {
        let mut events = Events::with_capacity(MAX_EVENTS);

        while !shutdown.load(Ordering::Acquire) {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_all(),
                    token => {
                        if event.is_readable() {
                            self.handle_readable(token);
                        }
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                    }
                }
            }

            self.reap_timed_out_connections();
        }

        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    if let ClientAddr::Tcp(addr) = peer_addr {
                        if !self.acl_cache.is_allowed(addr.ip(), &self.allow_from) {
                            tracing::debug!(ip = %addr.ip(), "connection rejected by ip acl");
                            continue;
                        }
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                        tracing::warn!(error = %e, "failed to register accepted connection");
                        continue;
                    }

                    let connection = Connection::new(token, stream, peer_addr, self.listener_acl, self.pool.clone());
                    self.connections.insert(token, connection);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let outcome = match self.connections.get_mut(&token) {
            Some(conn) => conn.read_requests(),
            None => return,
        };

        match outcome {
            Ok(ParseOutcome::Incomplete) => {}
            Ok(ParseOutcome::Complete(request)) => self.dispatch_and_respond(token, request),
            Ok(ParseOutcome::TooManyReadRetries) => self.close_connection(token, "too many empty reads"),
            Ok(ParseOutcome::MalformedUrl) => {
                self.respond_error(token, HttpError::Malformed("malformed request line or path".into()));
            }
            Ok(ParseOutcome::NotSupported) => {
                self.respond_error(token, HttpError::Malformed("unsupported method".into()));
            }
            Ok(ParseOutcome::HttpsUpgradeRequired { .. }) => {
                self.respond_error(token, HttpError::HttpsUpgradeRequired);
            }
            Err(e) => self.close_connection(token, &e.to_string()),
        }
    }

    fn dispatch_and_respond(&mut self, token: Token, request: crate::parser::Request) {
        let started = Instant::now();
        let Some(conn) = self.connections.get_mut(&token) else { return };

        let method = format!("{:?}", request.method);
        let path = request.path.clone();
        let accepts_gzip = request.accepts_gzip();
        let bytes_received = conn.bytes_received;

        let result = self.dispatcher.route(&request, conn.listener_acl);
        let (status, response) = match result {
            Ok(response) => (response.status, response),
            Err(e) => (e.status_code(), Response::plain_text(e.status_code(), e.to_string())),
        };

        let Some(conn) = self.connections.get_mut(&token) else { return };
        let ctx = ResponseContext {
            transaction_id: conn.transaction_id.clone(),
            origin: request.header("origin").map(|s| s.to_string()),
            keep_alive: true,
            accepts_gzip,
        };
        let static_file = response.static_file.clone();
        let rendered = response.render(&ctx);
        conn.queue_response(&rendered);
        if let Some(file) = static_file {
            match std::fs::File::open(&file.path) {
                Ok(handle) => conn.queue_static_file(handle),
                Err(e) => tracing::warn!(error = %e, path = %file.path.display(), "failed to open static file for streaming"),
            }
        }
        conn.reset_for_next_request();

        let acl_display = conn.granted_acl.to_string();
        access_log::record(&AccessLogEntry {
            connection_token: token.0,
            transaction_id: &conn.transaction_id,
            method: &method,
            url: &path,
            status,
            bytes_received,
            bytes_sent: rendered.len() as u64,
            prep_time: conn.prep_duration().unwrap_or_default(),
            total_time: started.elapsed(),
            client_ip: conn.peer_addr.ip(),
            client_port: conn.peer_addr.port(),
            forwarded_for: request.header("x-forwarded-for"),
            account_id: None,
            user_role: "anonymous",
            access_mask: &acl_display,
        });

        self.try_flush(token, true);
    }

    fn respond_error(&mut self, token: Token, error: HttpError) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let status = error.status_code();
        let response = Response::plain_text(status, error.to_string());
        let ctx = ResponseContext {
            transaction_id: conn.transaction_id.clone(),
            origin: None,
            keep_alive: false,
            accepts_gzip: false,
        };
        let rendered = response.render(&ctx);
        conn.queue_response(&rendered);
        self.try_flush(token, false);
    }

    fn handle_writable(&mut self, token: Token) {
        self.try_flush(token, true);
    }

    fn try_flush(&mut self, token: Token, keep_alive: bool) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        match conn.flush_writes() {
            Ok(FlushResult::Complete) => {
                if !keep_alive {
                    self.close_connection(token, "connection: close");
                    return;
                }
                if let Err(e) = self.poll.registry().reregister(conn.stream_mut(), token, Interest::READABLE) {
                    tracing::warn!(error = %e, "failed to reregister connection for reads");
                }
            }
            Ok(FlushResult::WouldBlock) => {
                if let Err(e) = self
                    .poll
                    .registry()
                    .reregister(conn.stream_mut(), token, Interest::READABLE | Interest::WRITABLE)
                {
                    tracing::warn!(error = %e, "failed to reregister connection for writes");
                }
            }
            Ok(FlushResult::Empty) => {}
            Err(e) => self.close_connection(token, &e.to_string()),
        }
    }

    fn reap_timed_out_connections(&mut self) {
        let mut to_close = Vec::new();
        for (token, conn) in self.connections.iter() {
            let timeout = if conn.requests_served == 0 {
                self.first_request_timeout
            } else {
                self.idle_timeout
            };
            if !conn.has_pending_write() && conn.idle_for() > timeout {
                to_close.push(*token);
            }
        }
        for token in to_close {
            self.close_connection(token, "idle timeout");
        }
    }

    fn close_connection(&mut self, token: Token, reason: &str) {
        if let Some(mut conn) = self.connections.remove(&token) {
            if conn.keep_socket_open {
                return;
            }
            let _ = self.poll.registry().deregister(conn.stream_mut());
            conn.shutdown();
            tracing::debug!(conn = token.0, reason, "connection closed");
        }
    }
}
