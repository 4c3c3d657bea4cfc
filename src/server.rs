//! TCP server for the printable character counting protocol.
//!
//! Connections are served strictly one at a time on the calling task. The
//! histogram is owned by the `Server` and merged only after a connection's
//! response was delivered, so no locking is needed.
//!
//! Shutdown is observed only while no connection is active: the loop
//! checks the flag before each accept and races accept against the
//! shutdown notification while idle. Either way the loop itself prints the
//! final report.

use crate::config::Config;
use crate::connection::{ConnState, Connection};
use crate::histogram::Histogram;
use crate::shutdown::Shutdown;
use bytes::BytesMut;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Fatal server errors. Per-connection failures never surface here.
#[derive(Debug)]
pub enum ServerError {
    /// Could not create, bind, or listen on the listening socket.
    Bind(SocketAddr, io::Error),
    /// The listening socket failed while accepting.
    Accept(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "failed to listen on {addr}: {e}"),
            ServerError::Accept(e) => write!(f, "accept failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(_, e) | ServerError::Accept(e) => Some(e),
        }
    }
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    buffer_size: NonZeroUsize,
    histogram: Histogram,
    shutdown: Shutdown,
    states: watch::Sender<ConnState>,
    report: Box<dyn Write + Send>,
}

impl Server {
    /// Create the listening socket. Must be called inside a Tokio runtime.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = create_listener(addr, config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|e| ServerError::Bind(addr, e))?;
        let (states, _) = watch::channel(ConnState::Listening);

        info!(
            address = %listener.local_addr().unwrap_or(addr),
            backlog = config.backlog,
            "Server listening"
        );

        Ok(Server {
            listener,
            buffer_size: config.buffer_size,
            histogram: Histogram::new(),
            shutdown: Shutdown::new(),
            states,
            report: Box::new(io::stdout()),
        })
    }

    /// Send histogram reports somewhere other than stdout.
    pub fn with_report_sink<W>(mut self, sink: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.report = Box::new(sink);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for requesting shutdown from another task.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Watch the server's state transitions.
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.states.subscribe()
    }

    /// Accept and serve connections until shutdown is requested.
    ///
    /// Returns the final histogram after printing it. A failing listening
    /// socket ends the loop with an error instead.
    pub async fn run(mut self) -> Result<Histogram, ServerError> {
        let mut buffer = BytesMut::zeroed(self.buffer_size.get());

        loop {
            self.enter(ConnState::Listening);

            // Safe point: nothing is in flight here.
            if self.shutdown.is_triggered() {
                break;
            }

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.wait() => None,
                accepted = self.listener.accept() => Some(accepted),
            };
            let Some(accepted) = accepted else {
                break;
            };

            let (stream, peer) = accepted.map_err(|e| {
                error!(error = %e, "Failed to accept connection");
                ServerError::Accept(e)
            })?;
            self.serve(stream, peer, &mut buffer).await;
        }

        self.enter(ConnState::ShuttingDown);
        info!(
            connections = self.histogram.connections(),
            "Shutting down, printing final report"
        );
        self.print_report();

        Ok(self.histogram)
    }

    /// Serve one connection and merge its tally if the reply went out.
    async fn serve(&mut self, stream: TcpStream, peer: SocketAddr, buffer: &mut [u8]) {
        debug!(peer = %peer, "New connection");
        let mut conn = Connection::new(stream, peer);

        match conn.serve(buffer, &self.states).await {
            Ok(count) => {
                self.enter(ConnState::Merging);
                self.histogram.merge(conn.tally());
                drop(conn);

                info!(
                    peer = %peer,
                    printable = count,
                    connections = self.histogram.connections(),
                    "Connection complete"
                );
                self.print_report();
            }
            Err(aborted) if aborted.cause.is_clean_disconnect() => {
                debug!(peer = %peer, "Peer disconnected before sending a frame");
            }
            Err(aborted) => {
                warn!(
                    peer = %peer,
                    state = %aborted.state,
                    error = %aborted.cause,
                    "Connection aborted, tally discarded"
                );
            }
        }
    }

    fn enter(&self, state: ConnState) {
        self.states.send_replace(state);
    }

    fn print_report(&mut self) {
        if let Err(e) = self.histogram.write_report(self.report.as_mut()) {
            warn!(error = %e, "Failed to write histogram report");
        }
    }
}

/// Create a blocking-free TCP listener with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}
