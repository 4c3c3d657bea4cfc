//! Connection state machine.
//!
//! A connection walks `ReceivingLength -> ReceivingPayload ->
//! SendingResponse` and hands back its tally. Merging into the histogram
//! is the server's job and only happens after the response went out.

use crate::histogram::Tally;
use crate::protocol::{recv_length_prefixed, send_count, FrameError};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::trace;

/// Where the server currently is in its accept/serve cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No active connection; waiting in accept.
    Listening,
    /// Reading the 4-byte length prefix.
    ReceivingLength,
    /// Streaming payload bytes into the tally.
    ReceivingPayload,
    /// Writing the printable count back.
    SendingResponse,
    /// Adding the tally into the histogram.
    Merging,
    /// Shutdown observed; final report pending.
    ShuttingDown,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Listening => "listening",
            ConnState::ReceivingLength => "receiving_length",
            ConnState::ReceivingPayload => "receiving_payload",
            ConnState::SendingResponse => "sending_response",
            ConnState::Merging => "merging",
            ConnState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// A connection that failed before its response was delivered.
#[derive(Debug)]
pub struct Aborted {
    /// State the connection was in when the transport failed.
    pub state: ConnState,
    pub cause: FrameError,
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection aborted while {}: {}", self.state, self.cause)
    }
}

impl std::error::Error for Aborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// A single accepted client connection and its per-connection tally.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    tally: Tally,
    state: ConnState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a freshly accepted stream with an empty tally.
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            tally: Tally::new(),
            state: ConnState::ReceivingLength,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Receive one Request Frame and reply with its printable count.
    ///
    /// Every transition is published on `states`. On error the tally is
    /// incomplete and must be dropped with the connection.
    pub async fn serve(
        &mut self,
        buf: &mut [u8],
        states: &watch::Sender<ConnState>,
    ) -> Result<u32, Aborted> {
        self.enter(ConnState::ReceivingLength, states);

        let received = {
            let Self {
                stream,
                tally,
                state,
                peer,
            } = self;
            recv_length_prefixed(
                stream,
                buf,
                |length| {
                    *state = ConnState::ReceivingPayload;
                    states.send_replace(*state);
                    trace!(peer = %peer, length, "Length prefix received");
                },
                |chunk| {
                    tally.observe(chunk);
                },
            )
            .await
        };
        if let Err(cause) = received {
            return Err(self.abort(cause));
        }

        let count = self.tally.total();
        self.enter(ConnState::SendingResponse, states);
        if let Err(cause) = send_count(&mut self.stream, count).await {
            return Err(self.abort(cause));
        }

        Ok(count)
    }

    fn enter(&mut self, state: ConnState, states: &watch::Sender<ConnState>) {
        self.state = state;
        states.send_replace(state);
    }

    fn abort(&self, cause: FrameError) -> Aborted {
        Aborted {
            state: self.state,
            cause,
        }
    }
}
