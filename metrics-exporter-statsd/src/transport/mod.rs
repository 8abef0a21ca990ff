use std::{
    io,
    net::{SocketAddr, ToSocketAddrs as _},
    time::Duration,
};

use hyper::{StatusCode, Uri};
use thiserror::Error;
use tracing::debug;

mod remote_write;
pub(crate) use self::remote_write::{basic_auth, bearer_auth, RemoteWriteConfiguration, RemoteWriteTransport};

mod udp;
pub(crate) use self::udp::UdpTransport;

/// Errors that could occur while sending a packet.
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    /// A socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The HTTP client failed to complete the request.
    #[error("HTTP client error: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),

    /// The HTTP request could not be built.
    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The payload could not be compressed.
    #[error("failed to compress payload: {0}")]
    Compression(#[from] snap::Error),

    /// The endpoint responded with a non-successful status code.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

/// Destination of a sink.
#[derive(Clone, Debug)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),
    RemoteWrite(Uri),
}

impl RemoteAddr {
    /// Returns the transport ID for the remote address.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            RemoteAddr::RemoteWrite(_) => "remote_write",
        }
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        if let Some((scheme, _)) = addr.split_once("://") {
            return match scheme {
                "http" | "https" => addr.parse::<Uri>().map(RemoteAddr::RemoteWrite).map_err(|e| e.to_string()),
                _ => Err(format!("invalid scheme '{scheme}' (expected 'http' or 'https')")),
            };
        }

        match addr.to_socket_addrs() {
            Ok(addrs) => {
                let addrs = addrs.collect::<Vec<_>>();
                if addrs.is_empty() {
                    Err(format!("'{addr}' did not resolve to any address"))
                } else {
                    Ok(RemoteAddr::Udp(addrs))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

/// A destination for packets.
///
/// Transports are owned by the dispatch thread, and are only ever used from it.
pub(crate) trait Transport: Send + 'static {
    /// Returns a short identifier of the transport, used in logs.
    fn transport_id(&self) -> &'static str;

    /// Sends a single packet of newline-separated datagrams.
    ///
    /// # Errors
    ///
    /// If the packet could not be delivered, even after retrying, an error is returned and the packet is lost.
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Called when a scheduled flush comes due with nothing buffered.
    ///
    /// Transports that report on every flush send an empty batch here. Does nothing by default.
    ///
    /// # Errors
    ///
    /// If the empty batch could not be delivered, an error is returned.
    fn flush_idle(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Establishes connections for a [`Connection`].
pub(crate) trait Connect {
    type Connection;

    fn connect(&self) -> Result<Self::Connection, TransportError>;
}

/// A lazily-established connection that is torn down whenever an operation on it fails.
pub(crate) struct Connection<C: Connect> {
    connector: C,
    current: Option<C::Connection>,
}

impl<C: Connect> Connection<C> {
    pub fn new(connector: C) -> Self {
        Connection { connector, current: None }
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    fn try_once<F, T>(&mut self, op: &mut F) -> Result<T, TransportError>
    where
        F: FnMut(&mut C::Connection) -> Result<T, TransportError>,
    {
        // The connection is only put back if the operation succeeds.
        let mut connection = match self.current.take() {
            Some(connection) => connection,
            None => self.connector.connect()?,
        };

        let result = op(&mut connection);
        if result.is_ok() {
            self.current = Some(connection);
        }

        result
    }

    /// Runs `op` against the connection, reconnecting and running it a second time if the first attempt fails.
    pub fn run_with_retry<F, T>(&mut self, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut(&mut C::Connection) -> Result<T, TransportError>,
    {
        match self.try_once(&mut op) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!(error = %e, "Resetting connection and retrying once.");
                self.try_once(&mut op)
            }
        }
    }
}
