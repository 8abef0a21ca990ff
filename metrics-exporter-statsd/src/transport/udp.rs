use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use super::{Connect, Connection, Transport, TransportError};

pub(crate) struct UdpConnector {
    addrs: Vec<SocketAddr>,
    write_timeout: Duration,
}

impl Connect for UdpConnector {
    type Connection = UdpSocket;

    fn connect(&self) -> Result<UdpSocket, TransportError> {
        let local_addr: SocketAddr = match self.addrs.first() {
            Some(SocketAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            _ => (Ipv4Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(local_addr)?;
        socket.connect(&self.addrs[..])?;
        socket.set_write_timeout(Some(self.write_timeout))?;
        Ok(socket)
    }
}

/// Sends every packet as a single UDP datagram.
pub(crate) struct UdpTransport {
    connection: Connection<UdpConnector>,
}

impl UdpTransport {
    pub fn new(addrs: Vec<SocketAddr>, write_timeout: Duration) -> Self {
        UdpTransport { connection: Connection::new(UdpConnector { addrs, write_timeout }) }
    }
}

impl Transport for UdpTransport {
    fn transport_id(&self) -> &'static str {
        "udp"
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.connection.run_with_retry(|socket| {
            socket.send(packet)?;
            Ok(())
        })
    }
}
