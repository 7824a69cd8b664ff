use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use tracing::debug;

use crate::error::ClientError;

/// A connectionless transport that sends one datagram at a time.
pub(crate) trait Transport: Send + 'static {
    /// Sends a single datagram, returning the number of bytes sent.
    fn send(&mut self, payload: &[u8]) -> Result<usize, ClientError>;
}

/// UDP transport configuration.
#[derive(Clone, Debug)]
pub(crate) struct UdpConfiguration {
    pub remote_addrs: Vec<SocketAddr>,
    pub write_timeout: Option<Duration>,
}

impl UdpConfiguration {
    /// Binds a local socket of the same address family as the remote address, and connects it.
    fn open(&self) -> io::Result<UdpSocket> {
        let first = self.remote_addrs.first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no remote addresses to connect to")
        })?;

        let socket = if first.is_ipv4() {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
        } else {
            UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
        };

        let same_family =
            self.remote_addrs.iter().filter(|addr| addr.is_ipv4() == first.is_ipv4()).copied().collect::<Vec<_>>();
        socket.connect(&same_family[..])?;
        socket.set_write_timeout(self.write_timeout)?;
        Ok(socket)
    }
}

enum ConnectionState {
    // Intermediate state during send attempts.
    Inconsistent,

    // The socket failed previously and must be reopened before the next send.
    Disconnected(UdpConfiguration),

    // The socket is connected and ready to send.
    Ready(UdpConfiguration, UdpSocket),
}

/// UDP transport.
///
/// The socket is opened eagerly so that an unusable remote address fails the build. After a failed send, the socket is
/// dropped and reopened lazily on the next send, without retrying the failed datagram.
pub(crate) struct UdpTransport {
    state: ConnectionState,
}

impl UdpTransport {
    /// Opens a new `UdpTransport`.
    pub fn open(config: UdpConfiguration) -> io::Result<Self> {
        let socket = config.open()?;
        debug!(local_addr = ?socket.local_addr().ok(), remote_addr = ?socket.peer_addr().ok(), "Opened UDP socket.");

        Ok(Self { state: ConnectionState::Ready(config, socket) })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, payload: &[u8]) -> Result<usize, ClientError> {
        loop {
            let old_state = std::mem::replace(&mut self.state, ConnectionState::Inconsistent);
            match old_state {
                ConnectionState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ConnectionState::Disconnected(config) => match config.open() {
                    Ok(socket) => {
                        debug!("Reopened UDP socket.");
                        self.state = ConnectionState::Ready(config, socket);
                    }
                    Err(source) => {
                        self.state = ConnectionState::Disconnected(config);
                        return Err(ClientError::Reconnect { source });
                    }
                },
                ConnectionState::Ready(config, socket) => {
                    return match socket.send(payload) {
                        Ok(n) => {
                            self.state = ConnectionState::Ready(config, socket);
                            Ok(n)
                        }
                        Err(source) => {
                            self.state = ConnectionState::Disconnected(config);
                            Err(ClientError::Transmit { source })
                        }
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use super::{Transport as _, UdpConfiguration, UdpTransport};
    use crate::error::ClientError;

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        socket
    }

    #[test]
    fn sends_datagrams() {
        let server = receiver();
        let config = UdpConfiguration {
            remote_addrs: vec![server.local_addr().unwrap()],
            write_timeout: Some(Duration::from_secs(1)),
        };

        let mut transport = UdpTransport::open(config).unwrap();
        assert_eq!(transport.send(b"hits:1|c").unwrap(), 8);

        let mut buf = [0; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hits:1|c");
    }

    #[test]
    fn open_without_addresses() {
        let config = UdpConfiguration { remote_addrs: Vec::new(), write_timeout: None };
        assert!(UdpTransport::open(config).is_err());
    }

    #[test]
    fn oversized_send_is_an_error_not_a_panic() {
        let server = receiver();
        let config = UdpConfiguration { remote_addrs: vec![server.local_addr().unwrap()], write_timeout: None };

        let mut transport = UdpTransport::open(config).unwrap();
        let payload = vec![b'a'; 70_000];
        assert!(matches!(transport.send(&payload), Err(ClientError::Transmit { .. })));

        // The transport reopens the socket and keeps working after a failure.
        assert!(transport.send(b"hits:1|c").is_ok());
        let mut buf = [0; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hits:1|c");
    }
}
