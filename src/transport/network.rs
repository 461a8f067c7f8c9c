//! TCP and UDP driver
//!
//! TCP connects to the remote host as a client. UDP binds `local_port`
//! (0 lets the OS choose), receives from any peer and sends to the remote
//! address. With `multicast` set, the remote address is joined as an IPv4
//! multicast group and the socket binds the group port.

use super::{NetworkConfig, SocketType, TransportDriver, TransportKind};
use crate::error::TransportError;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Socket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

pub struct NetworkDriver {
    config: NetworkConfig,
    target: String,
    remote: SocketAddr,
    socket: Option<Socket>,
    cancel: Arc<AtomicBool>,
}

impl NetworkDriver {
    pub fn open(config: NetworkConfig) -> Result<Self, TransportError> {
        let host = config.remote_address.trim();
        if host.is_empty() {
            return Err(TransportError::InvalidConfig(
                "no remote address configured".to_string(),
            ));
        }

        let target = format!("{}:{}", host, config.remote_port);
        let remote = (host, config.remote_port)
            .to_socket_addrs()
            .map_err(|e| TransportError::HostUnreachable(format!("{} ({})", target, e)))?
            .next()
            .ok_or_else(|| TransportError::HostUnreachable(target.clone()))?;

        let read_timeout = Some(Duration::from_millis(config.read_timeout_ms.max(1)));
        let socket = match config.socket_type {
            SocketType::Tcp => {
                if config.local_port != 0 {
                    tracing::warn!("Local port is ignored for TCP connections");
                }
                let timeout = Duration::from_millis(config.connect_timeout_ms.max(1));
                let stream = TcpStream::connect_timeout(&remote, timeout)
                    .map_err(|e| TransportError::from_io(e, &target))?;
                stream
                    .set_read_timeout(read_timeout)
                    .map_err(|e| TransportError::from_io(e, &target))?;
                let _ = stream.set_nodelay(true);
                Socket::Tcp(stream)
            }
            SocketType::Udp => Socket::Udp(Self::bind_udp(&config, remote, read_timeout)?),
        };

        tracing::info!("Opened {:?} socket to {}", config.socket_type, target);
        Ok(Self {
            config,
            target,
            remote,
            socket: Some(socket),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    fn bind_udp(
        config: &NetworkConfig,
        remote: SocketAddr,
        read_timeout: Option<Duration>,
    ) -> Result<UdpSocket, TransportError> {
        let local_port = if config.multicast && config.local_port == 0 {
            config.remote_port
        } else {
            config.local_port
        };
        let bind_addr: SocketAddr = match remote {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, local_port).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, local_port).into(),
        };
        let local = bind_addr.to_string();

        let socket = UdpSocket::bind(bind_addr).map_err(|e| TransportError::from_io(e, &local))?;

        if config.multicast {
            let SocketAddr::V4(group) = remote else {
                return Err(TransportError::InvalidConfig(
                    "multicast requires an IPv4 group address".to_string(),
                ));
            };
            if !group.ip().is_multicast() {
                return Err(TransportError::InvalidConfig(format!(
                    "{} is not a multicast address",
                    group.ip()
                )));
            }
            socket
                .join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)
                .map_err(|e| TransportError::from_io(e, &group.to_string()))?;
            tracing::debug!("Joined multicast group {}", group.ip());
        }

        socket
            .set_read_timeout(read_timeout)
            .map_err(|e| TransportError::from_io(e, &local))?;
        Ok(socket)
    }

    /// Locally bound address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.socket.as_ref()? {
            Socket::Tcp(stream) => stream.local_addr().ok(),
            Socket::Udp(socket) => socket.local_addr().ok(),
        }
    }

    pub fn socket_type(&self) -> SocketType {
        self.config.socket_type
    }
}

impl TransportDriver for NetworkDriver {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.cancel.load(Ordering::Acquire) {
            return Ok(0);
        }
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;

        let result = match socket {
            Socket::Tcp(stream) => match stream.read(buf) {
                Ok(0) => Err(Some(TransportError::ConnectionLost(format!(
                    "{} closed the connection",
                    self.target
                )))),
                other => other.map_err(|e| idle_or(e, &self.target)),
            },
            Socket::Udp(socket) => socket
                .recv_from(buf)
                .map(|(n, _peer)| n)
                .map_err(|e| idle_or(e, &self.target)),
        };

        match result {
            Ok(n) => Ok(n),
            Err(None) => Ok(0),
            Err(Some(e)) => {
                self.socket = None;
                Err(e)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotOpen)?;
        match socket {
            Socket::Tcp(stream) => stream
                .write_all(data)
                .map(|_| data.len())
                .map_err(|e| TransportError::from_io(e, &self.target)),
            Socket::Udp(socket) => socket
                .send_to(data, self.remote)
                .map_err(|e| TransportError::from_io(e, &self.target)),
        }
    }

    fn close(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(socket) = self.socket.take() {
            if let Socket::Tcp(stream) = socket {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            tracing::info!("Closed connection to {}", self.target);
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some() && !self.cancel.load(Ordering::Acquire)
    }

    fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

impl Drop for NetworkDriver {
    fn drop(&mut self) {
        self.close();
    }
}

/// `None` for read timeouts, the classified error otherwise
fn idle_or(err: std::io::Error, target: &str) -> Option<TransportError> {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => None,
        _ => Some(TransportError::from_io(err, target)),
    }
}
