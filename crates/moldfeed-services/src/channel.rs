//! Datagram transport: the multicast feed and the unicast rerequest link.
//!
//! The drivers only see the two traits below, so they can be run against
//! real sockets or scripted in-memory channels alike. Both sockets are
//! built with socket2 (for SO_RCVBUF, reuse and source-specific joins)
//! and handed to tokio for async receive.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;

use moldfeed_core::config::MulticastTarget;

/// Result of waiting for one reply datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// A datagram of this many bytes was written to the buffer.
    Datagram(usize),
    /// The per-receive deadline passed with nothing to read.
    TimedOut,
}

/// Source of live datagrams.
#[allow(async_fn_in_trait)]
pub trait DatagramSource {
    /// Receive one datagram into `buf`, returning its length.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Request/reply link to a rerequest server.
#[allow(async_fn_in_trait)]
pub trait ReplayChannel {
    /// Send one datagram. Partial sends are errors.
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Wait up to the channel's reply timeout for one datagram.
    async fn recv_reply(&mut self, buf: &mut [u8]) -> io::Result<Reply>;
}

// ── Multicast ─────────────────────────────────────────────────────────────────

/// Socket joined to the live multicast group.
pub struct MulticastChannel {
    socket: UdpSocket,
    target: MulticastTarget,
}

impl MulticastChannel {
    /// Join `target`, source-specific when a source address is configured.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(target: &MulticastTarget, receive_buffer_bytes: usize) -> Result<Self> {
        let socket = make_multicast_socket(target, receive_buffer_bytes)
            .context("failed to create multicast socket")?;
        let socket =
            UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")?;

        tracing::info!(
            group = %target.group,
            port = target.port,
            interface = %target.interface,
            source = ?target.source,
            "joined multicast group"
        );

        Ok(Self {
            socket,
            target: *target,
        })
    }

    pub fn target(&self) -> &MulticastTarget {
        &self.target
    }

    /// Bound address. With a configured port of 0 this is where the kernel put us.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Set SO_RCVBUF. The kernel may round or clamp the value.
    pub fn set_receive_buffer_size(&self, bytes: usize) -> io::Result<()> {
        SockRef::from(&self.socket).set_recv_buffer_size(bytes)
    }

    pub fn receive_buffer_size(&self) -> io::Result<usize> {
        SockRef::from(&self.socket).recv_buffer_size()
    }
}

impl DatagramSource for MulticastChannel {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}

/// Create a UDP socket bound to the group port and joined to the group.
fn make_multicast_socket(target: &MulticastTarget, receive_buffer_bytes: usize) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    if let Err(e) = socket.set_recv_buffer_size(receive_buffer_bytes) {
        tracing::warn!(error = %e, bytes = receive_buffer_bytes, "SO_RCVBUF not applied");
    }

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, target.port);
    socket.bind(&bind_addr.into()).context("bind()")?;

    match target.source {
        Some(source) => socket
            .join_ssm_v4(&source, &target.group, &target.interface)
            .context("IP_ADD_SOURCE_MEMBERSHIP")?,
        None => socket
            .join_multicast_v4(&target.group, &target.interface)
            .context("IP_ADD_MEMBERSHIP")?,
    }

    Ok(socket)
}

// ── Unicast ───────────────────────────────────────────────────────────────────

/// Unicast socket talking to the rerequest server.
pub struct UnicastChannel {
    socket: UdpSocket,
    remote: SocketAddr,
    timeout: Duration,
}

impl UnicastChannel {
    /// Bind an ephemeral local port for requests to `remote`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(remote: SocketAddrV4, receive_buffer_bytes: usize, timeout: Duration) -> Result<Self> {
        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
        socket.set_nonblocking(true).context("set_nonblocking")?;
        if let Err(e) = socket.set_recv_buffer_size(receive_buffer_bytes) {
            tracing::warn!(error = %e, bytes = receive_buffer_bytes, "SO_RCVBUF not applied");
        }

        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket.bind(&local.into()).context("bind()")?;

        let socket =
            UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")?;

        tracing::info!(
            %remote,
            local = ?socket.local_addr().ok(),
            timeout_ms = timeout.as_millis() as u64,
            "rerequest channel open"
        );

        Ok(Self {
            socket,
            remote: remote.into(),
            timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

impl ReplayChannel for UnicastChannel {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(datagram, self.remote).await?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {sent} of {} bytes", datagram.len()),
            ));
        }
        Ok(())
    }

    /// Datagrams from anyone but the rerequest server are dropped and do not
    /// extend the deadline.
    async fn recv_reply(&mut self, buf: &mut [u8]) -> io::Result<Reply> {
        let socket = &self.socket;
        let remote = self.remote;
        let from_server = async {
            loop {
                let (len, from) = socket.recv_from(buf).await?;
                if from == remote {
                    return Ok::<_, io::Error>(len);
                }
                tracing::trace!(%from, len, "dropping datagram from unexpected peer");
            }
        };
        match tokio::time::timeout(self.timeout, from_server).await {
            Ok(result) => result.map(Reply::Datagram),
            Err(_) => Ok(Reply::TimedOut),
        }
    }
}
