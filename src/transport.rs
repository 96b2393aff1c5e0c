//! UDP socket setup for both roles.
//!
//! Sockets are configured with `socket2` (so options can be applied before
//! bind) and then handed to tokio. Every failure here is fatal: the caller
//! aborts startup instead of entering a loop with a half-configured socket.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    os::fd::AsRawFd,
};

use nix::libc;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

/// Errors raised while opening the probe or echo socket.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Cannot create datagram socket: {0}")]
    Socket(#[source] io::Error),

    #[error("Cannot set SO_REUSEADDR: {0}")]
    ReuseAddress(#[source] io::Error),

    #[error("Cannot bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Cannot use {interface} as multicast interface: {source}")]
    MulticastInterface {
        interface: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("Cannot set multicast TTL to {ttl}: {source}")]
    MulticastTtl {
        ttl: u32,
        #[source]
        source: io::Error,
    },

    #[error("Cannot join multicast group {group} on {interface}: {source}")]
    JoinGroup {
        group: Ipv4Addr,
        interface: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("Cannot enable IP_RECVTTL: {0}")]
    RecvTtl(#[source] io::Error),

    #[error("Cannot register socket with the runtime: {0}")]
    Register(#[source] io::Error),
}

fn new_reusable_socket() -> Result<Socket, TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(TransportError::Socket)?;
    socket
        .set_reuse_address(true)
        .map_err(TransportError::ReuseAddress)?;
    Ok(socket)
}

fn bind_any(socket: &Socket, port: u16) -> Result<(), TransportError> {
    let addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into();
    socket
        .bind(&addr.into())
        .map_err(|source| TransportError::Bind { addr, source })
}

fn into_tokio(socket: Socket) -> Result<UdpSocket, TransportError> {
    socket
        .set_nonblocking(true)
        .map_err(TransportError::Register)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(TransportError::Register)
}

/// Opens the prober socket.
///
/// Outbound multicast leaves through `interface` with the given TTL. The
/// socket listens on `0.0.0.0:<port>` for unicast echoes and does not join
/// the group.
pub fn open_prober_socket(
    interface: Ipv4Addr,
    port: u16,
    ttl: u32,
) -> Result<UdpSocket, TransportError> {
    let socket = new_reusable_socket()?;
    socket
        .set_multicast_if_v4(&interface)
        .map_err(|source| TransportError::MulticastInterface { interface, source })?;
    socket
        .set_multicast_ttl_v4(ttl)
        .map_err(|source| TransportError::MulticastTtl { ttl, source })?;
    bind_any(&socket, port)?;

    log::debug!(
        "Prober socket bound to port {} (interface={}, ttl={})",
        port,
        interface,
        ttl
    );
    into_tokio(socket)
}

/// Opens the responder socket.
///
/// The socket is bound to `0.0.0.0:<port>`, joined to `group` on `interface`
/// and asks the kernel to report the TTL of every received datagram.
pub fn open_responder_socket(
    interface: Ipv4Addr,
    group: Ipv4Addr,
    port: u16,
) -> Result<UdpSocket, TransportError> {
    let socket = new_reusable_socket()?;
    enable_recv_ttl(&socket).map_err(TransportError::RecvTtl)?;
    bind_any(&socket, port)?;
    socket
        .join_multicast_v4(&group, &interface)
        .map_err(|source| TransportError::JoinGroup {
            group,
            interface,
            source,
        })?;

    log::debug!(
        "Responder socket bound to port {}, joined {} on {}",
        port,
        group,
        interface
    );
    into_tokio(socket)
}

// socket2 has no setter for IP_RECVTTL, so go through libc.
fn enable_recv_ttl(socket: &Socket) -> io::Result<()> {
    let enable: libc::c_int = 1;
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_RECVTTL,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
