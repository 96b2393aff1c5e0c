//! Stateless echo side.
//!
//! Every probe received on the group is copied back to the sender's address
//! on the configured port, with the TTL field filled in from the IP header.

use std::{
    io::{self, IoSliceMut},
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
    os::fd::{AsRawFd, RawFd},
    time::Instant,
};

use nix::{
    libc,
    sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, RecvMsg, SockaddrStorage},
};
use tokio::io::Interest;
use tokio_util::sync::CancellationToken;

use crate::{
    configuration::{ResponderSettings, DEFAULT_TTL},
    packets::{build_echo, ProbeHeader, MAX_DATAGRAM_SIZE},
    report::ResponderStats,
    transport::{open_responder_socket, TransportError},
};

/// Hop count written into echoes when the kernel supplied none.
pub const FALLBACK_TTL: u8 = DEFAULT_TTL as u8;

/// Returns false for datagrams the responder must not answer: those from the
/// unspecified address and those looped back from its own interface.
pub fn should_echo(src: IpAddr, local: Ipv4Addr) -> bool {
    !src.is_unspecified() && src != IpAddr::V4(local)
}

/// Hop count to write into an echo: the one the kernel reported, or
/// `FALLBACK_TTL` when the datagram arrived without one.
pub fn resolve_ttl(reported: Option<u8>, src: SocketAddr) -> u8 {
    reported.unwrap_or_else(|| {
        log::warn!("No TTL reported for datagram from {}, using {}", src, FALLBACK_TTL);
        FALLBACK_TTL
    })
}

struct Datagram {
    len: usize,
    src: Option<SocketAddr>,
    ttl: Option<u8>,
}

fn recv_datagram(fd: RawFd, buf: &mut [u8], cmsg_buf: &mut Vec<u8>) -> io::Result<Datagram> {
    let mut iov = [IoSliceMut::new(buf)];
    let msg = recvmsg::<SockaddrStorage>(fd, &mut iov, Some(cmsg_buf), MsgFlags::MSG_DONTWAIT)?;

    let src = msg
        .address
        .as_ref()
        .and_then(|addr| addr.as_sockaddr_in())
        .map(|v4| SocketAddr::V4(SocketAddrV4::new(v4.ip(), v4.port())));

    Ok(Datagram {
        len: msg.bytes,
        src,
        ttl: extract_ttl(&msg),
    })
}

#[cfg(target_os = "linux")]
fn extract_ttl(msg: &RecvMsg<SockaddrStorage>) -> Option<u8> {
    let cmsgs = msg.cmsgs().ok()?;
    for cmsg in cmsgs {
        if let ControlMessageOwned::Ipv4Ttl(ttl) = cmsg {
            return Some(ttl.clamp(0, 255) as u8);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn extract_ttl(msg: &RecvMsg<SockaddrStorage>) -> Option<u8> {
    let cmsgs = msg.cmsgs().ok()?;
    for cmsg in cmsgs {
        if let ControlMessageOwned::Unknown(ref ucmsg) = cmsg {
            if ucmsg.cmsg_header.cmsg_level != libc::IPPROTO_IP {
                continue;
            }
            // Some stacks deliver the TTL as an int, others as a single byte.
            let data = &ucmsg.data_bytes;
            if let Ok(word) = <[u8; 4]>::try_from(data.as_slice()) {
                return Some(i32::from_ne_bytes(word).clamp(0, 255) as u8);
            }
            return data.first().copied();
        }
    }
    None
}

/// Echoes probes until `shutdown` is cancelled and returns the counters.
///
/// # Errors
/// Returns a `TransportError` if the socket cannot be set up. Once the loop
/// runs, every per-datagram failure is logged and skipped.
pub async fn run_responder(
    settings: &ResponderSettings,
    shutdown: &CancellationToken,
) -> Result<ResponderStats, TransportError> {
    let socket = open_responder_socket(settings.interface, settings.group, settings.port)?;
    let fd = socket.as_raw_fd();

    println!(
        "MPING responder listening on {}:{} (interface {})",
        settings.group, settings.port, settings.interface
    );

    let start_time = Instant::now();
    let mut stats = ResponderStats::default();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut cmsg_buf = nix::cmsg_space!(libc::c_int);

    loop {
        let datagram = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            result = socket.async_io(Interest::READABLE, || recv_datagram(fd, &mut buf, &mut cmsg_buf)) => {
                match result {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        log::warn!("Receive error: {}", e);
                        continue;
                    }
                }
            }
        };
        stats.received += 1;

        let Some(src) = datagram.src else {
            log::debug!("Datagram without IPv4 source address, skipping");
            stats.dropped += 1;
            continue;
        };

        if !should_echo(src.ip(), settings.interface) {
            log::debug!("Not echoing datagram from {}", src);
            stats.ignored += 1;
            continue;
        }

        let data = &buf[..datagram.len];
        let header = match ProbeHeader::from_bytes(data) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("Discarding datagram from {}: {}", src, e);
                stats.dropped += 1;
                continue;
            }
        };

        // Only probes are answered; echoes from other responders carry a non-zero TTL.
        if !header.is_probe() {
            log::debug!("Not echoing echo seq={} from {}", header.sequence, src);
            stats.ignored += 1;
            continue;
        }

        let ttl = resolve_ttl(datagram.ttl, src);
        let echo = match build_echo(data, ttl) {
            Ok(echo) => echo,
            Err(e) => {
                log::debug!("Discarding datagram from {}: {}", src, e);
                stats.dropped += 1;
                continue;
            }
        };

        let reply_to = SocketAddr::new(src.ip(), settings.port);
        match socket.send_to(&echo, reply_to).await {
            Ok(_) => {
                stats.echoed += 1;
                if settings.verbose {
                    println!(
                        "{} bytes from {}: seq={} ttl={}",
                        datagram.len,
                        src.ip(),
                        header.sequence,
                        ttl
                    );
                }
            }
            Err(e) => {
                log::warn!("Failed to send echo to {}: {}", reply_to, e);
                stats.dropped += 1;
            }
        }
    }

    stats.uptime_seconds = start_time.elapsed().as_secs_f64();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::WireTime,
        packets::{build_probe, HEADER_SIZE},
    };
    use socket2::{Domain, Protocol, Socket, Type};
    use std::time::Duration;
    use tokio::{net::UdpSocket, time::timeout};

    const GROUP: Ipv4Addr = Ipv4Addr::new(226, 1, 1, 1);
    // Any 127/8 address is local, so the responder can claim one as its own
    // interface while the test talks from 127.0.0.1.
    const RESPONDER_INTERFACE: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

    fn reusable_socket(ip: Ipv4Addr, port: u16) -> UdpSocket {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        socket.set_reuse_address(true).unwrap();
        socket
            .bind(&SocketAddr::from((ip, port)).into())
            .unwrap();
        socket.set_nonblocking(true).unwrap();
        UdpSocket::from_std(socket.into()).unwrap()
    }

    #[test]
    fn test_should_echo_peer() {
        let local = Ipv4Addr::new(10, 0, 0, 1);
        assert!(should_echo(IpAddr::from([10, 0, 0, 2]), local));
        assert!(should_echo(IpAddr::from([192, 168, 7, 7]), local));
    }

    #[test]
    fn test_should_not_echo_self_or_unspecified() {
        let local = Ipv4Addr::new(10, 0, 0, 1);
        assert!(!should_echo(IpAddr::V4(local), local));
        assert!(!should_echo(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local));
    }

    #[test]
    fn test_resolve_ttl() {
        let src = SocketAddr::from(([10, 0, 0, 2], 4322));
        assert_eq!(resolve_ttl(Some(5), src), 5);
        assert_eq!(resolve_ttl(None, src), 64);
    }

    #[tokio::test]
    async fn test_recv_datagram_reports_source_and_ttl() {
        let socket = open_responder_socket(Ipv4Addr::LOCALHOST, GROUP, 0)
            .expect("responder socket on loopback");
        let port = socket.local_addr().unwrap().port();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[0u8; 20], (Ipv4Addr::LOCALHOST, port))
            .await
            .unwrap();

        let fd = socket.as_raw_fd();
        let mut buf = vec![0u8; 64];
        let mut cmsg_buf = nix::cmsg_space!(libc::c_int);
        let datagram = socket
            .async_io(Interest::READABLE, || recv_datagram(fd, &mut buf, &mut cmsg_buf))
            .await
            .unwrap();

        assert_eq!(datagram.len, 20);
        assert_eq!(datagram.src, Some(peer.local_addr().unwrap()));
        #[cfg(target_os = "linux")]
        assert!(datagram.ttl.is_some());
    }

    #[tokio::test]
    async fn test_run_responder_echoes_probes_only() {
        // The test socket holds 127.0.0.1:<port>; the responder shares the
        // port on 0.0.0.0, so echoes to 127.0.0.1 land on the more specific bind.
        let prober = reusable_socket(Ipv4Addr::LOCALHOST, 0);
        let port = prober.local_addr().unwrap().port();
        let responder_addr = SocketAddr::from((RESPONDER_INTERFACE, port));

        let settings = ResponderSettings {
            interface: RESPONDER_INTERFACE,
            group: GROUP,
            port,
            verbose: false,
        };
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { run_responder(&settings, &shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        if task.is_finished() {
            panic!("responder failed to start: {:?}", task.await.unwrap().err());
        }

        let send_time = WireTime::new(1_700_000_000, 42);
        let mut probe = build_probe(3, send_time, 100);
        probe[HEADER_SIZE..].fill(0xAB);
        prober.send_to(&probe, responder_addr).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, src) = timeout(Duration::from_secs(2), prober.recv_from(&mut buf))
            .await
            .expect("no echo received")
            .unwrap();
        assert_eq!(src.port(), port);
        assert_eq!(len, probe.len());
        let header = ProbeHeader::from_bytes(&buf[..len]).unwrap();
        assert_eq!(header.sequence, 3);
        assert_eq!(header.send_time, send_time);
        assert!(header.ttl > 0);
        assert_eq!(&buf[HEADER_SIZE..len], &probe[HEADER_SIZE..]);

        // An echo from another responder, a runt and a datagram from the
        // responder's own address all go unanswered.
        let foreign_echo = build_echo(&probe, 9).unwrap();
        prober.send_to(&foreign_echo, responder_addr).await.unwrap();
        prober.send_to(&[1, 2, 3], responder_addr).await.unwrap();
        let own = UdpSocket::bind((RESPONDER_INTERFACE, 0)).await.unwrap();
        own.send_to(&probe, responder_addr).await.unwrap();

        let nothing = timeout(Duration::from_millis(200), prober.recv_from(&mut buf)).await;
        assert!(nothing.is_err(), "unexpected reply: {:?}", nothing);

        shutdown.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.echoed, 1);
        assert_eq!(stats.ignored, 2);
        assert_eq!(stats.dropped, 1);
        assert!(stats.uptime_seconds > 0.0);
    }
}
