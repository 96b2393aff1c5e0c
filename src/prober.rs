//! Prober event loop.
//!
//! One task multiplexes three wake conditions: cancellation, the next probe
//! deadline and a readable socket. Each wake handles exactly one of them, so
//! a burst of echoes is processed as a series of short iterations with the
//! deadline re-evaluated in between.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::{
    net::UdpSocket,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{Clock, SystemClock, WireTime},
    configuration::ProberSettings,
    packets::{PacketError, ProbeHeader, IP_UDP_OVERHEAD, MAX_DATAGRAM_SIZE},
    registry::{PeerId, PeerRegistry, RttMicros},
    report::{self, Summary},
    scheduler::ProbeScheduler,
    transport::{open_prober_socket, TransportError},
};

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The configured probe count was sent and one more interval elapsed.
    ProbeLimit,
    /// Cancellation was requested, usually by ctrl-c.
    Interrupted,
}

/// One accepted echo, as recorded in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Echo {
    pub peer: PeerId,
    /// Datagram length in bytes.
    pub len: usize,
    pub sequence: u32,
    /// Hop count the responder observed.
    pub ttl: u32,
    pub rtt: RttMicros,
}

impl Echo {
    /// Formats the per-echo line printed in verbose mode.
    pub fn describe(&self) -> String {
        format!(
            "{} bytes from {}: seq={} ttl={} time={} ms",
            self.len,
            self.peer,
            self.sequence,
            self.ttl,
            report::format_ms(self.rtt)
        )
    }
}

/// Parses one received datagram and records it against its sender.
///
/// Datagrams shorter than the probe header are rejected without touching the
/// registry.
pub fn process_echo(
    registry: &mut PeerRegistry,
    data: &[u8],
    src: SocketAddr,
    received_at: WireTime,
) -> Result<Echo, PacketError> {
    let header = ProbeHeader::from_bytes(data)?;
    let rtt = received_at.micros_since(header.send_time);
    let peer = PeerId(src.ip());

    if rtt < 0 {
        log::warn!(
            "Negative RTT of {} us from {} (seq={}): clocks are drifting",
            rtt,
            peer,
            header.sequence
        );
    }

    registry.update(peer, header.sequence, rtt);

    Ok(Echo {
        peer,
        len: data.len(),
        sequence: header.sequence,
        ttl: header.ttl,
        rtt,
    })
}

/// State owned by the event loop: socket, schedule, registry and clock.
pub struct Prober<C: Clock = SystemClock> {
    socket: UdpSocket,
    scheduler: ProbeScheduler,
    registry: PeerRegistry,
    clock: C,
    verbose: bool,
    recv_buf: Vec<u8>,
}

impl Prober<SystemClock> {
    /// Opens the prober socket and prepares a schedule from the settings.
    ///
    /// # Errors
    /// Returns a `TransportError` if the socket cannot be set up.
    pub fn bind(settings: &ProberSettings) -> Result<Self, TransportError> {
        let socket = open_prober_socket(settings.interface, settings.port, settings.ttl)?;
        let target = SocketAddrV4::new(settings.group, settings.port).into();
        let scheduler = ProbeScheduler::new(
            target,
            settings.interval,
            settings.payload_size,
            settings.count,
            Instant::now(),
        );
        Ok(Prober::new(socket, scheduler, SystemClock, settings.verbose))
    }
}

impl<C: Clock> Prober<C> {
    /// Wraps an already opened socket; used directly by tests with loopback sockets.
    pub fn new(socket: UdpSocket, scheduler: ProbeScheduler, clock: C, verbose: bool) -> Self {
        Prober {
            socket,
            scheduler,
            registry: PeerRegistry::new(),
            clock,
            verbose,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Peers seen so far.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Probe schedule, including the number of probes sent.
    pub fn scheduler(&self) -> &ProbeScheduler {
        &self.scheduler
    }

    /// Banner printed before the first probe.
    pub fn banner(&self, payload_size: usize) -> String {
        format!(
            "MPING {} {}({}) bytes of data.",
            self.scheduler.target().ip(),
            payload_size,
            payload_size + IP_UDP_OVERHEAD
        )
    }

    /// Runs until the probe limit is reached or `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between iterations, never while an echo
    /// is being recorded, so the registry is complete when this returns.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Termination {
        loop {
            let deadline = self.scheduler.next_deadline();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    log::info!("Interrupted after {} probes", self.scheduler.sequence_counter());
                    return Termination::Interrupted;
                }

                _ = sleep_until(deadline) => {
                    if self.scheduler.is_exhausted() {
                        log::info!("Probe limit of {} reached", self.scheduler.sequence_counter());
                        return Termination::ProbeLimit;
                    }
                    let now = Instant::now();
                    if self.scheduler.is_due(now) {
                        self.scheduler.emit(&self.socket, &self.clock, now).await;
                    }
                }

                result = self.socket.recv_from(&mut self.recv_buf) => {
                    match result {
                        Ok((len, src)) => {
                            let received_at = self.clock.now();
                            self.handle_datagram(len, src, received_at);
                        }
                        Err(e) => log::warn!("Receive error: {}", e),
                    }
                }
            }
        }
    }

    fn handle_datagram(&mut self, len: usize, src: SocketAddr, received_at: WireTime) {
        match process_echo(&mut self.registry, &self.recv_buf[..len], src, received_at) {
            Ok(echo) => {
                if self.verbose {
                    println!("{}", echo.describe());
                }
            }
            Err(e) => log::debug!("Discarding datagram from {}: {}", src, e),
        }
    }

    /// Builds the final report from the registry and the number of probes sent.
    pub fn summary(&self) -> Summary {
        report::summarize(
            &self.registry,
            self.scheduler.sequence_counter(),
            self.scheduler.target(),
        )
    }
}
