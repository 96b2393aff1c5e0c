//! Probe transmission scheduling.

use std::{net::SocketAddr, time::Duration};

use tokio::{net::UdpSocket, time::Instant};

use crate::{clock::Clock, packets::build_probe};

/// Decides when the next probe is due and emits it.
///
/// Deadlines are absolute instants recomputed from the time of each emission,
/// so a slow iteration delays the next probe instead of queueing extra ones.
#[derive(Debug)]
pub struct ProbeScheduler {
    target: SocketAddr,
    interval: Duration,
    payload_size: usize,
    /// Zero means unbounded.
    probe_limit: u32,
    sequence_counter: u32,
    next_deadline: Instant,
}

impl ProbeScheduler {
    /// Creates a scheduler whose first probe is due at `start`.
    pub fn new(
        target: SocketAddr,
        interval: Duration,
        payload_size: usize,
        probe_limit: u32,
        start: Instant,
    ) -> Self {
        ProbeScheduler {
            target,
            interval,
            payload_size,
            probe_limit,
            sequence_counter: 0,
            next_deadline: start,
        }
    }

    /// Returns true when a probe should be sent at `now`.
    ///
    /// Never true again once the probe limit has been reached.
    pub fn is_due(&self, now: Instant) -> bool {
        !self.is_exhausted() && now >= self.next_deadline
    }

    /// Returns true once `probe_limit` probes have been emitted.
    pub fn is_exhausted(&self) -> bool {
        self.probe_limit > 0 && self.sequence_counter >= self.probe_limit
    }

    /// Instant at which the next probe is due.
    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Number of probes emitted so far, which is also the next sequence number.
    pub fn sequence_counter(&self) -> u32 {
        self.sequence_counter
    }

    /// Group address and port probes are sent to.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends the next probe and advances the schedule.
    ///
    /// A failed send is logged and otherwise treated like a lost probe: the
    /// sequence number is consumed and the next deadline is still set.
    pub async fn emit(&mut self, socket: &UdpSocket, clock: &impl Clock, now: Instant) -> u32 {
        let sequence = self.sequence_counter;
        let probe = build_probe(sequence, clock.now(), self.payload_size);

        match socket.send_to(&probe, self.target).await {
            Ok(_) => log::trace!("Sent probe seq={} to {}", sequence, self.target),
            Err(e) => log::warn!("Failed to send probe {} to {}: {}", sequence, self.target, e),
        }

        self.sequence_counter += 1;
        self.next_deadline = now + self.interval;
        sequence
    }
}
