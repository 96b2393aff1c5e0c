//! Per-peer round-trip statistics.

use std::{collections::BTreeMap, fmt, net::IpAddr};

/// Round-trip time in microseconds. Signed: a responder whose clock runs ahead
/// can produce negative samples, which are kept as-is.
pub type RttMicros = i64;

/// Network identity of a responding peer: its source IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub IpAddr);

impl From<IpAddr> for PeerId {
    fn from(addr: IpAddr) -> Self {
        PeerId(addr)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accumulated statistics for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    identity: PeerId,
    /// Most recently echoed sequence number.
    pub last_sequence: u32,
    /// Total echoes received from this peer.
    pub reply_count: u32,
    /// Smallest RTT seen.
    pub min_rtt: RttMicros,
    /// Largest RTT seen.
    pub max_rtt: RttMicros,
    /// Running sum; only divided when the report is built.
    pub total_rtt: RttMicros,
}

impl PeerRecord {
    fn new(identity: PeerId) -> Self {
        PeerRecord {
            identity,
            last_sequence: 0,
            reply_count: 0,
            min_rtt: RttMicros::MAX,
            max_rtt: RttMicros::MIN,
            total_rtt: 0,
        }
    }

    /// Address the peer is keyed on.
    pub fn identity(&self) -> PeerId {
        self.identity
    }

    fn record(&mut self, sequence: u32, rtt: RttMicros) {
        self.min_rtt = self.min_rtt.min(rtt);
        self.max_rtt = self.max_rtt.max(rtt);
        self.total_rtt = self.total_rtt.saturating_add(rtt);
        self.reply_count += 1;
        self.last_sequence = sequence;
    }

    /// Mean RTT, or `None` before the first echo.
    pub fn avg_rtt(&self) -> Option<RttMicros> {
        if self.reply_count == 0 {
            return None;
        }
        Some(self.total_rtt / self.reply_count as RttMicros)
    }
}

/// Registry of every peer that has echoed at least one probe.
///
/// Owned by the event loop, which is its only writer. Records are created on
/// first sight and never removed during a run.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<PeerId, PeerRecord>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an echo from `identity`, creating the peer on first sight.
    pub fn update(&mut self, identity: PeerId, sequence: u32, rtt: RttMicros) -> &PeerRecord {
        let record = self.peers.entry(identity).or_insert_with(|| {
            log::debug!("New peer {}", identity);
            PeerRecord::new(identity)
        });
        record.record(sequence, rtt);
        record
    }

    /// Looks up the record for `identity`.
    pub fn get(&self, identity: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(identity)
    }

    /// Iterates over all peers in address order.
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Number of distinct peers seen.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true before the first echo.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
