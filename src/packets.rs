//! Probe message layout shared by the prober and the responder.
//!
//! Every datagram starts with a fixed 16-byte header followed by opaque
//! filler. All header fields are big-endian.
//!
//! Wire format:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Send Time (seconds)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Send Time (microseconds)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                              TTL                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload (opaque)                       |
//! ~                                                               ~
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use thiserror::Error;

use crate::clock::WireTime;

/// Size of the fixed probe header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest UDP payload that fits in a single IPv4 datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// IPv4 + UDP header bytes added on the wire, used only for the banner.
pub const IP_UDP_OVERHEAD: usize = 28;

const TTL_OFFSET: usize = 12;

/// Errors that can occur when decoding a probe datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Datagram of {0} bytes is shorter than the {HEADER_SIZE}-byte probe header")]
    TooShort(usize),
}

/// Fixed header of a probe or echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeHeader {
    /// Per-run probe counter, starting at zero.
    pub sequence: u32,
    /// Prober wall-clock time at emission, echoed verbatim.
    pub send_time: WireTime,
    /// Hop count seen by the responder; zero on the outbound probe.
    pub ttl: u32,
}

impl ProbeHeader {
    /// Serializes the header to its 16-byte big-endian wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.send_time.secs.to_be_bytes());
        buf[8..12].copy_from_slice(&self.send_time.micros.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ttl.to_be_bytes());
        buf
    }

    /// Decodes the header from the start of a datagram.
    ///
    /// # Errors
    /// Returns `PacketError::TooShort` if the datagram is shorter than the header.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_SIZE {
            return Err(PacketError::TooShort(buf.len()));
        }
        Ok(Self {
            sequence: read_u32(buf, 0),
            send_time: WireTime::new(read_u32(buf, 4), read_u32(buf, 8)),
            ttl: read_u32(buf, TTL_OFFSET),
        })
    }

    /// Returns true for an outbound probe. Echoes always carry a non-zero TTL.
    pub fn is_probe(&self) -> bool {
        self.ttl == 0
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Builds an outbound probe of `size` bytes: header with TTL zero, then
/// zeroed filler.
///
/// `size` is expected to be validated against `HEADER_SIZE..=MAX_DATAGRAM_SIZE`;
/// a smaller value still yields a full header.
pub fn build_probe(sequence: u32, send_time: WireTime, size: usize) -> Vec<u8> {
    let header = ProbeHeader {
        sequence,
        send_time,
        ttl: 0,
    };
    let mut buf = vec![0u8; size.max(HEADER_SIZE)];
    buf[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    buf
}

/// Builds the echo for a received probe.
///
/// The echo has the full received length. Sequence, send time and payload are
/// copied unchanged; only the TTL field is overwritten with the observed hop count.
///
/// # Errors
/// Returns `PacketError::TooShort` if the probe is shorter than the header.
pub fn build_echo(probe: &[u8], ttl: u8) -> Result<Vec<u8>, PacketError> {
    if probe.len() < HEADER_SIZE {
        return Err(PacketError::TooShort(probe.len()));
    }
    let mut echo = probe.to_vec();
    echo[TTL_OFFSET..HEADER_SIZE].copy_from_slice(&(ttl as u32).to_be_bytes());
    Ok(echo)
}
