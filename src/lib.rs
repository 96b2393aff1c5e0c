//! mping - multicast ping.
//!
//! A prober sends timestamped, sequence-numbered probes to a multicast group
//! and collects the unicast echoes sent back by every responder listening on
//! that group. Round-trip time and loss are tracked per responder.
//!
//! # Usage
//!
//! Run as a responder:
//! ```bash
//! mping -l -I 192.168.1.10
//! ```
//!
//! Run as a prober, sending five probes:
//! ```bash
//! mping -s -I 192.168.1.20 -c 5
//! ```

/// Wall-clock timestamps carried in probes.
pub mod clock;
/// Command-line configuration and validation.
pub mod configuration;
/// Probe header layout and encoding.
pub mod packets;
/// Prober event loop and echo handling.
pub mod prober;
/// Per-responder statistics.
pub mod registry;
/// Final summary and its output formats.
pub mod report;
/// Responder echo loop.
pub mod responder;
/// Probe pacing and emission.
pub mod scheduler;
/// Socket setup for both roles.
pub mod transport;
