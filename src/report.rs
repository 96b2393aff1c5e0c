//! Final per-peer summary and its output formats.
//!
//! The summary is built from the peer registry after the event loop has
//! stopped, so it always sees a registry that is no longer being written.

use std::{fmt::Write as _, net::SocketAddr};

use crate::registry::{PeerRecord, PeerRegistry, RttMicros};

/// Output format for the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One human-readable line per peer.
    #[default]
    Text,
    /// A single JSON object.
    Json,
    /// Header row plus one row per peer.
    Csv,
}

/// Statistics for one peer at termination time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PeerSummary {
    pub peer: String,
    pub replies: u32,
    pub last_sequence: u32,
    pub min_rtt_us: RttMicros,
    pub avg_rtt_us: RttMicros,
    pub max_rtt_us: RttMicros,
    pub lost: u32,
    pub loss_percent: u32,
}

/// Serializable report covering every peer seen during the run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Summary {
    pub target: String,
    pub probes_sent: u32,
    pub peers: Vec<PeerSummary>,
}

/// Number of probes a peer failed to answer.
///
/// Saturates at zero when duplicated echoes push `replies` above `sent`.
pub fn lost_probes(sent: u32, replies: u32) -> u32 {
    sent.saturating_sub(replies)
}

/// Integer loss percentage, truncated toward zero. Zero when nothing was sent.
pub fn loss_percent(sent: u32, replies: u32) -> u32 {
    if sent == 0 {
        return 0;
    }
    (lost_probes(sent, replies) as u64 * 100 / sent as u64) as u32
}

fn summarize_peer(record: &PeerRecord, probes_sent: u32) -> PeerSummary {
    let (min_rtt_us, avg_rtt_us, max_rtt_us) = match record.avg_rtt() {
        Some(avg) => (record.min_rtt, avg, record.max_rtt),
        None => (0, 0, 0),
    };
    PeerSummary {
        peer: record.identity().to_string(),
        replies: record.reply_count,
        last_sequence: record.last_sequence,
        min_rtt_us,
        avg_rtt_us,
        max_rtt_us,
        lost: lost_probes(probes_sent, record.reply_count),
        loss_percent: loss_percent(probes_sent, record.reply_count),
    }
}

/// Builds the summary for every peer in the registry.
pub fn summarize(registry: &PeerRegistry, probes_sent: u32, target: SocketAddr) -> Summary {
    Summary {
        target: target.to_string(),
        probes_sent,
        peers: registry
            .iter()
            .map(|record| summarize_peer(record, probes_sent))
            .collect(),
    }
}

/// Formats microseconds as milliseconds with three decimals, e.g. `12.345`.
pub fn format_ms(micros: RttMicros) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    format!("{}{}.{:03}", sign, abs / 1000, abs % 1000)
}

impl Summary {
    /// Renders the report in the given format.
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => self.render_text(),
            OutputFormat::Json => self.render_json(),
            OutputFormat::Csv => self.render_csv(),
        }
    }

    /// Prints the report to stdout.
    pub fn print(&self, format: OutputFormat) {
        print!("{}", self.render(format));
    }

    fn render_text(&self) -> String {
        let mut out = String::from("\n");
        for p in &self.peers {
            let _ = writeln!(
                out,
                "{}: rtt min/avg/max: {}/{}/{} ms, loss: {}% ({} packets)",
                p.peer,
                format_ms(p.min_rtt_us),
                format_ms(p.avg_rtt_us),
                format_ms(p.max_rtt_us),
                p.loss_percent,
                p.lost
            );
        }
        out
    }

    fn render_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json + "\n",
            Err(e) => {
                log::warn!("Failed to serialize report: {}", e);
                String::new()
            }
        }
    }

    fn render_csv(&self) -> String {
        let mut out = String::from(
            "peer,replies,last_sequence,min_rtt_ms,avg_rtt_ms,max_rtt_ms,lost,loss_percent\n",
        );
        for p in &self.peers {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{},{}",
                p.peer,
                p.replies,
                p.last_sequence,
                format_ms(p.min_rtt_us),
                format_ms(p.avg_rtt_us),
                format_ms(p.max_rtt_us),
                p.lost,
                p.loss_percent
            );
        }
        out
    }
}

/// Counters printed by the responder when it is interrupted.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ResponderStats {
    /// Datagrams read from the socket.
    pub received: u64,
    /// Echoes sent back.
    pub echoed: u64,
    /// Echoes, and datagrams from the responder itself or the unspecified address.
    pub ignored: u64,
    /// Short datagrams and failed sends.
    pub dropped: u64,
    /// Seconds between startup and shutdown.
    pub uptime_seconds: f64,
}

impl ResponderStats {
    /// Renders the counters as text.
    pub fn render(&self) -> String {
        format!(
            "\n--- MPING Responder Statistics ---\n\
             Uptime: {:.1} seconds\n\
             Datagrams received: {}\n\
             Echoes sent: {}\n\
             Ignored: {}\n\
             Dropped: {}\n",
            self.uptime_seconds, self.received, self.echoed, self.ignored, self.dropped
        )
    }

    /// Prints the counters to stdout.
    pub fn print(&self) {
        print!("{}", self.render());
    }
}
