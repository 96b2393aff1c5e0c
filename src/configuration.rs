pub use clap::Parser;
use std::{net::Ipv4Addr, time::Duration};

use clap::ArgGroup;
use thiserror::Error;

use crate::{
    packets::{HEADER_SIZE, MAX_DATAGRAM_SIZE},
    report::OutputFormat,
};

/// Group used when `-g` is not given.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(226, 1, 1, 1);
/// Port used for probes and echoes when `-p` is not given.
pub const DEFAULT_PORT: u16 = 4322;
/// Multicast TTL of outgoing probes.
pub const DEFAULT_TTL: u32 = 64;
/// Probe size in bytes, header included.
pub const DEFAULT_SIZE: usize = 1024;
/// Milliseconds between probes.
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
/// Lowest accepted port; privileged ports are refused.
pub const MIN_PORT: u16 = 1024;
/// Largest accepted probe count.
pub const MAX_COUNT: u32 = 65535;

/// Reasons a command line is rejected before any socket is opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid port {0} - must be between {MIN_PORT} and 65535")]
    InvalidPort(u16),
    #[error("Invalid multicast group {0} - address must be multicast")]
    NotMulticast(Ipv4Addr),
    #[error("Invalid interval - must be greater than 0")]
    InvalidInterval,
    #[error("Invalid count {0} - must be between 1 and {MAX_COUNT}")]
    InvalidCount(u32),
    #[error("Invalid TTL {0} - must be between 1 and 255")]
    InvalidTtl(u32),
    #[error("Invalid payload size {0} - must be between {HEADER_SIZE} and {MAX_DATAGRAM_SIZE}")]
    InvalidSize(usize),
    #[error("Unable to set {0} in responder mode")]
    ProberOnly(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "mping", author, version, about = "Multicast ping", long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["listen", "send"])))]
pub struct Configuration {
    /// Run as responder: echo every probe received on the group
    #[arg(short = 'l', long)]
    pub listen: bool,
    /// Run as prober: send probes to the group and collect echoes
    #[arg(short = 's', long)]
    pub send: bool,
    /// Address of the local interface used for multicast
    #[arg(short = 'I', long)]
    pub interface: Ipv4Addr,
    /// Multicast group
    #[arg(short = 'g', long, default_value_t = DEFAULT_GROUP)]
    pub group: Ipv4Addr,
    /// UDP port for probes and echoes
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Interval between probes in milliseconds [default: 1000]
    #[arg(short = 'i', long)]
    pub interval: Option<u64>,
    /// Stop after sending this many probes
    #[arg(short = 'c', long)]
    pub count: Option<u32>,
    /// TTL of outgoing multicast probes [default: 64]
    #[arg(short = 'T', long)]
    pub ttl: Option<u32>,
    /// Probe size in bytes, header included [default: 1024]
    #[arg(short = 'S', long)]
    pub size: Option<usize>,
    /// Only print the final summary
    #[arg(short = 'q', long)]
    pub quiet: bool,
    /// Format of the final summary
    #[arg(short = 'o', long, value_enum)]
    pub output_format: Option<OutputFormat>,
}

/// Validated prober parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProberSettings {
    pub interface: Ipv4Addr,
    pub group: Ipv4Addr,
    pub port: u16,
    pub interval: Duration,
    /// Zero means unbounded.
    pub count: u32,
    pub ttl: u32,
    pub payload_size: usize,
    pub verbose: bool,
    pub output_format: OutputFormat,
}

/// Validated responder parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderSettings {
    pub interface: Ipv4Addr,
    pub group: Ipv4Addr,
    pub port: u16,
    pub verbose: bool,
}

/// Validated command line, one variant per role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Probe(ProberSettings),
    Respond(ResponderSettings),
}

impl Configuration {
    /// Checks option ranges and mode compatibility.
    ///
    /// # Errors
    /// Returns the first `ConfigurationError` found.
    pub fn validate(&self) -> Result<RunMode, ConfigurationError> {
        if self.port < MIN_PORT {
            return Err(ConfigurationError::InvalidPort(self.port));
        }
        if !self.group.is_multicast() {
            return Err(ConfigurationError::NotMulticast(self.group));
        }

        if self.listen {
            self.validate_responder().map(RunMode::Respond)
        } else {
            self.validate_prober().map(RunMode::Probe)
        }
    }

    fn validate_responder(&self) -> Result<ResponderSettings, ConfigurationError> {
        let prober_only = [
            ("interval", self.interval.is_some()),
            ("probe count", self.count.is_some()),
            ("TTL", self.ttl.is_some()),
            ("payload size", self.size.is_some()),
            ("output format", self.output_format.is_some()),
        ];
        if let Some((name, _)) = prober_only.iter().find(|(_, set)| *set) {
            return Err(ConfigurationError::ProberOnly(*name));
        }

        Ok(ResponderSettings {
            interface: self.interface,
            group: self.group,
            port: self.port,
            verbose: !self.quiet,
        })
    }

    fn validate_prober(&self) -> Result<ProberSettings, ConfigurationError> {
        let interval_ms = self.interval.unwrap_or(DEFAULT_INTERVAL_MS);
        if interval_ms == 0 {
            return Err(ConfigurationError::InvalidInterval);
        }

        let count = match self.count {
            Some(c) if c == 0 || c > MAX_COUNT => return Err(ConfigurationError::InvalidCount(c)),
            Some(c) => c,
            None => 0,
        };

        let ttl = self.ttl.unwrap_or(DEFAULT_TTL);
        if !(1..=255).contains(&ttl) {
            return Err(ConfigurationError::InvalidTtl(ttl));
        }

        let payload_size = self.size.unwrap_or(DEFAULT_SIZE);
        if !(HEADER_SIZE..=MAX_DATAGRAM_SIZE).contains(&payload_size) {
            return Err(ConfigurationError::InvalidSize(payload_size));
        }

        Ok(ProberSettings {
            interface: self.interface,
            group: self.group,
            port: self.port,
            interval: Duration::from_millis(interval_ms),
            count,
            ttl,
            payload_size,
            verbose: !self.quiet,
            output_format: self.output_format.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Configuration {
        Configuration::try_parse_from(std::iter::once("mping").chain(args.iter().copied()))
            .unwrap()
    }

    fn prober(args: &[&str]) -> ProberSettings {
        match parse(args).validate().unwrap() {
            RunMode::Probe(settings) => settings,
            other => panic!("expected prober mode, got {:?}", other),
        }
    }

    #[test]
    fn validate_prober_defaults() {
        let settings = prober(&["-s", "-I", "10.0.0.1"]);

        assert_eq!(settings.interface, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(settings.group, DEFAULT_GROUP);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.count, 0);
        assert_eq!(settings.ttl, DEFAULT_TTL);
        assert_eq!(settings.payload_size, DEFAULT_SIZE);
        assert!(settings.verbose);
        assert_eq!(settings.output_format, OutputFormat::Text);
    }

    #[test]
    fn validate_prober_explicit_options() {
        let settings = prober(&[
            "-s", "-I", "10.0.0.1", "-g", "239.1.2.3", "-p", "5000", "-i", "250", "-c", "5",
            "-T", "8", "-S", "64", "-q", "-o", "json",
        ]);

        assert_eq!(settings.group, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.interval, Duration::from_millis(250));
        assert_eq!(settings.count, 5);
        assert_eq!(settings.ttl, 8);
        assert_eq!(settings.payload_size, 64);
        assert!(!settings.verbose);
        assert_eq!(settings.output_format, OutputFormat::Json);
    }

    #[test]
    fn validate_responder() {
        let mode = parse(&["-l", "-I", "192.168.0.2", "-q"]).validate().unwrap();
        assert_eq!(
            mode,
            RunMode::Respond(ResponderSettings {
                interface: Ipv4Addr::new(192, 168, 0, 2),
                group: DEFAULT_GROUP,
                port: DEFAULT_PORT,
                verbose: false,
            })
        );
    }

    #[test]
    fn validate_size_below_header_rejected() {
        let err = parse(&["-s", "-I", "10.0.0.1", "-S", "15"]).validate().unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidSize(15));

        let err = parse(&["-s", "-I", "10.0.0.1", "-S", "65508"]).validate().unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidSize(65508));

        assert!(parse(&["-s", "-I", "10.0.0.1", "-S", "16"]).validate().is_ok());
    }

    #[test]
    fn validate_port_range() {
        let err = parse(&["-s", "-I", "10.0.0.1", "-p", "1023"]).validate().unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidPort(1023));
        assert!(parse(&["-s", "-I", "10.0.0.1", "-p", "65535"]).validate().is_ok());
    }

    #[test]
    fn validate_group_must_be_multicast() {
        let err = parse(&["-l", "-I", "10.0.0.1", "-g", "10.1.1.1"]).validate().unwrap_err();
        assert_eq!(err, ConfigurationError::NotMulticast(Ipv4Addr::new(10, 1, 1, 1)));
    }

    #[test]
    fn validate_interval_count_ttl() {
        let cases: &[(&[&str], ConfigurationError)] = &[
            (&["-i", "0"], ConfigurationError::InvalidInterval),
            (&["-c", "0"], ConfigurationError::InvalidCount(0)),
            (&["-c", "65536"], ConfigurationError::InvalidCount(65536)),
            (&["-T", "0"], ConfigurationError::InvalidTtl(0)),
            (&["-T", "256"], ConfigurationError::InvalidTtl(256)),
        ];

        for (extra, expected) in cases {
            let mut args = vec!["-s", "-I", "10.0.0.1"];
            args.extend_from_slice(extra);
            assert_eq!(&parse(&args).validate().unwrap_err(), expected, "args {:?}", args);
        }
    }

    #[test]
    fn validate_prober_options_rejected_in_responder_mode() {
        let cases: &[(&[&str], &str)] = &[
            (&["-i", "100"], "interval"),
            (&["-c", "3"], "probe count"),
            (&["-T", "4"], "TTL"),
            (&["-S", "64"], "payload size"),
            (&["-o", "csv"], "output format"),
        ];

        for (extra, name) in cases {
            let mut args = vec!["-l", "-I", "10.0.0.1"];
            args.extend_from_slice(extra);
            assert_eq!(
                parse(&args).validate().unwrap_err(),
                ConfigurationError::ProberOnly(*name)
            );
        }
    }

    #[test]
    fn parse_requires_exactly_one_mode() {
        assert!(Configuration::try_parse_from(["mping", "-I", "10.0.0.1"]).is_err());
        assert!(Configuration::try_parse_from(["mping", "-l", "-s", "-I", "10.0.0.1"]).is_err());
    }

    #[test]
    fn parse_requires_interface() {
        assert!(Configuration::try_parse_from(["mping", "-s"]).is_err());
        assert!(Configuration::try_parse_from(["mping", "-s", "-I", "not-an-address"]).is_err());
    }
}
