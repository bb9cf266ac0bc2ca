//! Relay configuration.
//!
//! Transport specs and participant lists arrive as command-line strings; this
//! module turns them into typed values and opens the transports they name.

use std::{
    io::Write,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use tickrelay_core::{TcpAcceptor, TcpTransport, Transport, TransportError, UdsTransport};

use crate::{
    error::ConfigError,
    status::{Status, StatusWriter},
};

/// How one fabric is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// `tcpl:PORT`: listen for stream connections on all interfaces
    TcpListen(u16),
    /// `tcpc:HOST:PORT`: dial a listening stream transport
    TcpConnect {
        /// Host name or IP literal (IPv6 literals keep their brackets)
        host: String,
        /// Port
        port: u16,
    },
    /// `uds:PATH`: accept one local sequenced-packet socket per participant
    Uds(PathBuf),
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Parse a port in 1..=65535.
pub fn parse_port(text: &str) -> Result<u16, ConfigError> {
    match text.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(text.to_string())),
    }
}

impl FromStr for TransportSpec {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        if let Some(port) = strip_prefix_ignore_case(spec, "tcpl:") {
            return Ok(Self::TcpListen(parse_port(port)?));
        }

        if let Some(target) = strip_prefix_ignore_case(spec, "tcpc:") {
            let (host, port) =
                target.rsplit_once(':').ok_or_else(|| ConfigError::InvalidTarget(target.into()))?;
            if host.is_empty() {
                return Err(ConfigError::InvalidTarget(target.into()));
            }
            return Ok(Self::TcpConnect { host: host.to_string(), port: parse_port(port)? });
        }

        if let Some(path) = strip_prefix_ignore_case(spec, "uds:") {
            if path.is_empty() {
                return Err(ConfigError::EmptyPath);
            }
            return Ok(Self::Uds(PathBuf::from(path)));
        }

        Err(ConfigError::UnknownTransport(spec.to_string()))
    }
}

impl std::fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TcpListen(port) => write!(f, "tcpl:{port}"),
            Self::TcpConnect { host, port } => write!(f, "tcpc:{host}:{port}"),
            Self::Uds(path) => write!(f, "uds:{}", path.display()),
        }
    }
}

impl TransportSpec {
    /// Open the transport for `names`, blocking until every participant has
    /// connected.
    ///
    /// A listening stream transport emits [`Status::Listening`] once it is
    /// bound.
    pub fn open<W: Write>(
        &self,
        names: &[String],
        status: &mut StatusWriter<W>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match self {
            Self::TcpListen(port) => {
                let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, *port));
                let acceptor = TcpAcceptor::bind(addr, names)?;
                status.emit(Status::Listening)?;
                Ok(Box::new(acceptor.accept_all()?))
            },
            Self::TcpConnect { host, port } => {
                Ok(Box::new(TcpTransport::connect(format!("{host}:{port}").as_str(), names)?))
            },
            Self::Uds(path) => Ok(Box::new(UdsTransport::listen(path, names)?)),
        }
    }
}

/// Upstream and downstream participant name lists, index-aligned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParticipantNames {
    /// Names used on the upstream fabric
    pub upstream: Vec<String>,
    /// Names used on the downstream fabric
    pub downstream: Vec<String>,
}

impl ParticipantNames {
    /// Parse positional arguments.
    ///
    /// Each argument is a comma-separated list of items; an item is either
    /// `name` (same on both fabrics) or `upstreamName:downstreamName`.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigError> {
        let mut names = Self::default();

        for item in args.iter().flat_map(|arg| arg.as_ref().split(',')) {
            let (up, down) = item.split_once(':').unwrap_or((item, item));
            if up.is_empty() || down.is_empty() {
                return Err(ConfigError::InvalidName(item.to_string()));
            }
            names.upstream.push(up.to_string());
            names.downstream.push(down.to_string());
        }

        if names.upstream.is_empty() {
            return Err(ConfigError::NoParticipants);
        }
        Ok(names)
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.upstream.len()
    }

    /// True if no participants are configured.
    pub fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }
}

/// Everything needed to start a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upstream fabric
    pub upstream: TransportSpec,
    /// Downstream fabric
    pub downstream: TransportSpec,
    /// Participant names per fabric
    pub names: ParticipantNames,
    /// Initialize downstream before upstream
    pub invert_order: bool,
    /// Sync service port, if enabled
    pub sync_port: Option<u16>,
}
