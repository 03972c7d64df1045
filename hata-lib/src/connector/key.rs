use std::fmt;

use url::{Host, Url};

use crate::connector::{Fingerprint, TlsMode};
use crate::{ErrorKind, Result};

/// The origin a request is sent to.
///
/// Hostnames are normalized to lowercase, IPv6 literals are stored without
/// brackets and the port defaults to the one of the scheme.
///
/// # Examples
///
/// ```
/// use hata_lib::connector::Target;
/// use url::Url;
///
/// let url = Url::parse("https://Discord.com/api/v10/gateway").unwrap();
/// let target = Target::try_from(&url).unwrap();
/// assert_eq!(target.host, "discord.com");
/// assert_eq!(target.port, 443);
/// assert!(target.is_tls);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Hostname or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Whether the connection is wrapped in TLS
    pub is_tls: bool,
}

impl Target {
    /// `host:port`, with IPv6 literals in brackets
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl TryFrom<&Url> for Target {
    type Error = ErrorKind;

    fn try_from(url: &Url) -> Result<Self> {
        let is_tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(ErrorKind::UnsupportedScheme(other.to_owned())),
        };

        let host = match url.host().ok_or(ErrorKind::InvalidUrlHost)? {
            Host::Domain(domain) => domain.to_lowercase(),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };
        let port = url.port_or_known_default().ok_or(ErrorKind::InvalidUrlHost)?;

        Ok(Self { host, port, is_tls })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.is_tls { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.authority())
    }
}

/// Identity of a pooled connection.
///
/// Connections are only reused for requests with an equal key: same origin,
/// same TLS settings and same proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    /// The origin requests are sent to
    pub target: Target,
    /// Certificate verification in effect
    pub tls_mode: TlsMode,
    /// Pinned certificate fingerprint, if any
    pub fingerprint: Option<Fingerprint>,
    /// `(host, port)` of the HTTP proxy the connection goes through
    pub proxy: Option<(String, u16)>,
}

impl ConnectionKey {
    /// The host this connection talks to
    #[must_use]
    pub fn host(&self) -> &str {
        &self.target.host
    }

    /// The port this connection talks to
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.target.port
    }

    /// Whether the connection is wrapped in TLS
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.target.is_tls
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        if let Some((host, port)) = &self.proxy {
            write!(f, " via {host}:{port}")?;
        }
        Ok(())
    }
}
