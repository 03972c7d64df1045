use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::connector::{AddressFamily, Fingerprint, TlsMode};

/// Default lifetime of cached DNS answers
pub const DEFAULT_DNS_TTL: Duration = Duration::from_secs(10);
/// Default time an idle connection is kept for reuse
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(15);
/// Default maximum number of connections in use at the same time
pub const DEFAULT_CONNECTION_LIMIT: usize = 100;

/// Configuration of a [`Connector`](crate::Connector)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// How server certificates are checked
    pub tls: TlsMode,

    /// Only accept servers whose leaf certificate has this SHA-256 fingerprint
    pub fingerprint: Option<Fingerprint>,

    /// Cache DNS answers
    pub use_dns_cache: bool,

    /// Lifetime of cached DNS answers, forever if unset
    #[serde(with = "humantime_serde")]
    pub dns_ttl: Option<Duration>,

    /// Address families to connect with
    pub family: AddressFamily,

    /// Local address outgoing connections are bound to
    pub local_addr: Option<IpAddr>,

    /// Close every connection after one request
    pub force_close: bool,

    /// Time an idle connection is kept for reuse
    #[serde(with = "humantime_serde")]
    pub keepalive_timeout: Duration,

    /// Maximum number of connections in use at the same time, `0` for no limit
    pub limit: usize,

    /// Maximum number of connections in use per origin, `0` for no limit
    pub limit_per_host: usize,

    /// Give up on a TCP connection attempt after this long
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    /// HTTP proxy, with optional `user:password` credentials
    pub proxy: Option<Url>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::default(),
            fingerprint: None,
            use_dns_cache: true,
            dns_ttl: Some(DEFAULT_DNS_TTL),
            family: AddressFamily::default(),
            local_addr: None,
            force_close: false,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            limit: DEFAULT_CONNECTION_LIMIT,
            limit_per_host: 0,
            connect_timeout: None,
            proxy: None,
        }
    }
}
