use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

/// Possible errors when talking to the Discord API through `hata_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Any form of I/O error while dialing or talking to a peer.
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
    /// The resolver failed to look up a hostname.
    ///
    /// The source is shared because a single failed lookup is handed to every
    /// caller that was waiting for it.
    #[error("Cannot resolve host `{host}`: {source}")]
    DnsResolution {
        /// The hostname that was looked up
        host: String,
        /// The error reported by the resolver
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The lookup succeeded, but returned no address of the configured family
    #[error("No usable address found for host `{0}`")]
    NoAddresses(String),
    /// The TLS layer rejected the configuration or the handshake
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    /// The host cannot be used as a TLS server name
    #[error("`{0}` is not a valid TLS server name")]
    InvalidServerName(String),
    /// A certificate fingerprint could not be parsed
    #[error("Invalid certificate fingerprint: {0}")]
    InvalidFingerprint(String),
    /// The peer certificate does not match the pinned fingerprint
    #[error("Certificate fingerprint mismatch for `{host}`: expected {expected}, got {got}")]
    FingerprintMismatch {
        /// The host that presented the certificate
        host: String,
        /// Hex encoded pinned fingerprint
        expected: String,
        /// Hex encoded fingerprint of the presented certificate
        got: String,
    },
    /// The HTTP proxy answered a `CONNECT` with something else than `200`
    #[error("Proxy refused to open a tunnel to `{target}`: {status} {reason}")]
    ProxyError {
        /// `host:port` the tunnel was requested for
        target: String,
        /// Status code returned by the proxy
        status: u16,
        /// Reason phrase returned by the proxy
        reason: String,
    },
    /// The connector was closed and cannot hand out connections anymore
    #[error("Connector is closed")]
    ConnectorClosed,
    /// HTTP/1.1 protocol error reported by hyper
    #[error("HTTP protocol error: {0}")]
    Hyper(#[from] hyper::Error),
    /// The request could not be assembled
    #[error("Cannot build request: {0}")]
    BuildRequestError(#[from] http::Error),
    /// The given header could not be parsed.
    /// A possible error when converting a `HeaderValue` from a string or byte
    /// slice.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The given string can not be parsed into a valid URL
    #[error("Cannot parse URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// An URL with an invalid host was found
    #[error("URL is missing a host")]
    InvalidUrlHost,
    /// Only `http` and `https` can be requested
    #[error("Unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),
    /// Discord answered with a status code that is neither a success nor
    /// retryable, or retries ran out
    #[error("Rejected status code: {status}")]
    RejectedStatusCode {
        /// The final status code
        status: StatusCode,
        /// The raw response body, usually a JSON error object
        body: Bytes,
    },
    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// The response body is not the expected JSON
    #[error("Cannot decode response body: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorKind {
    /// Return the status code of a rejected request, if this is one
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::RejectedStatusCode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error happened while establishing a connection, before any
    /// byte of the request was sent
    #[must_use]
    pub const fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::DnsResolution { .. }
                | Self::NoAddresses(_)
                | Self::Tls(_)
                | Self::FingerprintMismatch { .. }
                | Self::ProxyError { .. }
        )
    }
}

impl From<tokio::time::error::Elapsed> for ErrorKind {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
