use std::io;

use http::StatusCode;

use crate::ErrorKind;

/// An extension trait to help determine if a failed request is worth
/// retrying.
///
/// Rate limited requests (`429`) are not covered here. They are retried by
/// the rate limiting logic of the client, which knows how long to wait.
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for StatusCode {
    fn should_retry(&self) -> bool {
        matches!(
            *self,
            StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }
}

impl RetryExt for hyper::Error {
    fn should_retry(&self) -> bool {
        // `IncompleteMessage` is raised if the connection is cut while the
        // response is read, `Canceled` and `ChannelClosed` if the server
        // closed a pooled connection before our request went out.
        if self.is_incomplete_message() || self.is_canceled() || self.is_closed() {
            true
        } else if let Some(io_error) = get_source_error_type::<io::Error>(self) {
            should_retry_io(io_error)
        } else {
            false
        }
    }
}

impl RetryExt for ErrorKind {
    #[allow(clippy::match_same_arms)]
    fn should_retry(&self) -> bool {
        match self {
            Self::Io(_) | Self::Tls(_) | Self::DnsResolution { .. } | Self::Timeout => true,
            Self::Hyper(error) => error.should_retry(),
            Self::RejectedStatusCode { status, .. } => status.should_retry(),
            Self::FingerprintMismatch { .. } | Self::ProxyError { .. } => false,
            _ => false,
        }
    }
}

/// Classifies an `io::Error` into retryable or not.
fn should_retry_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
    )
}

/// Downcasts the given err source into T.
fn get_source_error_type<T: std::error::Error + 'static>(
    err: &dyn std::error::Error,
) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }

        source = err.source();
    }
    None
}
