use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde::de::DeserializeOwned;

use crate::{Result, ratelimit::RateLimitHeaders};

/// A fully read response from the Discord API.
///
/// The body is read eagerly so that the underlying connection can go back to
/// the pool before the caller looks at the payload.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) async fn from_response(response: http::Response<Incoming>) -> Result<Self> {
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    #[cfg(test)]
    pub(crate) const fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The response status code
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw response body
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// The response body as text, replacing invalid UTF-8 sequences
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the response body as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The rate limit information Discord attached to this response
    #[must_use]
    pub fn rate_limit(&self) -> RateLimitHeaders {
        RateLimitHeaders::parse(&self.headers)
    }

    /// Whether the peer asked to close the connection after this response
    pub(crate) fn wants_close(headers: &HeaderMap) -> bool {
        headers
            .get(header::CONNECTION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    }
}
