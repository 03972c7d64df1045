//! Rate limited HTTP client for the Discord REST API.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` sends requests through a [`RateLimiter`] and a [`Connector`] and
//! retries them when Discord asks to slow down. `ClientBuilder` exposes a
//! finer level of granularity for building a `Client`.
#![allow(clippy::default_trait_access)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::Full;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use typed_builder::TypedBuilder;
use url::Url;

use crate::connector::{Connection, ConnectorConfig, Resolver};
use crate::ratelimit::{RateLimitConfig, RateLimiter, RatelimitGroup, parse_retry_after};
use crate::retry::RetryExt;
use crate::{Connector, ErrorKind, Response, Result};

/// Default base URL of the Discord REST API
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10/";
/// Default number of retries before a request is deemed as failed, 5.
pub const DEFAULT_MAX_RETRIES: u64 = 5;
/// Default wait time between retries of failed requests, growing linearly, 1s.
pub const DEFAULT_RETRY_WAIT_TIME: Duration = Duration::from_secs(1);
/// Default user agent, in the format Discord asks bots to use.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/HuyaneMatsu/hata, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Builder for [`Client`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// Bot token sent as `Authorization: Bot <token>`.
    ///
    /// Requests are sent without authorization if unset.
    token: Option<SecretString>,
    /// Base URL request paths are resolved against.
    #[builder(default_code = "String::from(DEFAULT_API_BASE)")]
    api_base: String,
    /// User-agent sent with every request.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Maximum number of retries per request before returning an error.
    ///
    /// Rate limited responses count as tries as well.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u64,
    /// Base wait time between retries of failed requests.
    ///
    /// The n-th retry waits n times this long.
    #[builder(default = DEFAULT_RETRY_WAIT_TIME)]
    retry_wait_time: Duration,
    /// Timeout of a single try, from connecting to reading the whole body.
    timeout: Option<Duration>,
    /// Headers sent with every request.
    custom_headers: HeaderMap,
    /// Connection pool settings.
    connector: ConnectorConfig,
    /// Rate limiting settings.
    rate_limit: RateLimitConfig,
    /// Hostname resolution, the system resolver if unset.
    resolver: Option<Arc<dyn Resolver>>,
}

impl Default for ClientBuilder {
    #[must_use]
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The API base is not a valid URL.
    /// - The user-agent or the token are not valid header values.
    /// - The connector cannot be created.
    pub fn client(self) -> Result<Client> {
        let Self {
            token,
            api_base,
            user_agent,
            custom_headers: mut headers,
            ..
        } = self;

        let mut api_base = Url::parse(&api_base)?;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        headers.insert(header::USER_AGENT, HeaderValue::from_str(&user_agent)?);
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bot {}", token.expose_secret()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let connector = match self.resolver {
            Some(resolver) => Connector::with_resolver(self.connector, resolver)?,
            None => Connector::new(self.connector)?,
        };

        Ok(Client {
            api_base,
            headers,
            connector,
            limiter: Arc::new(RateLimiter::with_config(self.rate_limit)),
            max_retries: self.max_retries,
            retry_wait_time: self.retry_wait_time,
            timeout: self.timeout,
        })
    }
}

/// Body of a `429 Too Many Requests` response
#[derive(Debug, Deserialize)]
struct RateLimited {
    /// Milliseconds
    retry_after: f64,
    #[serde(default)]
    global: bool,
}

/// Sends requests to the Discord REST API.
///
/// Every request waits for the global rate limit, then for its own
/// [`RatelimitHandler`](crate::RatelimitHandler) before it is sent.
/// Responses feed their rate limit headers back into the handler.
///
/// Clones share the connection pool and the rate limit state.
///
/// See [`ClientBuilder`] which contains sane defaults for all configuration options.
#[derive(Debug, Clone)]
pub struct Client {
    /// Base URL request paths are resolved against
    api_base: Url,
    /// Headers sent with every request, including authorization
    headers: HeaderMap,
    /// Pool the requests are sent through
    connector: Connector,
    /// Rate limit state of this session
    limiter: Arc<RateLimiter>,
    /// Maximum number of retries per request before returning an error.
    max_retries: u64,
    /// Base wait time between retries
    retry_wait_time: Duration,
    /// Timeout of a single try
    timeout: Option<Duration>,
}

impl Client {
    /// Send a request to `path`, relative to the API base, rate limited by the
    /// scope `limiter_id` of `group`.
    ///
    /// `body` is sent as JSON.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - `path` does not form a valid URL with the API base.
    /// - The response has a status code other than 2xx-304 that is not
    ///   retryable, or retries ran out.
    /// - Connecting or sending failed and retries ran out.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        group: &RatelimitGroup,
        limiter_id: u64,
        body: Option<Bytes>,
    ) -> Result<Response> {
        let url = self.api_base.join(path.trim_start_matches('/'))?;
        let handler = self.limiter.handler(group, limiter_id);
        let mut retries = 0;

        loop {
            self.limiter.global().wait().await;
            let mut ctx = handler.ctx().await;

            let response = match self.send(&method, &url, body.as_ref()).await {
                Ok(response) => response,
                Err(error) => {
                    ctx.exit(None);
                    if retries < self.max_retries && error.should_retry() {
                        retries += 1;
                        log::debug!("{method} {url} failed ({error}), retry {retries}");
                        sleep(self.backoff(retries)).await;
                        continue;
                    }
                    return Err(error);
                }
            };

            let status = response.status();
            if (200..=304).contains(&status.as_u16()) {
                ctx.exit(Some(response.headers()));
                if response.rate_limit().is_exhausted() {
                    log::debug!("{method} {url} used the last request of its rate limit window");
                }
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let RateLimited {
                    retry_after,
                    global,
                } = self.rate_limited(&response);

                if retries >= self.max_retries {
                    ctx.exit(Some(response.headers()));
                    return Err(rejected(&response));
                }
                retries += 1;

                if global {
                    ctx.exit(None);
                    drop(ctx);
                    let release = self.limiter.global().trip(duration_ms(retry_after));
                    release.wait().await;
                } else {
                    ctx.exit(Some(response.headers()));
                    drop(ctx);
                    log::warn!(
                        "{method} {url} was rate limited, retrying in {}ms",
                        retry_after.round()
                    );
                    sleep(duration_ms(retry_after)).await;
                }
                continue;
            }

            if retries < self.max_retries && status.should_retry() {
                ctx.exit(None);
                retries += 1;
                log::debug!("{method} {url} returned {status}, retry {retries}");
                sleep(self.backoff(retries)).await;
                continue;
            }

            ctx.exit(Some(response.headers()));
            return Err(rejected(&response));
        }
    }

    /// `GET` `path`
    ///
    /// # Errors
    ///
    /// See [`Client::request`]
    pub async fn get(
        &self,
        path: &str,
        group: &RatelimitGroup,
        limiter_id: u64,
    ) -> Result<Response> {
        self.request(Method::GET, path, group, limiter_id, None).await
    }

    /// `DELETE` `path`
    ///
    /// # Errors
    ///
    /// See [`Client::request`]
    pub async fn delete(
        &self,
        path: &str,
        group: &RatelimitGroup,
        limiter_id: u64,
    ) -> Result<Response> {
        self.request(Method::DELETE, path, group, limiter_id, None)
            .await
    }

    /// `POST` `body` as JSON to `path`
    ///
    /// # Errors
    ///
    /// Returns an `Err` if `body` cannot be serialized, otherwise see
    /// [`Client::request`]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        group: &RatelimitGroup,
        limiter_id: u64,
        body: &T,
    ) -> Result<Response> {
        let body = Bytes::from(serde_json::to_vec(body)?);
        self.request(Method::POST, path, group, limiter_id, Some(body))
            .await
    }

    /// The rate limit state of this client
    #[must_use]
    pub const fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The connection pool of this client
    #[must_use]
    pub const fn connector(&self) -> &Connector {
        &self.connector
    }

    /// The base URL request paths are resolved against
    #[must_use]
    pub const fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Close the connection pool. Requests fail afterwards.
    pub fn close(&self) {
        self.connector.close();
    }

    fn backoff(&self, retries: u64) -> Duration {
        self.retry_wait_time
            .saturating_mul(u32::try_from(retries).unwrap_or(u32::MAX))
    }

    /// How long Discord asks us to wait, and whether everything is affected
    fn rate_limited(&self, response: &Response) -> RateLimited {
        if let Ok(rate_limited) = response.json::<RateLimited>() {
            return rate_limited;
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| parse_retry_after(value).ok())
            .unwrap_or(self.retry_wait_time);
        RateLimited {
            retry_after: retry_after.as_secs_f64() * 1000.0,
            global: false,
        }
    }

    /// Send a single try of a request, within the configured timeout
    async fn send(&self, method: &Method, url: &Url, body: Option<&Bytes>) -> Result<Response> {
        let attempt = self.send_once(method, url, body);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt).await?,
            None => attempt.await,
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Bytes>,
    ) -> Result<Response> {
        let mut connection = self.connector.connect(url).await?;
        let request = self.build_request(&connection, method, url, body)?;

        let response = connection.send(request).await?;
        match Response::from_response(response).await {
            Ok(response) => {
                connection.release();
                Ok(response)
            }
            Err(error) => {
                connection.close();
                Err(error)
            }
        }
    }

    fn build_request(
        &self,
        connection: &Connection,
        method: &Method,
        url: &Url,
        body: Option<&Bytes>,
    ) -> Result<http::Request<Full<Bytes>>> {
        let target = if connection.uses_absolute_form() {
            url.as_str().to_owned()
        } else {
            match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_owned(),
            }
        };

        let host = url.host_str().ok_or(ErrorKind::InvalidUrlHost)?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(target)
            .header(header::HOST, host);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }

        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                body.clone()
            }
            None => Bytes::new(),
        };

        Ok(builder.body(Full::new(body))?)
    }
}

fn duration_ms(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or_default()
}

fn rejected(response: &Response) -> ErrorKind {
    ErrorKind::RejectedStatusCode {
        status: response.status(),
        body: response.body().clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use http::{Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{ClientBuilder, DEFAULT_USER_AGENT};
    use crate::ratelimit::{HandlerSnapshot, Limiter, RatelimitGroup};
    use crate::test_utils::mock_client;
    use crate::{ErrorKind, mock_server};

    fn rate_limited(retry_after: u64, global: bool) -> ResponseTemplate {
        ResponseTemplate::new(429)
            .insert_header("x-ratelimit-limit", "1")
            .insert_header("x-ratelimit-remaining", "0")
            .insert_header("x-ratelimit-reset-after", "0.05")
            .set_body_json(json!({
                "message": "You are being rate limited.",
                "retry_after": retry_after,
                "global": global,
            }))
    }

    async fn received(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_request_is_authorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v10/channels/1"))
            .and(header("authorization", "Bot secret-token"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
            .expect(1)
            .mount(&server)
            .await;

        let group = RatelimitGroup::new(Limiter::Channel);
        let response = mock_client(&server).get("channels/1", &group, 1).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<serde_json::Value>().unwrap()["id"], "1");

        // The default user agent contains a comma, which `header` would split on
        let requests = server.received_requests().await.unwrap();
        assert_eq!(
            requests[0].headers.get("user-agent").unwrap(),
            DEFAULT_USER_AGENT
        );
    }

    #[tokio::test]
    async fn test_limit_is_learned_from_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-limit", "5")
                    .insert_header("x-ratelimit-remaining", "4")
                    .insert_header("x-ratelimit-reset-after", "10"),
            )
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let group = RatelimitGroup::new(Limiter::Channel);
        client.get("channels/7", &group, 7).await.unwrap();

        let handler = client.rate_limiter().handler(&group, 7);
        assert_eq!(
            handler.snapshot(),
            HandlerSnapshot {
                size: 5,
                active: 0,
                drops: 1,
                queued: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(rate_limited(50, false))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let group = RatelimitGroup::new(Limiter::Guild);

        let start = Instant::now();
        let response = client.get("guilds/3", &group, 3).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(received(&server).await, 2);
        assert!(!client.rate_limiter().global().is_locked());
    }

    #[tokio::test]
    async fn test_global_rate_limit_holds_back_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(rate_limited(100, true))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let group = RatelimitGroup::new(Limiter::Channel);

        let start = Instant::now();
        client.get("channels/1", &group, 1).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(!client.rate_limiter().global().is_locked());
        // The slot was given back without learning from the global 429
        assert_eq!(client.rate_limiter().handler(&group, 1).snapshot().drops, 0);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let group = RatelimitGroup::new(Limiter::Channel);
        let response = mock_client(&server).get("channels/1", &group, 1).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(received(&server).await, 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_rejected() {
        let server = mock_server!(StatusCode::NOT_FOUND, set_body_string("Unknown Channel"));

        let group = RatelimitGroup::new(Limiter::Channel);
        let error = mock_client(&server)
            .get("channels/404", &group, 404)
            .await
            .unwrap_err();

        let ErrorKind::RejectedStatusCode { status, body } = error else {
            panic!("expected a rejected status code, got {error}");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Unknown Channel");
        assert_eq!(received(&server).await, 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = mock_server!(StatusCode::INTERNAL_SERVER_ERROR);
        let client = ClientBuilder::builder()
            .api_base(server.uri())
            .max_retries(2u64)
            .retry_wait_time(Duration::from_millis(1))
            .build()
            .client()
            .unwrap();

        let group = RatelimitGroup::new(Limiter::Global);
        let error = client.get("gateway/bot", &group, 0).await.unwrap_err();

        assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(received(&server).await, 3);
        assert!(client.rate_limiter().handler(&group, 0).is_idle());
    }

    #[tokio::test]
    async fn test_rate_limits_count_as_tries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(rate_limited(1, false))
            .mount(&server)
            .await;
        let client = ClientBuilder::builder()
            .api_base(server.uri())
            .max_retries(1u64)
            .build()
            .client()
            .unwrap();

        let group = RatelimitGroup::new(Limiter::Webhook);
        let error = client.get("webhooks/1/token", &group, 1).await.unwrap_err();

        assert_eq!(error.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(received(&server).await, 2);
    }

    #[tokio::test]
    async fn test_post_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v10/channels/5/messages"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"content": "hello"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let group = RatelimitGroup::new(Limiter::Channel);
        let response = mock_client(&server)
            .post_json("/channels/5/messages", &group, 5, &json!({"content": "hello"}))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let server = mock_server!(StatusCode::NO_CONTENT);
        let client = mock_client(&server);
        let group = RatelimitGroup::unlimited();

        for _ in 0..3 {
            let response = client
                .request(Method::DELETE, "channels/1/messages/2", &group, 1, None)
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let stats = client.connector().stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = mock_server!(StatusCode::OK, set_delay(Duration::from_millis(500)));
        let client = ClientBuilder::builder()
            .api_base(server.uri())
            .timeout(Some(Duration::from_millis(50)))
            .max_retries(0u64)
            .build()
            .client()
            .unwrap();

        let group = RatelimitGroup::new(Limiter::Channel);
        let error = client.get("channels/1", &group, 1).await.unwrap_err();
        assert!(matches!(error, ErrorKind::Timeout));
        assert!(client.rate_limiter().handler(&group, 1).is_idle());
    }

    #[test]
    fn test_api_base_gets_a_trailing_slash() {
        let client = ClientBuilder::builder()
            .api_base("https://discord.com/api/v9")
            .build()
            .client()
            .unwrap();
        assert_eq!(client.api_base().as_str(), "https://discord.com/api/v9/");
    }
}
