//! Connection pool for the HTTP client.
//!
//! The [`Connector`] hands out one [`Connection`] per request and takes it
//! back afterwards, keeping idle connections around for reuse. New
//! connections are dialed to every resolved address in turn, wrapped in TLS
//! when needed, and optionally tunnelled through an HTTP proxy.
//!
//! Hostnames are resolved through a [`Resolver`]. Answers are cached per
//! `(host, port)` and rotated on every lookup, and concurrent lookups of the
//! same host share one resolver call.

mod config;
mod connection;
mod dial;
mod dns;
mod key;
mod pool;
mod tls;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_rustls::TlsConnector;
use url::Url;

pub use config::{
    ConnectorConfig, DEFAULT_CONNECTION_LIMIT, DEFAULT_DNS_TTL, DEFAULT_KEEPALIVE_TIMEOUT,
};
pub use connection::Connection;
pub use dns::{AddressFamily, DnsCacheTable, Resolver, SystemResolver};
pub use key::{ConnectionKey, Target};
pub use pool::PoolStats;
pub use tls::{Fingerprint, TlsMode};

use crate::{ErrorKind, Result};
use connection::Protocol;
use dns::HostResolver;
use pool::PoolState;

struct ConnectorInner {
    config: ConnectorConfig,
    tls: TlsConnector,
    resolver: HostResolver,
    proxy: Option<(String, u16)>,
    pool: Mutex<PoolState>,
    released: Notify,
    next_id: AtomicU64,
}

/// Pool of HTTP/1.1 connections.
///
/// Clones share the same pool.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

enum Acquired {
    Idle(Protocol),
    Claimed(u64),
}

impl Connector {
    /// Create a connector resolving hosts with the [`SystemResolver`]
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built or the
    /// proxy URL is unusable
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Create a connector resolving hosts with `resolver`
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built or the
    /// proxy URL is unusable
    pub fn with_resolver(config: ConnectorConfig, resolver: Arc<dyn Resolver>) -> Result<Self> {
        let tls = TlsConnector::from(tls::client_config(config.tls)?);

        let proxy = match &config.proxy {
            Some(proxy) => {
                let via = Target::try_from(proxy)?;
                if via.is_tls {
                    return Err(ErrorKind::UnsupportedScheme(proxy.scheme().to_owned()));
                }
                Some((via.host, via.port))
            }
            None => None,
        };

        let resolver = HostResolver::new(
            resolver,
            config.family,
            config.use_dns_cache,
            config.dns_ttl,
        );

        Ok(Self {
            inner: Arc::new(ConnectorInner {
                config,
                tls,
                resolver,
                proxy,
                pool: Mutex::new(PoolState::default()),
                released: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// The configuration in effect
    #[must_use]
    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    fn pool(&self) -> MutexGuard<'_, PoolState> {
        self.inner.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The pool key connections to `target` are stored under
    #[must_use]
    pub fn key(&self, target: Target) -> ConnectionKey {
        ConnectionKey {
            target,
            tls_mode: self.inner.config.tls,
            fingerprint: self.inner.config.fingerprint,
            proxy: self.inner.proxy.clone(),
        }
    }

    /// Get a connection to the origin of `url`.
    ///
    /// An idle connection is reused if there is one. Otherwise a slot is
    /// claimed right away and a new connection is dialed. If the configured
    /// limits are reached, this waits until a connection is released.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an HTTP(S) URL, the connector is
    /// closed, or no connection could be established
    pub async fn connect(&self, url: &Url) -> Result<Connection> {
        let key = self.key(Target::try_from(url)?);
        let absolute_form = key.proxy.is_some() && !key.is_tls();

        match self.acquire(&key).await? {
            Acquired::Idle(protocol) => {
                log::trace!("Reusing connection {} to {key}", protocol.id);
                Ok(Connection::new(self.clone(), key, protocol, absolute_form, true))
            }
            Acquired::Claimed(id) => {
                let placeholder = Placeholder {
                    connector: self,
                    key: &key,
                    id,
                    armed: true,
                };
                let protocol = self.create_connection(&key.target, id).await?;
                placeholder.commit();

                log::debug!("Opened connection {id} to {key}");
                Ok(Connection::new(self.clone(), key, protocol, absolute_form, false))
            }
        }
    }

    async fn acquire(&self, key: &ConnectionKey) -> Result<Acquired> {
        let config = &self.inner.config;
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut pool = self.pool();
                if pool.closed {
                    return Err(ErrorKind::ConnectorClosed);
                }
                if pool.has_capacity(key, config.limit, config.limit_per_host) {
                    if let Some(protocol) = pool.take_idle(key, config.keepalive_timeout) {
                        pool.activate(key, protocol.id);
                        return Ok(Acquired::Idle(protocol));
                    }
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    pool.claim(key, id);
                    return Ok(Acquired::Claimed(id));
                }
            }

            log::trace!("Connection limit reached for {key}, waiting for a release");
            released.await;
        }
    }

    /// Take back a protocol handed out for `key`
    pub(crate) fn release(&self, key: &ConnectionKey, protocol: Protocol, should_close: bool) {
        let config = &self.inner.config;
        {
            let mut pool = self.pool();
            pool.forget(key, protocol.id);

            let close = should_close
                || config.force_close
                || protocol.should_close
                || pool.closed
                || !protocol.is_alive();
            if close {
                log::trace!("Closing connection {} to {key}", protocol.id);
                drop(protocol);
            } else {
                pool.put_idle(key, protocol);
            }

            pool.cleanup(config.keepalive_timeout);
        }
        self.inner.released.notify_waiters();
    }

    /// Resolve `host:port` the way new connections do
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or returns no usable address
    pub async fn resolve_host(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        self.inner.resolver.resolve(host, port).await
    }

    /// Forget cached DNS answers for `(host, port)`, or all of them
    pub fn clear_dns_cache(&self, host: Option<(&str, u16)>) {
        self.inner.resolver.clear_cache(host);
    }

    /// Close all idle connections and refuse new ones.
    ///
    /// Connections in use are closed when they are released.
    pub fn close(&self) {
        {
            let mut pool = self.pool();
            pool.closed = true;
            pool.clear_idle();
        }
        self.inner.released.notify_waiters();
        log::debug!("Connector closed");
    }

    /// Whether [`close`](Self::close) was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool().closed
    }

    /// Current pool usage
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool().stats()
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.inner.config)
            .field("resolver", &self.inner.resolver)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Slot claimed for a connection that is being dialed.
///
/// Dropping it without [`commit`](Self::commit), because dialing failed or
/// was cancelled, gives the slot back.
struct Placeholder<'a> {
    connector: &'a Connector,
    key: &'a ConnectionKey,
    id: u64,
    armed: bool,
}

impl Placeholder<'_> {
    fn commit(mut self) {
        self.armed = false;
        self.connector.pool().activate(self.key, self.id);
    }
}

impl Drop for Placeholder<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.connector.pool().forget(self.key, self.id);
        self.connector.inner.released.notify_waiters();
    }
}
