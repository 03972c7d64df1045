use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::time::Instant;

use crate::{ErrorKind, Result};

/// Address families a connection may use
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4 and IPv6
    #[default]
    Any,
    /// IPv4 only
    Ipv4,
    /// IPv6 only
    Ipv6,
}

impl AddressFamily {
    /// Whether `addr` belongs to this family
    #[must_use]
    pub const fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::Ipv4 => addr.is_ipv4(),
            Self::Ipv6 => addr.is_ipv6(),
        }
    }
}

/// Hostname resolution used by the [`Connector`](crate::Connector)
#[async_trait]
pub trait Resolver: Send + Sync + fmt::Debug {
    /// Resolve `host` to socket addresses with port `port`
    async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.filter(|addr| family.matches(addr)).collect())
    }
}

#[derive(Debug)]
struct CacheEntry {
    addrs: Vec<SocketAddr>,
    cursor: usize,
    created: Instant,
}

/// Resolved addresses per `(host, port)`, handed out round-robin.
///
/// Entries expire `ttl` after they were added. Without a TTL they live until
/// they are removed.
#[derive(Debug, Default)]
pub struct DnsCacheTable {
    entries: HashMap<(String, u16), CacheEntry>,
    ttl: Option<Duration>,
}

impl DnsCacheTable {
    /// Create an empty table
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Store the addresses of `host:port`, replacing earlier ones
    pub fn add(&mut self, host: &str, port: u16, addrs: Vec<SocketAddr>) {
        self.entries.insert(
            (host.to_owned(), port),
            CacheEntry {
                addrs,
                cursor: 0,
                created: Instant::now(),
            },
        );
    }

    /// Forget `host:port`
    pub fn remove(&mut self, host: &str, port: u16) {
        self.entries.remove(&(host.to_owned(), port));
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The addresses of `host:port`, rotated by one position on every call.
    ///
    /// Returns `None` if there is no entry or it expired. Expired entries are
    /// removed.
    pub fn next_addrs(&mut self, host: &str, port: u16) -> Option<Vec<SocketAddr>> {
        let key = (host.to_owned(), port);
        let entry = self.entries.get_mut(&key)?;

        if self
            .ttl
            .is_some_and(|ttl| entry.created.elapsed() >= ttl)
        {
            self.entries.remove(&key);
            return None;
        }
        if entry.addrs.is_empty() {
            return Some(Vec::new());
        }

        let mut addrs = entry.addrs.clone();
        addrs.rotate_left(entry.cursor);
        entry.cursor = (entry.cursor + 1) % entry.addrs.len();
        Some(addrs)
    }
}

type Lookup = Shared<BoxFuture<'static, std::result::Result<Vec<SocketAddr>, Arc<io::Error>>>>;

#[derive(Default)]
struct ResolverState {
    cache: DnsCacheTable,
    in_flight: HashMap<(String, u16), Lookup>,
}

/// Caching, coalescing front of a [`Resolver`]
pub(crate) struct HostResolver {
    resolver: Arc<dyn Resolver>,
    family: AddressFamily,
    use_cache: bool,
    state: Mutex<ResolverState>,
}

impl HostResolver {
    pub(crate) fn new(
        resolver: Arc<dyn Resolver>,
        family: AddressFamily,
        use_cache: bool,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            resolver,
            family,
            use_cache,
            state: Mutex::new(ResolverState {
                cache: DnsCacheTable::new(ttl),
                in_flight: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `host:port` to the addresses to try, in order.
    ///
    /// IP literals are returned as is. Concurrent lookups of the same key
    /// share one resolver call and its outcome. Failed lookups are not cached.
    pub(crate) async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let key = (host.to_owned(), port);
        let lookup = {
            let mut state = self.state();
            if self.use_cache {
                if let Some(addrs) = state.cache.next_addrs(host, port) {
                    log::trace!("DNS cache hit for {host}:{port}");
                    return Ok(addrs);
                }
            }

            if let Some(lookup) = state.in_flight.get(&key) {
                lookup.clone()
            } else {
                let lookup = self.lookup(host, port);
                state.in_flight.insert(key.clone(), lookup.clone());
                lookup
            }
        };

        let result = lookup.clone().await;

        let mut rotated = None;
        {
            let mut state = self.state();
            if state
                .in_flight
                .get(&key)
                .is_some_and(|pending| pending.ptr_eq(&lookup))
            {
                state.in_flight.remove(&key);
                if let Ok(addrs) = &result {
                    if self.use_cache && !addrs.is_empty() {
                        state.cache.add(host, port, addrs.clone());
                        rotated = state.cache.next_addrs(host, port);
                    }
                }
            }
        }

        match result {
            Ok(addrs) if addrs.is_empty() => Err(ErrorKind::NoAddresses(host.to_owned())),
            Ok(addrs) => Ok(rotated.unwrap_or(addrs)),
            Err(source) => Err(ErrorKind::DnsResolution {
                host: host.to_owned(),
                source,
            }),
        }
    }

    fn lookup(&self, host: &str, port: u16) -> Lookup {
        let resolver = Arc::clone(&self.resolver);
        let family = self.family;
        let host = host.to_owned();

        async move {
            log::debug!("Resolving {host}:{port}");
            resolver
                .resolve(&host, port, family)
                .await
                .map(|addrs| {
                    addrs
                        .into_iter()
                        .filter(|addr| family.matches(addr))
                        .collect()
                })
                .map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Forget cached addresses of `host:port`, or all of them
    pub(crate) fn clear_cache(&self, host: Option<(&str, u16)>) {
        let mut state = self.state();
        match host {
            Some((host, port)) => state.cache.remove(host, port),
            None => state.cache.clear(),
        }
    }
}

impl fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResolver")
            .field("resolver", &self.resolver)
            .field("family", &self.family)
            .field("use_cache", &self.use_cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug)]
    struct CountingResolver {
        calls: AtomicUsize,
        addrs: Vec<SocketAddr>,
        fail: bool,
    }

    impl CountingResolver {
        fn new(addrs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                addrs: addrs.iter().map(|addr| addr.parse().unwrap()).collect(),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                addrs: Vec::new(),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Resolver for CountingResolver {
        async fn resolve(
            &self,
            _host: &str,
            _port: u16,
            _family: AddressFamily,
        ) -> io::Result<Vec<SocketAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such host"));
            }
            Ok(self.addrs.clone())
        }
    }

    fn host_resolver(resolver: &Arc<CountingResolver>, ttl: Option<Duration>) -> HostResolver {
        HostResolver::new(resolver.clone(), AddressFamily::Any, true, ttl)
    }

    fn addrs(addrs: &[&str]) -> Vec<SocketAddr> {
        addrs.iter().map(|addr| addr.parse().unwrap()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_are_coalesced() {
        let resolver = CountingResolver::new(&["10.0.0.1:443", "10.0.0.2:443"]);
        let hosts = host_resolver(&resolver, None);

        let results = join_all((0..10).map(|_| hosts.resolve("discord.com", 443))).await;

        assert_eq!(resolver.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), addrs(&["10.0.0.1:443", "10.0.0.2:443"]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_shared_but_not_cached() {
        let resolver = CountingResolver::failing();
        let hosts = host_resolver(&resolver, None);

        let results = join_all((0..3).map(|_| hosts.resolve("discord.com", 443))).await;
        assert_eq!(resolver.calls(), 1);
        for result in results {
            assert!(matches!(
                result,
                Err(ErrorKind::DnsResolution { host, .. }) if host == "discord.com"
            ));
        }

        assert!(hosts.resolve("discord.com", 443).await.is_err());
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_addresses_rotate() {
        let resolver = CountingResolver::new(&["10.0.0.1:443", "10.0.0.2:443", "10.0.0.3:443"]);
        let hosts = host_resolver(&resolver, None);

        assert_eq!(
            hosts.resolve("discord.com", 443).await.unwrap(),
            addrs(&["10.0.0.1:443", "10.0.0.2:443", "10.0.0.3:443"])
        );
        assert_eq!(
            hosts.resolve("discord.com", 443).await.unwrap(),
            addrs(&["10.0.0.2:443", "10.0.0.3:443", "10.0.0.1:443"])
        );
        assert_eq!(
            hosts.resolve("discord.com", 443).await.unwrap(),
            addrs(&["10.0.0.3:443", "10.0.0.1:443", "10.0.0.2:443"])
        );
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entries_expire() {
        let resolver = CountingResolver::new(&["10.0.0.1:443"]);
        let hosts = host_resolver(&resolver, Some(Duration::from_secs(10)));

        hosts.resolve("discord.com", 443).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        hosts.resolve("discord.com", 443).await.unwrap();
        assert_eq!(resolver.calls(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        hosts.resolve("discord.com", 443).await.unwrap();
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_always_resolves() {
        let resolver = CountingResolver::new(&["10.0.0.1:443"]);
        let hosts = HostResolver::new(resolver.clone(), AddressFamily::Any, false, None);

        hosts.resolve("discord.com", 443).await.unwrap();
        hosts.resolve("discord.com", 443).await.unwrap();
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_ip_literals_bypass_the_resolver() {
        let resolver = CountingResolver::new(&[]);
        let hosts = host_resolver(&resolver, None);

        assert_eq!(
            hosts.resolve("127.0.0.1", 8080).await.unwrap(),
            addrs(&["127.0.0.1:8080"])
        );
        assert_eq!(hosts.resolve("::1", 443).await.unwrap(), addrs(&["[::1]:443"]));
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_family_filter() {
        let resolver = CountingResolver::new(&["10.0.0.1:443", "[2001:db8::1]:443"]);
        let hosts = HostResolver::new(resolver.clone(), AddressFamily::Ipv6, true, None);
        assert_eq!(
            hosts.resolve("discord.com", 443).await.unwrap(),
            addrs(&["[2001:db8::1]:443"])
        );

        let resolver = CountingResolver::new(&["10.0.0.1:443"]);
        let hosts = HostResolver::new(resolver.clone(), AddressFamily::Ipv6, true, None);
        assert!(matches!(
            hosts.resolve("discord.com", 443).await,
            Err(ErrorKind::NoAddresses(host)) if host == "discord.com"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache() {
        let resolver = CountingResolver::new(&["10.0.0.1:443"]);
        let hosts = host_resolver(&resolver, None);

        hosts.resolve("discord.com", 443).await.unwrap();
        hosts.clear_cache(Some(("discord.com", 443)));
        hosts.resolve("discord.com", 443).await.unwrap();
        hosts.clear_cache(None);
        hosts.resolve("discord.com", 443).await.unwrap();
        assert_eq!(resolver.calls(), 3);
    }

    #[test]
    fn test_address_family_from_str() {
        assert_eq!("IPv4".parse::<AddressFamily>().unwrap(), AddressFamily::Ipv4);
        assert_eq!(AddressFamily::Ipv6.to_string(), "ipv6");
        assert!(AddressFamily::Any.matches(&"[::1]:1".parse().unwrap()));
        assert!(!AddressFamily::Ipv4.matches(&"[::1]:1".parse().unwrap()));
    }
}
