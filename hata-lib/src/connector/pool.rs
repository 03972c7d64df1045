use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::connector::ConnectionKey;
use crate::connector::connection::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Claimed by a connection attempt that has not finished yet
    Dialing,
    /// Held by a [`Connection`](crate::connector::Connection)
    Active,
}

/// Point-in-time view of a connector's pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections waiting for reuse
    pub idle: usize,
    /// Connections handed out to requests
    pub active: usize,
    /// Connection attempts in progress
    pub dialing: usize,
}

/// Bookkeeping of pooled connections, guarded by the connector's mutex
#[derive(Debug, Default)]
pub(crate) struct PoolState {
    idle: HashMap<ConnectionKey, Vec<(Protocol, Instant)>>,
    acquired: HashMap<u64, Slot>,
    acquired_per_host: HashMap<ConnectionKey, HashSet<u64>>,
    pub(crate) closed: bool,
}

impl PoolState {
    /// Whether another connection to `key` may be opened or handed out
    pub(crate) fn has_capacity(&self, key: &ConnectionKey, limit: usize, per_host: usize) -> bool {
        let total = limit == 0 || self.acquired.len() < limit;
        let host = per_host == 0
            || self
                .acquired_per_host
                .get(key)
                .is_none_or(|ids| ids.len() < per_host);
        total && host
    }

    /// Pop the most recently used idle protocol of `key` that is still usable.
    ///
    /// Dead and stale protocols found on the way are dropped.
    pub(crate) fn take_idle(
        &mut self,
        key: &ConnectionKey,
        keepalive_timeout: Duration,
    ) -> Option<Protocol> {
        let idle = self.idle.get_mut(key)?;
        let mut found = None;
        while let Some((protocol, released)) = idle.pop() {
            if protocol.is_alive() && released.elapsed() < keepalive_timeout {
                found = Some(protocol);
                break;
            }
        }
        if idle.is_empty() {
            self.idle.remove(key);
        }
        found
    }

    pub(crate) fn claim(&mut self, key: &ConnectionKey, id: u64) {
        self.acquired.insert(id, Slot::Dialing);
        self.acquired_per_host
            .entry(key.clone())
            .or_default()
            .insert(id);
    }

    pub(crate) fn activate(&mut self, key: &ConnectionKey, id: u64) {
        if self.acquired.insert(id, Slot::Active).is_none() {
            self.acquired_per_host
                .entry(key.clone())
                .or_default()
                .insert(id);
        }
    }

    pub(crate) fn forget(&mut self, key: &ConnectionKey, id: u64) {
        self.acquired.remove(&id);
        if let Some(ids) = self.acquired_per_host.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.acquired_per_host.remove(key);
            }
        }
    }

    pub(crate) fn put_idle(&mut self, key: &ConnectionKey, protocol: Protocol) {
        self.idle
            .entry(key.clone())
            .or_default()
            .push((protocol, Instant::now()));
    }

    /// Drop idle protocols that died or were not used for `keepalive_timeout`
    pub(crate) fn cleanup(&mut self, keepalive_timeout: Duration) -> usize {
        let mut dropped = 0;
        self.idle.retain(|_, protocols| {
            let before = protocols.len();
            protocols.retain(|(protocol, released)| {
                protocol.is_alive() && released.elapsed() < keepalive_timeout
            });
            dropped += before - protocols.len();
            !protocols.is_empty()
        });
        dropped
    }

    /// Drop every idle protocol
    pub(crate) fn clear_idle(&mut self) {
        self.idle.clear();
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let dialing = self
            .acquired
            .values()
            .filter(|slot| **slot == Slot::Dialing)
            .count();
        PoolStats {
            idle: self.idle.values().map(Vec::len).sum(),
            active: self.acquired.len() - dialing,
            dialing,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use url::Url;

    use super::*;
    use crate::connector::{Target, TlsMode};

    fn key(url: &str) -> ConnectionKey {
        ConnectionKey {
            target: Target::try_from(&Url::parse(url).unwrap()).unwrap(),
            tls_mode: TlsMode::Verify,
            fingerprint: None,
            proxy: None,
        }
    }

    #[test]
    fn test_capacity_limits() {
        let discord = key("https://discord.com/");
        let cdn = key("https://cdn.discordapp.com/");
        let mut pool = PoolState::default();

        pool.claim(&discord, 1);
        pool.claim(&discord, 2);
        assert!(pool.has_capacity(&discord, 0, 0));
        assert!(!pool.has_capacity(&discord, 0, 2));
        assert!(pool.has_capacity(&cdn, 0, 2));
        assert!(!pool.has_capacity(&cdn, 2, 0));

        pool.forget(&discord, 1);
        assert!(pool.has_capacity(&discord, 2, 2));
    }

    #[test]
    fn test_stats_track_slots() {
        let discord = key("https://discord.com/");
        let mut pool = PoolState::default();

        pool.claim(&discord, 1);
        pool.claim(&discord, 2);
        pool.activate(&discord, 2);
        assert_eq!(
            pool.stats(),
            PoolStats {
                idle: 0,
                active: 1,
                dialing: 1
            }
        );

        pool.forget(&discord, 1);
        pool.forget(&discord, 2);
        assert_eq!(pool.stats(), PoolStats::default());
        assert!(pool.acquired_per_host.is_empty());
    }
}
