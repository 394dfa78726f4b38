//! Rotating pool of egress proxies
//!
//! Rotation is purely cyclic and descriptors are never removed; the retry
//! policy bounds how often a pool is cycled through. A pool has no locking of
//! its own: each partition crawl owns its pool instance.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::proxy::ProxyDescriptor;

/// Resolves the public IP a proxy egresses from.
#[async_trait]
pub trait EgressProbe: Send + Sync {
    async fn resolve_egress_ip(&self, proxy: &ProxyDescriptor) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ProxyPool {
    descriptors: Vec<ProxyDescriptor>,
    cursor: usize,
}

impl ProxyPool {
    /// Returns `None` for an empty descriptor list.
    #[must_use]
    pub fn new(descriptors: Vec<ProxyDescriptor>) -> Option<Self> {
        if descriptors.is_empty() {
            None
        } else {
            Some(Self { descriptors, cursor: 0 })
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn current(&self) -> &ProxyDescriptor {
        &self.descriptors[self.cursor]
    }

    /// Moves to the next descriptor (wrapping) and returns it.
    pub fn advance(&mut self) -> &ProxyDescriptor {
        self.cursor = (self.cursor + 1) % self.descriptors.len();
        self.current()
    }

    /// A copy of this pool positioned at `index mod len`.
    #[must_use]
    pub fn seeded_at(&self, index: usize) -> Self {
        Self {
            descriptors: self.descriptors.clone(),
            cursor: index % self.descriptors.len(),
        }
    }

    /// Resolves the current descriptor's egress IP.
    ///
    /// Failure is logged and leaves the descriptor unresolved.
    pub async fn probe(&mut self, probe: &dyn EgressProbe) -> Option<&str> {
        let cursor = self.cursor;
        match probe.resolve_egress_ip(&self.descriptors[cursor]).await {
            Ok(ip) => {
                info!("🌐 Proxy ready: {} -> {}", self.descriptors[cursor].endpoint(), ip);
                self.descriptors[cursor].public_ip = Some(ip);
            }
            Err(e) => {
                warn!(
                    "Proxy connectivity probe failed for {}: {}",
                    self.descriptors[cursor].endpoint(),
                    e
                );
            }
        }
        self.descriptors[cursor].public_ip.as_deref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::bail;
    use proptest::prelude::*;

    pub(crate) fn descriptors(count: u16) -> Vec<ProxyDescriptor> {
        (0..count)
            .map(|i| ProxyDescriptor {
                provider: crate::domain::proxy::ProxyProvider::Generic,
                country: "JP".into(),
                username: "u".into(),
                password: "p".into(),
                host: "proxy.test".into(),
                port: 8001 + i,
                public_ip: None,
            })
            .collect()
    }

    struct FixedProbe(Option<&'static str>);

    #[async_trait]
    impl EgressProbe for FixedProbe {
        async fn resolve_egress_ip(&self, _proxy: &ProxyDescriptor) -> Result<String> {
            match self.0 {
                Some(ip) => Ok(ip.to_string()),
                None => bail!("connection refused"),
            }
        }
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(ProxyPool::new(Vec::new()).is_none());
    }

    #[test]
    fn advance_wraps_around() {
        let mut pool = ProxyPool::new(descriptors(3)).unwrap();
        assert_eq!(pool.current().port, 8001);
        assert_eq!(pool.advance().port, 8002);
        assert_eq!(pool.advance().port, 8003);
        assert_eq!(pool.advance().port, 8001);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn seeding_spreads_dispatches() {
        let pool = ProxyPool::new(descriptors(4)).unwrap();
        assert_eq!(pool.seeded_at(1).current().port, 8002);
        assert_eq!(pool.seeded_at(9).current().port, 8002);
        assert_eq!(pool.seeded_at(4).cursor(), 0);
    }

    #[tokio::test]
    async fn probe_resolves_current_descriptor_only() {
        let mut pool = ProxyPool::new(descriptors(2)).unwrap();
        assert_eq!(pool.probe(&FixedProbe(Some("203.0.113.9"))).await, Some("203.0.113.9"));
        assert_eq!(pool.advance().public_ip, None);
    }

    #[test]
    fn failed_probe_keeps_pool_usable() {
        let mut pool = ProxyPool::new(descriptors(1)).unwrap();
        assert_eq!(tokio_test::block_on(pool.probe(&FixedProbe(None))), None);
        assert_eq!(pool.current().port, 8001);
    }

    proptest! {
        #[test]
        fn n_advances_return_to_start(len in 1u16..16, start in 0usize..64) {
            let mut pool = ProxyPool::new(descriptors(len)).unwrap().seeded_at(start);
            let origin = pool.cursor();
            for _ in 0..len {
                pool.advance();
            }
            prop_assert_eq!(pool.cursor(), origin);
        }
    }
}
