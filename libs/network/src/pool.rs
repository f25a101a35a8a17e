//! Client Pool
//!
//! The set of aggregator endpoints a producer may forward to. Selection is
//! uniform over the current members; membership is changed only by the
//! owner through [`ClientPool::add`] and [`ClientPool::remove`].

use crate::error::PoolError;
use crate::transports::{Client, DopplerClient, Scheme};
use crate::Result;
use parking_lot::RwLock;
use rand::Rng;
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ClientPool<C: Client = DopplerClient> {
    clients: RwLock<Vec<Arc<C>>>,
}

impl<C: Client> Default for ClientPool<C> {
    fn default() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
        }
    }
}

impl<C: Client> ClientPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clients(clients: impl IntoIterator<Item = C>) -> Self {
        let pool = Self::new();
        for client in clients {
            pool.add(client);
        }
        pool
    }

    /// Pick a member uniformly at random
    pub fn random_client(&self) -> std::result::Result<Arc<C>, PoolError> {
        let clients = self.clients.read();
        if clients.is_empty() {
            return Err(PoolError::Exhausted);
        }
        let index = rand::thread_rng().gen_range(0..clients.len());
        Ok(Arc::clone(&clients[index]))
    }

    /// Register a member; returns `false` if one with the same scheme and
    /// address is already present
    pub fn add(&self, client: C) -> bool {
        let mut clients = self.clients.write();
        if clients
            .iter()
            .any(|c| c.scheme() == client.scheme() && c.address() == client.address())
        {
            return false;
        }
        debug!(scheme = %client.scheme(), address = client.address(), "Client added to pool");
        clients.push(Arc::new(client));
        true
    }

    /// Drop the member with this identity, handing it back so the caller can
    /// close it
    pub fn remove(&self, scheme: &Scheme, address: &str) -> Option<Arc<C>> {
        let mut clients = self.clients.write();
        let index = clients
            .iter()
            .position(|c| c.scheme() == scheme && c.address() == address)?;
        Some(clients.remove(index))
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Snapshot of the current members
    pub fn clients(&self) -> Vec<Arc<C>> {
        self.clients.read().clone()
    }

    /// Close every member, for shutdown
    pub async fn close_all(&self) {
        for client in self.clients() {
            if let Err(e) = client.close().await {
                debug!(address = client.address(), error = %e, "Error closing client");
            }
        }
    }
}

impl ClientPool<DopplerClient> {
    /// Build a pool from `udp://` and `tls://` addresses
    ///
    /// `server_name`, when set, replaces the dial host in TLS certificate checks.
    /// `io_timeout` bounds every write on TLS members.
    pub fn from_addresses(
        addresses: &[String],
        tls_config: Option<Arc<ClientConfig>>,
        server_name: Option<&str>,
        io_timeout: Duration,
    ) -> Result<Self> {
        let pool = Self::new();
        for address in addresses {
            let mut client =
                DopplerClient::from_url(address, tls_config.clone())?.with_io_timeout(io_timeout);
            if let Some(name) = server_name {
                client = client.with_server_name(name)?;
            }
            pool.add(client);
        }
        info!(members = pool.len(), "Client pool ready");
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeClient;
    use crate::transports::DEFAULT_IO_TIMEOUT;
    use proptest::prelude::*;

    #[test]
    fn test_empty_pool_is_exhausted() {
        let pool: ClientPool<FakeClient> = ClientPool::new();
        assert_eq!(pool.random_client().unwrap_err(), PoolError::Exhausted);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_identity_is_scheme_and_address() {
        let pool = ClientPool::new();
        assert!(pool.add(FakeClient::udp("10.0.0.1:3457")));
        assert!(!pool.add(FakeClient::udp("10.0.0.1:3457")));
        assert!(pool.add(FakeClient::tls("10.0.0.1:3457")));
        assert_eq!(pool.len(), 2);

        let removed = pool.remove(&Scheme::Udp, "10.0.0.1:3457").unwrap();
        assert_eq!(removed.scheme(), &Scheme::Udp);
        assert!(pool.remove(&Scheme::Udp, "10.0.0.1:3457").is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_from_addresses() {
        let pool = ClientPool::from_addresses(
            &["udp://127.0.0.1:3457".to_string(), "udp://127.0.0.1:3458".to_string()],
            None,
            None,
            DEFAULT_IO_TIMEOUT,
        )
        .unwrap();
        assert_eq!(pool.len(), 2);
        assert!(
            ClientPool::from_addresses(&["http://x:1".to_string()], None, None, DEFAULT_IO_TIMEOUT)
                .is_err()
        );
    }

    #[test]
    fn test_selection_is_uniform() {
        let k = 4;
        let n = 40_000;
        let pool = ClientPool::with_clients((0..k).map(|i| FakeClient::udp(format!("10.0.0.{i}:1"))));

        let mut hits = vec![0usize; k];
        for _ in 0..n {
            let client = pool.random_client().unwrap();
            let index = pool
                .clients()
                .iter()
                .position(|c| Arc::ptr_eq(c, &client))
                .unwrap();
            hits[index] += 1;
        }

        let expected = n as f64 / k as f64;
        for count in hits {
            // well over 10 standard deviations for a binomial with p = 1/4
            assert!((count as f64 - expected).abs() < expected * 0.1, "count {count}");
        }
    }

    proptest! {
        #[test]
        fn prop_selection_returns_a_member(size in 1usize..16) {
            let pool = ClientPool::with_clients((0..size).map(|i| FakeClient::udp(format!("h{i}:1"))));
            let chosen = pool.random_client().unwrap();
            prop_assert!(pool.clients().iter().any(|c| Arc::ptr_eq(c, &chosen)));
        }
    }
}
