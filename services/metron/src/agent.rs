//! Agent pipeline
//!
//! ```text
//! UDP (unsigned envelopes) ─► NetworkReader ─► UnmarshallerPool ─► Forwarder ─► ClientPool
//! ```
//!
//! Local emitters send plain marshalled envelopes; signing happens only on
//! the way out to datagram aggregators.

use crate::forwarder::Forwarder;
use anyhow::{Context, Result};
use bytes::Bytes;
use codec::Signer;
use network::{ClientPool, Counters, NetworkReader, UnmarshallerPool};
use relay_config::MetronConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};
use types::Envelope;

/// Bounded queue size between pipeline stages
pub const STAGE_QUEUE_CAPACITY: usize = 1024;

/// Counter prefix of the agent's UDP listener
pub const LISTENER_NAME: &str = "dropsondeAgentListener";

/// A running agent; dropping it without [`Agent::stop`] leaves tasks running
pub struct Agent {
    local_addr: SocketAddr,
    pool: Arc<ClientPool>,
    counters: Arc<Counters>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Agent {
    /// Bind the listener, build the client pool and start every stage
    pub async fn start(config: &MetronConfig, counters: Arc<Counters>) -> Result<Self> {
        let tls_config = match (&config.tls_client, config.uses_tls()) {
            (Some(tls), true) => Some(
                network::tls::client_config(tls).context("Failed to load TLS client material")?,
            ),
            _ => None,
        };
        let server_name = config
            .tls_client
            .as_ref()
            .map(|tls| tls.server_name.as_str())
            .filter(|name| !name.is_empty());
        let pool = Arc::new(
            ClientPool::from_addresses(
                &config.doppler_addresses,
                tls_config,
                server_name,
                config.tls_write_timeout(),
            )
                .context("Failed to build doppler client pool")?,
        );

        let address: SocketAddr = format!("{}:{}", config.host, config.incoming_udp_port)
            .parse()
            .with_context(|| format!("Invalid listen address {}", config.host))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (datagram_tx, datagram_rx) = mpsc::channel::<Bytes>(STAGE_QUEUE_CAPACITY);
        let (envelope_tx, envelope_rx) = mpsc::channel::<Arc<Envelope>>(STAGE_QUEUE_CAPACITY);

        let reader = NetworkReader::bind(LISTENER_NAME, address, datagram_tx, Arc::clone(&counters))
            .await
            .context("Failed to start agent listener")?;
        let local_addr = reader.local_addr()?;

        let forwarder = Forwarder::new(
            Arc::clone(&pool),
            Signer::new(&config.shared_secret),
            Arc::clone(&counters),
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(reader.run(shutdown_rx.clone()));
        tasks.spawn(
            UnmarshallerPool::new(config.unmarshaller_count, Arc::clone(&counters))
                .run(datagram_rx, envelope_tx),
        );
        tasks.spawn(forwarder.run(envelope_rx, shutdown_rx));

        info!(
            address = %local_addr,
            dopplers = pool.len(),
            workers = config.unmarshaller_count,
            "Metron started"
        );
        Ok(Self {
            local_addr,
            pool,
            counters,
            shutdown,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Signal every stage, wait for them, then release the doppler connections
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Agent task ended abnormally");
            }
        }
        self.pool.close_all().await;
        info!("Metron stopped");
    }
}
