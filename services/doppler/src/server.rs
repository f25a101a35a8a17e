//! Aggregator pipeline
//!
//! ```text
//! UDP ─► NetworkReader ─► SignatureVerifier ─► UnmarshallerPool ─┐
//!                                                                 ├─► MessageRouter ─► SinkManager
//! TLS ─► TlsListener (frames, unsigned) ──────────────────────────┘         ▲
//!                                                     registry add/remove ──┘
//! ```
//!
//! Shutdown is cooperative: listeners stop on the signal, every later stage
//! stops once its input closes, and the sink manager closes its sinks last.

use anyhow::{Context, Result};
use bytes::Bytes;
use codec::Signer;
use message_sink::{
    registry_channels, AppDestination, MessageRouter, RegistryEvents, SinkManager,
    SinkManagerConfig,
};
use network::{
    Blacklist, Counters, NetworkReader, SignatureVerifier, TlsListener, UnmarshallerPool,
};
use relay_config::DopplerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};
use types::Envelope;

/// Bounded queue size between pipeline stages
pub const STAGE_QUEUE_CAPACITY: usize = 1024;
/// Bounded queue size of each registry event stream
pub const REGISTRY_QUEUE_CAPACITY: usize = 256;

pub const UDP_LISTENER_NAME: &str = "dropsondeListener";
pub const TLS_LISTENER_NAME: &str = "tlsListener";

pub struct Doppler {
    udp_addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
    manager: Arc<SinkManager>,
    registry: RegistryEvents,
    counters: Arc<Counters>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
    manager_task: JoinHandle<()>,
}

fn listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))
}

impl Doppler {
    /// Bind the listeners and start every stage
    ///
    /// Static drains from the configuration are announced on the registry
    /// stream before this returns.
    pub async fn start(config: &DopplerConfig, counters: Arc<Counters>) -> Result<Self> {
        let blacklist = Blacklist::new(
            config
                .blacklist_ranges()
                .context("Invalid blacklist configuration")?,
        );
        let sink_config =
            SinkManagerConfig::from_doppler(config).context("Failed to build sink settings")?;
        let manager = Arc::new(SinkManager::new(
            sink_config,
            blacklist,
            Arc::clone(&counters),
        ));
        let (registry, streams) = registry_channels(REGISTRY_QUEUE_CAPACITY);
        let manager_task = manager.start(streams);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (datagram_tx, datagram_rx) = mpsc::channel::<Bytes>(STAGE_QUEUE_CAPACITY);
        let (verified_tx, verified_rx) = mpsc::channel::<Bytes>(STAGE_QUEUE_CAPACITY);
        let (envelope_tx, envelope_rx) = mpsc::channel::<Arc<Envelope>>(STAGE_QUEUE_CAPACITY);

        let reader = NetworkReader::bind(
            UDP_LISTENER_NAME,
            listen_addr(&config.host, config.incoming_udp_port)?,
            datagram_tx,
            Arc::clone(&counters),
        )
        .await
        .context("Failed to start UDP listener")?;
        let udp_addr = reader.local_addr()?;

        let tls_listener = if config.enable_tls_transport {
            let server_config = network::tls::server_config(&config.tls_listener)
                .context("Failed to load TLS listener material")?;
            let listener = TlsListener::bind(
                TLS_LISTENER_NAME,
                listen_addr(&config.host, config.tls_listener.port)?,
                server_config,
                envelope_tx.clone(),
                Arc::clone(&counters),
            )
            .await
            .context("Failed to start TLS listener")?;
            Some(listener)
        } else {
            None
        };
        let tls_addr = tls_listener
            .as_ref()
            .map(TlsListener::local_addr)
            .transpose()?;

        let mut tasks = JoinSet::new();
        tasks.spawn(reader.run(shutdown_rx.clone()));
        tasks.spawn(
            SignatureVerifier::new(Signer::new(&config.shared_secret), Arc::clone(&counters))
                .run(datagram_rx, verified_tx),
        );
        tasks.spawn(
            UnmarshallerPool::new(config.unmarshaller_count, Arc::clone(&counters))
                .run(verified_rx, envelope_tx),
        );
        if let Some(listener) = tls_listener {
            tasks.spawn(listener.run(shutdown_rx.clone()));
        }
        tasks.spawn(MessageRouter::new(Arc::clone(&manager)).run(envelope_rx, shutdown_rx));

        for drain in &config.drains {
            registry
                .adds
                .send(AppDestination::new(&drain.app_id, &drain.url))
                .await
                .context("Sink manager stopped during startup")?;
        }

        info!(
            udp = %udp_addr,
            tls = ?tls_addr,
            workers = config.unmarshaller_count,
            static_drains = config.drains.len(),
            "Doppler started"
        );
        Ok(Self {
            udp_addr,
            tls_addr,
            manager,
            registry,
            counters,
            shutdown,
            tasks,
            manager_task,
        })
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    pub fn manager(&self) -> &Arc<SinkManager> {
        &self.manager
    }

    /// Senders for registry add/remove announcements
    pub fn registry(&self) -> &RegistryEvents {
        &self.registry
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Stop the listeners, drain the pipeline, then close every sink
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Pipeline task ended abnormally");
            }
        }

        self.manager.stop().await;
        if let Err(e) = self.manager_task.await {
            warn!(error = %e, "Sink manager task ended abnormally");
        }
        info!("Doppler stopped");
    }
}
