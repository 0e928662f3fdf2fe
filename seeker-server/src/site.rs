//! The site aggregate: one component manager per hardware kind, the
//! database handle, and the expected-components topology, plus the TCP
//! accept loops that feed proxies into the managers.

use std::net::SocketAddr;
use std::sync::Arc;

use seeker_config::SeekerConfig;
use seeker_core::ExpectedTopology;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::errors::AppResult;
use crate::manager::{ComponentManager, DuplicateNamePolicy};
use crate::obs_history::ObsHistory;
use crate::proxy::{
    self, ArchiverProxy, ChannelizerProxy, ComponentProxy, ControlProxy,
    DetectorProxy, IfChainProxy, ManagedProxy, TelescopeProxy, TestSignalProxy,
};

/// Interface revision this build speaks; proxies reporting anything else
/// are rejected at the intrinsics handshake.
pub const EXPECTED_INTERFACE_VERSION: &str = "1.1";

/// Aggregate of the per-kind managers, the database, and the topology.
pub struct Site {
    pub name: String,
    pub telescopes: Arc<ComponentManager<TelescopeProxy>>,
    pub if_chains: Arc<ComponentManager<IfChainProxy>>,
    pub test_signals: Arc<ComponentManager<TestSignalProxy>>,
    pub detectors: Arc<ComponentManager<DetectorProxy>>,
    pub archivers: Arc<ComponentManager<ArchiverProxy>>,
    pub channelizers: Arc<ComponentManager<ChannelizerProxy>>,
    pub controls: Arc<ComponentManager<ControlProxy>>,
    pub obs_history: Option<Arc<ObsHistory>>,
    pub topology: ExpectedTopology,
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site")
            .field("name", &self.name)
            .field("detectors", &self.detectors.number_of_proxies())
            .field("telescopes", &self.telescopes.number_of_proxies())
            .finish()
    }
}

impl Site {
    /// Build the managers and (when configured) the database connection.
    /// Detectors replace stale connections by name, so a rebooted detector
    /// reclaims its identity; everything else keeps the first claimant.
    pub async fn new(config: &SeekerConfig, topology: ExpectedTopology) -> AppResult<Self> {
        let obs_history = if config.database.use_database {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database.url)
                .await?;
            let history = ObsHistory::new(pool);
            history.ensure_schema().await?;
            Some(Arc::new(history))
        } else {
            None
        };

        Ok(Self {
            name: config.server.site_name.clone(),
            telescopes: Arc::new(ComponentManager::new(
                "tscope",
                DuplicateNamePolicy::RejectNew,
            )),
            if_chains: Arc::new(ComponentManager::new(
                "ifc",
                DuplicateNamePolicy::RejectNew,
            )),
            test_signals: Arc::new(ComponentManager::new(
                "tsig",
                DuplicateNamePolicy::RejectNew,
            )),
            detectors: Arc::new(ComponentManager::new(
                "dx",
                DuplicateNamePolicy::DiscardOld,
            )),
            archivers: Arc::new(ComponentManager::new(
                "archiver",
                DuplicateNamePolicy::RejectNew,
            )),
            channelizers: Arc::new(ComponentManager::new(
                "chan",
                DuplicateNamePolicy::DiscardOld,
            )),
            controls: Arc::new(ComponentManager::new(
                "control",
                DuplicateNamePolicy::RejectNew,
            )),
            obs_history,
            topology,
        })
    }

    /// Bind one listener per component kind and spawn its accept loop.
    pub async fn spawn_listeners(&self, config: &SeekerConfig) -> AppResult<()> {
        spawn_listener(config.server.telescope_port, Arc::clone(&self.telescopes)).await?;
        spawn_listener(config.server.if_chain_port, Arc::clone(&self.if_chains)).await?;
        spawn_listener(config.server.test_signal_port, Arc::clone(&self.test_signals)).await?;
        spawn_listener(config.server.detector_port, Arc::clone(&self.detectors)).await?;
        spawn_listener(config.server.archiver_port, Arc::clone(&self.archivers)).await?;
        spawn_listener(config.server.channelizer_port, Arc::clone(&self.channelizers)).await?;
        spawn_listener(
            config.server.component_control_port,
            Arc::clone(&self.controls),
        )
        .await?;
        Ok(())
    }

    /// Detector names the topology expects but that are not connected.
    pub fn missing_detectors(&self) -> Vec<String> {
        let connected = self.detectors.names_of_proxies();
        let connected: std::collections::HashSet<&str> =
            connected.split_whitespace().collect();
        self.topology
            .component_names(seeker_core::topology::NodeKind::Detector)
            .into_iter()
            .filter(|name| !connected.contains(name))
            .map(|name| name.to_string())
            .collect()
    }
}

async fn spawn_listener<P: ManagedProxy>(
    port: u16,
    manager: Arc<ComponentManager<P>>,
) -> AppResult<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    info!(
        kind = %P::kind(),
        %addr,
        "listening for components"
    );

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let remote_host = peer.ip().to_string();
                    let (inner, outbound_rx) = ComponentProxy::new(
                        P::kind(),
                        remote_host,
                        EXPECTED_INTERFACE_VERSION,
                    );
                    let typed = P::from_inner(inner);
                    manager.register_proxy(typed.clone()).await;
                    tokio::spawn(proxy::run_proxy_io(
                        typed,
                        Arc::clone(&manager),
                        stream,
                        outbound_rx,
                    ));
                }
                Err(err) => {
                    warn!(kind = %P::kind(), %err, "accept failed");
                }
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seeker_core::topology::NodeKind;

    fn topology() -> ExpectedTopology {
        ExpectedTopology::parse(
            "seeker expected components v1.0\n\
             Site main IfChainList ifc1\n\
             IfChain ifc1 BeamList beam1\n\
             Beam beam1 DetectorList dx1 dx2\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn site_without_database_has_no_history() {
        let mut config = SeekerConfig::default();
        config.database.use_database = false;
        let site = Site::new(&config, topology()).await.unwrap();
        assert!(site.obs_history.is_none());
        assert_eq!(site.detectors.number_of_proxies(), 0);
        assert_eq!(
            site.topology.component_names(NodeKind::Detector),
            vec!["dx1", "dx2"]
        );
        // Nothing connected yet, so the whole expected pool is missing.
        assert_eq!(site.missing_detectors(), vec!["dx1", "dx2"]);
    }
}
