//! Replica and coordinator server processes

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;

use crate::config::{CoordinatorConfig, ReplicaConfig};
use crate::coordinator::LayoutCoordinator;
use crate::error::{Result, ServerError};
use crate::replica::Replica;
use crate::routes::{create_coordinator_router, create_replica_router};
use crate::transport::{HttpLayoutSource, LayoutSource};

async fn serve(addr: SocketAddr, router: Router) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))
}

/// A replica bound to an address
pub struct ReplicaServer {
    replica: Replica,
    addr: SocketAddr,
    metrics: Option<PrometheusHandle>,
}

impl ReplicaServer {
    pub fn router(&self) -> Router {
        create_replica_router(self.replica.clone(), self.metrics.clone())
    }

    /// Run the server
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            replica = %self.replica.config().name,
            addr = %self.addr,
            "Starting replica"
        );
        serve(self.addr, self.router()).await
    }

    /// Get the replica handle for testing
    pub fn replica(&self) -> Replica {
        self.replica.clone()
    }
}

/// Builder for ReplicaServer
pub struct ServerBuilder {
    config: ReplicaConfig,
    source: Option<Arc<dyn LayoutSource>>,
    metrics: Option<PrometheusHandle>,
}

impl ServerBuilder {
    pub fn new(config: ReplicaConfig) -> Self {
        Self {
            config,
            source: None,
            metrics: None,
        }
    }

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.config.addr = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.addr = ([0, 0, 0, 0], port).into();
        self
    }

    /// Fetch layouts from `source` instead of over HTTP
    pub fn layout_source(mut self, source: Arc<dyn LayoutSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Serve `/metrics` from `handle`
    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn build(self) -> Result<ReplicaServer> {
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpLayoutSource::new()?),
        };
        let addr = self.config.addr;
        let replica = Replica::new(self.config, source)?;
        Ok(ReplicaServer {
            replica,
            addr,
            metrics: self.metrics,
        })
    }
}

/// A layout coordinator bound to an address
pub struct CoordinatorServer {
    coordinator: Arc<LayoutCoordinator>,
    addr: SocketAddr,
    metrics: Option<PrometheusHandle>,
    snapshot_loop: bool,
}

impl CoordinatorServer {
    pub fn router(&self) -> Router {
        create_coordinator_router(Arc::clone(&self.coordinator), self.metrics.clone())
    }

    /// Run the server and, unless disabled, the periodic snapshot loop
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            addr = %self.addr,
            replicas = self.coordinator.config().replicas.len(),
            interval_ms = self.coordinator.config().snapshot_interval_ms,
            "Starting layout coordinator"
        );

        let snapshots = self.snapshot_loop.then(|| self.coordinator.spawn());
        let result = serve(self.addr, self.router()).await;
        if let Some(handle) = snapshots {
            handle.abort();
        }
        result
    }

    /// Get the coordinator for testing
    pub fn coordinator(&self) -> Arc<LayoutCoordinator> {
        Arc::clone(&self.coordinator)
    }
}

/// Builder for CoordinatorServer
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    metrics: Option<PrometheusHandle>,
    snapshot_loop: bool,
}

impl CoordinatorBuilder {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            metrics: None,
            snapshot_loop: true,
        }
    }

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.config.addr = addr;
        self
    }

    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Only build snapshots on `POST /snapshot` (useful for testing)
    pub fn manual_snapshots(mut self) -> Self {
        self.snapshot_loop = false;
        self
    }

    pub fn build(self) -> Result<CoordinatorServer> {
        let addr = self.config.addr;
        let coordinator = LayoutCoordinator::new(self.config)?;
        coordinator.connect_replicas()?;
        Ok(CoordinatorServer {
            coordinator: Arc::new(coordinator),
            addr,
            metrics: self.metrics,
            snapshot_loop: self.snapshot_loop,
        })
    }
}
