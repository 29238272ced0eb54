//! HTTP routes for replicas and the layout coordinator
//!
//! Every protocol reply is returned with 200 and carries its own `err`
//! field; only malformed requests and internal faults map to error statuses.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use pirlog_core::wire::{
    GetInfoReply, GetLayoutArgs, GetLayoutReply, NotifyArgs, NotifyReply, PublishArgs,
    PublishReply, ReadReply, ReplicaReadArgs, WriteArgs, WriteReply,
};
use pirlog_core::SnapshotId;
use serde::{Deserialize, Serialize};

use crate::coordinator::{CoordinatorStats, LayoutCoordinator};
use crate::replica::{Replica, ReplicaStats};

/// Replica health check response
#[derive(Serialize, Deserialize)]
pub struct ReplicaHealth {
    pub status: String,
    pub replica: ReplicaStats,
}

/// Coordinator health check response
#[derive(Serialize, Deserialize)]
pub struct CoordinatorHealth {
    pub status: String,
    pub coordinator: CoordinatorStats,
}

/// Snapshot trigger response
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub snapshot_id: SnapshotId,
}

async fn replica_health(State(replica): State<Replica>) -> Json<ReplicaHealth> {
    let stats = replica.stats();
    let status = if stats.snapshot_id > 0 { "ready" } else { "waiting_for_layout" };
    Json(ReplicaHealth {
        status: status.to_string(),
        replica: stats,
    })
}

async fn info(State(replica): State<Replica>) -> Json<GetInfoReply> {
    Json(replica.get_info())
}

async fn notify(State(replica): State<Replica>, Json(args): Json<NotifyArgs>) -> Json<NotifyReply> {
    Json(replica.notify(args))
}

async fn write(State(replica): State<Replica>, Json(args): Json<WriteArgs>) -> Json<WriteReply> {
    Json(replica.write(args))
}

async fn read(State(replica): State<Replica>, Json(args): Json<ReplicaReadArgs>) -> Json<ReadReply> {
    Json(replica.read(args).await)
}

/// Create the replica router
pub fn create_replica_router(replica: Replica, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", get(replica_health))
        .route("/info", get(info))
        .route("/notify", post(notify))
        .route("/write", post(write))
        .route("/read", post(read))
        .with_state(replica);

    with_metrics(router, metrics)
}

async fn coordinator_health(
    State(coordinator): State<Arc<LayoutCoordinator>>,
) -> Json<CoordinatorHealth> {
    Json(CoordinatorHealth {
        status: "ready".to_string(),
        coordinator: coordinator.stats(),
    })
}

async fn layout(
    State(coordinator): State<Arc<LayoutCoordinator>>,
    Json(args): Json<GetLayoutArgs>,
) -> Json<GetLayoutReply> {
    Json(coordinator.get_layout(args))
}

async fn publish(
    State(coordinator): State<Arc<LayoutCoordinator>>,
    Json(args): Json<PublishArgs>,
) -> Json<PublishReply> {
    Json(coordinator.publish(args).await)
}

async fn snapshot(State(coordinator): State<Arc<LayoutCoordinator>>) -> Json<SnapshotResponse> {
    Json(SnapshotResponse {
        snapshot_id: coordinator.build_snapshot().await,
    })
}

/// Create the coordinator router
pub fn create_coordinator_router(
    coordinator: Arc<LayoutCoordinator>,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let router = Router::new()
        .route("/health", get(coordinator_health))
        .route("/layout", post(layout))
        .route("/publish", post(publish))
        .route("/snapshot", post(snapshot))
        .with_state(coordinator);

    with_metrics(router, metrics)
}

fn with_metrics(router: Router, metrics: Option<PrometheusHandle>) -> Router {
    match metrics {
        Some(handle) => router.route("/metrics", get(move || std::future::ready(handle.render()))),
        None => router,
    }
}
