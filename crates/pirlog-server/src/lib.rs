//! pirlog-server: replicas and the layout coordinator
//!
//! Replicas buffer writes, adopt layouts as immutable snapshots and answer
//! oblivious batch reads. The coordinator owns the cuckoo table, forwards
//! writes and publishes layouts.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod replica;
pub mod routes;
pub mod server;
pub mod transport;

pub use config::{CoordinatorConfig, ReplicaConfig};
pub use coordinator::{CoordinatorStats, FrozenLayout, LayoutCoordinator};
pub use error::ServerError;
pub use replica::{Replica, ReplicaStats, Snapshot};
pub use routes::{create_coordinator_router, create_replica_router};
pub use server::{CoordinatorBuilder, CoordinatorServer, ReplicaServer, ServerBuilder};
pub use transport::{HttpLayoutSource, HttpReplica, LayoutSource, ReplicaTransport};
