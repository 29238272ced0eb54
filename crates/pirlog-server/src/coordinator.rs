//! Layout coordinator: owns the cuckoo table and publishes layouts
//!
//! Writers publish through the coordinator, which assigns entry IDs, places
//! entries in the table and forwards the data to every replica. Snapshots
//! freeze the table into a [`Layout`] under the next snapshot ID; replicas
//! are notified and pull their slice with `GetLayout`.
//!
//! An entry stays out of frozen layouts until every replica has accepted
//! its data.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use arc_swap::ArcSwap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use pirlog_core::constants::FIRST_ENTRY_ID;
use pirlog_core::wire::{
    GetLayoutArgs, GetLayoutReply, LayoutStatus, NotifyArgs, PublishArgs, PublishReply, WriteArgs,
};
use pirlog_core::{CuckooTable, Entry, EntryId, Insertion, Layout, SnapshotId};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::metrics;
use crate::transport::{HttpReplica, LayoutSource, ReplicaTransport};

/// A layout frozen under a snapshot ID
#[derive(Debug, Clone)]
pub struct FrozenLayout {
    pub snapshot_id: SnapshotId,
    pub layout: Layout,
    /// Oldest live entry ID when the layout was frozen
    pub oldest_live: EntryId,
}

/// Coordinator statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub snapshot_id: SnapshotId,
    pub entries: usize,
    pub load_factor: f64,
    pub next_id: EntryId,
    pub replicas: usize,
}

struct TableState {
    table: CuckooTable<EntryId>,
    /// Live entries, oldest first
    live: VecDeque<Entry<EntryId>>,
    /// Placed entries whose replica writes are still outstanding
    uncommitted: HashSet<EntryId>,
    next_id: EntryId,
    /// Table changed since the last snapshot
    dirty: bool,
}

pub struct LayoutCoordinator {
    config: CoordinatorConfig,
    state: Mutex<TableState>,
    current: ArcSwap<FrozenLayout>,
    replicas: RwLock<Vec<Arc<dyn ReplicaTransport>>>,
}

impl LayoutCoordinator {
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.log.validate()?;

        let log = &config.log;
        let num_buckets = log.num_buckets as usize;
        let depth = log.bucket_depth as usize;
        let bound = log.displacement_bound();
        let table = match config.eviction_seed {
            Some(seed) => CuckooTable::with_seed(num_buckets, depth, bound, seed),
            None => CuckooTable::new(num_buckets, depth, bound),
        };

        let initial = FrozenLayout {
            snapshot_id: 0,
            layout: Layout::empty(log.layout_len()),
            oldest_live: FIRST_ENTRY_ID,
        };

        info!(
            num_buckets,
            depth,
            max_displacements = bound,
            window = log.window_size,
            "Layout coordinator initialized"
        );

        Ok(Self {
            state: Mutex::new(TableState {
                table,
                live: VecDeque::new(),
                uncommitted: HashSet::new(),
                next_id: FIRST_ENTRY_ID,
                dirty: false,
            }),
            current: ArcSwap::from_pointee(initial),
            replicas: RwLock::new(Vec::new()),
            config,
        })
    }

    /// Register an HTTP transport for every configured replica URL
    pub fn connect_replicas(&self) -> Result<()> {
        for url in &self.config.replicas {
            self.add_replica(Arc::new(HttpReplica::new(url)?));
        }
        Ok(())
    }

    pub fn add_replica(&self, replica: Arc<dyn ReplicaTransport>) {
        debug!(replica = replica.target(), "Replica registered");
        self.replicas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(replica);
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replicas(&self) -> Vec<Arc<dyn ReplicaTransport>> {
        self.replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently frozen layout
    pub fn current(&self) -> Arc<FrozenLayout> {
        self.current.load_full()
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.current.load().snapshot_id
    }

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.state();
        CoordinatorStats {
            snapshot_id: self.snapshot_id(),
            entries: state.table.len(),
            load_factor: state.table.load_factor(),
            next_id: state.next_id,
            replicas: self.replicas().len(),
        }
    }

    /// Place an entry and forward its data to every replica. The entry
    /// joins frozen layouts once every write succeeded; on any replica
    /// failure it is taken back out of the table.
    pub async fn publish(&self, args: PublishArgs) -> PublishReply {
        let log = &self.config.log;
        if args.data.len() as u64 != log.data_size {
            metrics::record_publish(metrics::OUTCOME_CLIENT_ERROR);
            return publish_error(pirlog_core::Error::Validation(format!(
                "data is {} bytes, expected {}",
                args.data.len(),
                log.data_size
            )));
        }
        if args.bucket1 >= log.num_buckets || args.bucket2 >= log.num_buckets {
            metrics::record_publish(metrics::OUTCOME_CLIENT_ERROR);
            return publish_error(pirlog_core::Error::Validation(format!(
                "buckets ({}, {}) out of range ({} buckets)",
                args.bucket1, args.bucket2, log.num_buckets
            )));
        }

        let entry = {
            let mut state = self.state();
            while state.live.len() as u64 >= log.window_size {
                if let Some(oldest) = state.live.pop_front() {
                    state.table.remove(&oldest);
                    state.uncommitted.remove(&oldest.data);
                    state.dirty = true;
                    debug!(id = oldest.data, "Entry left the retention window");
                }
            }

            let entry = Entry::new(args.bucket1 as usize, args.bucket2 as usize, state.next_id);
            match state.table.insert(entry.clone()) {
                Ok(Insertion::Inserted | Insertion::Resident) => {}
                Ok(Insertion::Displaced { evicted, moves }) => {
                    debug!(id = entry.data, evicted = evicted.data, moves, "Entry placed by displacement");
                }
                Err(e) => {
                    warn!(error = %e, entries = state.table.len(), "Cuckoo placement failed");
                    metrics::record_publish(metrics::OUTCOME_SERVER_ERROR);
                    return publish_error(pirlog_core::Error::from(e));
                }
            }
            state.next_id += 1;
            state.live.push_back(entry.clone());
            state.uncommitted.insert(entry.data);
            metrics::set_table_load(state.table.len(), state.table.load_factor());
            entry
        };

        let replicas = self.replicas();
        let writes = replicas.iter().map(|replica| {
            replica.write(WriteArgs {
                id: entry.data,
                data: args.data.clone(),
            })
        });
        let results = join_all(writes).await;

        let failures: Vec<String> = replicas
            .iter()
            .zip(results)
            .filter_map(|(replica, result)| match result {
                Ok(reply) => reply.err.map(|e| format!("{}: {}", replica.target(), e)),
                Err(e) => Some(format!("{}: {}", replica.target(), e)),
            })
            .collect();

        if !failures.is_empty() {
            {
                let mut state = self.state();
                state.uncommitted.remove(&entry.data);
                state.table.remove(&entry);
                state.live.retain(|live| live != &entry);
                // Displacements made for the entry stay in place
                state.dirty = true;
            }
            warn!(id = entry.data, failed = failures.len(), "Replica write failed, entry withdrawn");
            metrics::record_publish(metrics::OUTCOME_SERVER_ERROR);
            return PublishReply {
                id: 0,
                err: Some(format!("replica write failed: {}", failures.join("; "))),
            };
        }

        {
            let mut state = self.state();
            // Already gone if the window overtook the writes
            if state.uncommitted.remove(&entry.data) {
                state.dirty = true;
            }
        }

        metrics::record_publish(metrics::OUTCOME_OK);
        PublishReply {
            id: entry.data,
            err: None,
        }
    }

    /// Freeze the table under the next snapshot ID and notify replicas
    pub async fn build_snapshot(&self) -> SnapshotId {
        let start = Instant::now();
        let frozen = {
            let mut state = self.state();
            state.dirty = false;
            let frozen = Arc::new(FrozenLayout {
                snapshot_id: self.snapshot_id() + 1,
                layout: Layout::from_table_where(&state.table, |id| {
                    !state.uncommitted.contains(&id)
                }),
                oldest_live: state.live.front().map_or(state.next_id, |entry| entry.data),
            });
            self.current.store(Arc::clone(&frozen));
            frozen
        };

        metrics::record_snapshot_built(frozen.snapshot_id, start.elapsed());
        info!(
            snapshot_id = frozen.snapshot_id,
            entries = frozen.layout.occupied().count(),
            oldest_live = frozen.oldest_live,
            "Snapshot built"
        );

        self.notify_replicas(frozen.snapshot_id).await;
        frozen.snapshot_id
    }

    /// Build a snapshot only if the table changed since the last one
    pub async fn build_if_changed(&self) -> Option<SnapshotId> {
        if !self.state().dirty {
            return None;
        }
        Some(self.build_snapshot().await)
    }

    async fn notify_replicas(&self, snapshot_id: SnapshotId) {
        let addr = self.config.layout_url();
        let replicas = self.replicas();
        let notifies = replicas.iter().map(|replica| {
            replica.notify(NotifyArgs {
                addr: addr.clone(),
                snapshot_id,
            })
        });
        for (replica, result) in replicas.iter().zip(join_all(notifies).await) {
            let err = match result {
                Ok(reply) => reply.err,
                Err(e) => Some(e.to_string()),
            };
            if let Some(err) = err {
                warn!(replica = replica.target(), snapshot_id, error = %err, "Notify failed");
            }
        }
    }

    /// Slice `args.index` of the current layout, cut `args.num_split` ways
    pub fn get_layout(&self, args: GetLayoutArgs) -> GetLayoutReply {
        let current = self.current.load();
        if args.snapshot_id != current.snapshot_id {
            return GetLayoutReply {
                err: LayoutStatus::InvalidSnapshot,
                snapshot_id: current.snapshot_id,
                layout: Vec::new(),
                oldest_live: current.oldest_live,
            };
        }

        match current.layout.split(args.index, args.num_split) {
            Ok(slice) => GetLayoutReply {
                err: LayoutStatus::Ok,
                snapshot_id: current.snapshot_id,
                layout: slice.to_vec(),
                oldest_live: current.oldest_live,
            },
            Err(e) => {
                debug!(error = %e, "Layout request rejected");
                GetLayoutReply {
                    err: e.into(),
                    snapshot_id: current.snapshot_id,
                    layout: Vec::new(),
                    oldest_live: current.oldest_live,
                }
            }
        }
    }

    /// Build snapshots on the configured interval until the task is dropped
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.snapshot_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(snapshot_id) = self.build_if_changed().await {
                debug!(snapshot_id, "Periodic snapshot");
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }
}

fn publish_error(err: pirlog_core::Error) -> PublishReply {
    PublishReply {
        id: 0,
        err: Some(err.to_string()),
    }
}

/// Replicas in the same process pull layouts straight from the coordinator
impl LayoutSource for LayoutCoordinator {
    fn get_layout<'a>(
        &'a self,
        _addr: &'a str,
        args: GetLayoutArgs,
    ) -> BoxFuture<'a, Result<GetLayoutReply>> {
        let reply = LayoutCoordinator::get_layout(self, args);
        async move { Ok(reply) }.boxed()
    }
}
