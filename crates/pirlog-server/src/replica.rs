//! Replica state: pending writes, the active snapshot, and reads against it
//!
//! Two independent lock scopes:
//! - the active [`Snapshot`] sits behind an `ArcSwap` and is replaced whole
//!   after a successful apply, so readers never wait on a layout build
//! - the pending-entry buffer sits behind a short-held mutex that the apply
//!   path only takes for its ID-resolution scan
//!
//! Layout refreshes run in the background and are coalesced per target
//! snapshot ID, including targets a refresh switches to after the
//! coordinator moved on. A refresh that finishes after a newer snapshot was
//! adopted is discarded.
//!
//! Pending entries below the coordinator's oldest live ID are collected
//! whenever a snapshot is adopted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use futures::FutureExt;
use pirlog_core::bitvec::{extract_bits, request_vector_len, xor_into};
use pirlog_core::constants::EMPTY_SLOT_ID;
use pirlog_core::wire::{
    GetInfoReply, GetLayoutArgs, LayoutStatus, NotifyArgs, NotifyReply, PirArgs, ReadReply,
    ReplicaReadArgs, WriteArgs, WriteReply,
};
use pirlog_core::{drbg, EntryId, Layout, SnapshotId, SEED_LENGTH};
use pirlog_pir::{new_shard, Shard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReplicaConfig;
use crate::error::{Result, ServerError};
use crate::metrics;
use crate::transport::{LayoutSource, ReplicaTransport};

/// Attempts to chase a moving snapshot ID before giving up on a refresh
const MAX_LAYOUT_ATTEMPTS: usize = 3;

/// An adopted layout slice and the shards materialized from it
pub struct Snapshot {
    pub id: SnapshotId,
    /// This replica's slice of the layout
    pub layout: Layout,
    shards: Vec<Mutex<Box<dyn Shard>>>,
}

impl Snapshot {
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }
}

/// Replica statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaStats {
    pub name: String,
    pub group: u64,
    pub snapshot_id: SnapshotId,
    pub pending_entries: usize,
    pub refreshes_in_flight: usize,
}

struct ReplicaState {
    config: ReplicaConfig,
    source: Arc<dyn LayoutSource>,
    snapshot: ArcSwap<Snapshot>,
    pending: Mutex<HashMap<EntryId, Vec<u8>>>,
    in_flight: Mutex<HashSet<SnapshotId>>,
}

/// Cheaply cloneable handle on one replica
#[derive(Clone)]
pub struct Replica {
    inner: Arc<ReplicaState>,
}

impl Replica {
    /// Create a replica serving an empty snapshot 0
    pub fn new(config: ReplicaConfig, source: Arc<dyn LayoutSource>) -> Result<Self> {
        config.validate()?;

        let slots = config.items_per_shard() * config.log.num_shards_per_group as usize;
        let initial = Self::materialize(&config, 0, Layout::empty(slots), &HashMap::new())?;
        metrics::set_active_snapshot(0);

        info!(
            replica = %config.name,
            group = config.group,
            shards = config.log.num_shards_per_group,
            backing = %config.backing,
            "Replica initialized"
        );

        Ok(Self {
            inner: Arc::new(ReplicaState {
                config,
                source,
                snapshot: ArcSwap::from_pointee(initial),
                pending: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.inner.config
    }

    /// ID of the active snapshot
    pub fn snapshot_id(&self) -> SnapshotId {
        self.inner.snapshot.load().id
    }

    /// The active snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// True if `id` is waiting in the pending buffer
    pub fn has_pending(&self, id: EntryId) -> bool {
        self.pending().contains_key(&id)
    }

    pub fn stats(&self) -> ReplicaStats {
        ReplicaStats {
            name: self.inner.config.name.clone(),
            group: self.inner.config.group,
            snapshot_id: self.snapshot_id(),
            pending_entries: self.pending_len(),
            refreshes_in_flight: self.in_flight().len(),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<EntryId, Vec<u8>>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<SnapshotId>> {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_info(&self) -> GetInfoReply {
        GetInfoReply {
            name: self.inner.config.name.clone(),
            snapshot_id: self.snapshot_id(),
            err: None,
        }
    }

    /// Buffer an entry until a layout references it. Rewriting an ID
    /// replaces its data.
    pub fn write(&self, args: WriteArgs) -> WriteReply {
        let data_size = self.inner.config.log.data_size as usize;
        if args.data.len() != data_size {
            metrics::record_write(metrics::OUTCOME_CLIENT_ERROR);
            return WriteReply::error(pirlog_core::Error::Validation(format!(
                "data is {} bytes, expected {}",
                args.data.len(),
                data_size
            )));
        }
        if args.id == EMPTY_SLOT_ID {
            metrics::record_write(metrics::OUTCOME_CLIENT_ERROR);
            return WriteReply::error(pirlog_core::Error::Validation(
                "entry id 0 is reserved".to_string(),
            ));
        }

        let pending = {
            let mut pending = self.pending();
            pending.insert(args.id, args.data);
            pending.len()
        };
        metrics::record_write(metrics::OUTCOME_OK);
        metrics::set_pending_entries(pending);
        debug!(id = args.id, "Entry buffered");
        WriteReply::ok()
    }

    /// Start fetching layout `snapshot_id` from `addr` in the background
    pub fn notify(&self, args: NotifyArgs) -> NotifyReply {
        self.trigger_refresh(args.addr, args.snapshot_id);
        NotifyReply::default()
    }

    /// Answer one trust domain's batch. A replica behind `snapshot_id`
    /// kicks off a refresh and reports staleness without waiting.
    pub async fn read(&self, args: ReplicaReadArgs) -> ReadReply {
        let start = Instant::now();
        let batch = args.requests.len();
        let snapshot = self.snapshot();

        if snapshot.id < args.snapshot_id {
            self.trigger_refresh(self.inner.config.layout_addr.clone(), args.snapshot_id);
            metrics::record_read(metrics::OUTCOME_STALE, batch, start.elapsed());
            return ReadReply::stale(snapshot.id, args.snapshot_id);
        }

        if let Err(e) = self.validate_requests(&args.requests) {
            metrics::record_read(metrics::OUTCOME_CLIENT_ERROR, batch, start.elapsed());
            return ReadReply::error(e);
        }

        let config = self.inner.config.clone();
        let result = tokio::task::spawn_blocking(move || {
            answer(&config, &snapshot, &args.requests)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("read task failed: {}", e)))
        .and_then(|r| r);

        match result {
            Ok(data) => {
                metrics::record_read(metrics::OUTCOME_OK, batch, start.elapsed());
                ReadReply::ok(data)
            }
            Err(e) => {
                warn!(error = %e, "Read failed");
                metrics::record_read(metrics::OUTCOME_SERVER_ERROR, batch, start.elapsed());
                ReadReply::error(e)
            }
        }
    }

    fn validate_requests(&self, requests: &[PirArgs]) -> pirlog_core::Result<()> {
        let vector_len = self.inner.config.log.request_vector_len();
        for (i, request) in requests.iter().enumerate() {
            if request.request_vector.len() != vector_len {
                return Err(pirlog_core::Error::Validation(format!(
                    "request {} vector is {} bytes, expected {}",
                    i,
                    request.request_vector.len(),
                    vector_len
                )));
            }
            if request.pad_seed.len() != SEED_LENGTH {
                return Err(pirlog_core::Error::Validation(format!(
                    "request {} pad seed is {} bytes, expected {}",
                    i,
                    request.pad_seed.len(),
                    SEED_LENGTH
                )));
            }
        }
        Ok(())
    }

    /// Spawn a layout fetch unless one for the same target is running
    fn trigger_refresh(&self, addr: String, target: SnapshotId) {
        if target <= self.snapshot_id() {
            return;
        }
        if !self.in_flight().insert(target) {
            metrics::record_refresh_coalesced();
            debug!(snapshot_id = target, "Layout refresh already in flight");
            return;
        }

        let replica = self.clone();
        tokio::spawn(async move {
            let result = replica.refresh(&addr, target).await;
            replica.in_flight().remove(&target);
            match result {
                Ok(Some(id)) => debug!(snapshot_id = id, "Layout refresh adopted"),
                Ok(None) => debug!(snapshot_id = target, "Layout refresh superseded"),
                Err(e) => warn!(snapshot_id = target, addr = %addr, error = %e, "Layout refresh failed"),
            }
        });
    }

    /// Fetch and apply a layout at least as new as `target`. Returns the
    /// adopted snapshot ID, or `None` if a newer snapshot won the race or
    /// another refresh already fetches the snapshot the coordinator moved to.
    pub async fn refresh(&self, addr: &str, target: SnapshotId) -> Result<Option<SnapshotId>> {
        let mut claimed = Vec::new();
        let result = self.chase_layout(addr, target, &mut claimed).await;
        let mut in_flight = self.in_flight();
        for id in claimed {
            in_flight.remove(&id);
        }
        result
    }

    /// Targets switched to along the way are recorded in `claimed`
    async fn chase_layout(
        &self,
        addr: &str,
        target: SnapshotId,
        claimed: &mut Vec<SnapshotId>,
    ) -> Result<Option<SnapshotId>> {
        let config = &self.inner.config;
        let mut want = target;

        for _ in 0..MAX_LAYOUT_ATTEMPTS {
            if want <= self.snapshot_id() {
                return Ok(None);
            }
            let args = GetLayoutArgs {
                snapshot_id: want,
                index: config.group,
                num_split: config.num_split(),
            };
            let reply = self.inner.source.get_layout(addr, args).await?;

            match reply.err {
                LayoutStatus::Ok => {
                    let adopted =
                        self.apply_layout(reply.snapshot_id, reply.layout, reply.oldest_live)?;
                    return Ok(adopted.then_some(reply.snapshot_id));
                }
                LayoutStatus::InvalidSnapshot => {
                    debug!(
                        requested = want,
                        current = reply.snapshot_id,
                        "Coordinator moved on, retrying"
                    );
                    want = reply.snapshot_id;
                    if want <= self.snapshot_id() {
                        return Ok(None);
                    }
                    if !self.in_flight().insert(want) {
                        metrics::record_refresh_coalesced();
                        debug!(snapshot_id = want, "Layout refresh already in flight");
                        return Ok(None);
                    }
                    claimed.push(want);
                }
                status @ (LayoutStatus::InvalidIndex | LayoutStatus::InvalidNumsplit) => {
                    return Err(ServerError::Core(pirlog_core::Error::Validation(format!(
                        "coordinator rejected group {} of {}: {:?}",
                        config.group,
                        config.num_split(),
                        status
                    ))));
                }
            }
        }

        Err(ServerError::Remote {
            addr: addr.to_string(),
            reason: format!("snapshot kept moving past {}", want),
        })
    }

    /// Materialize shards for `ids` and adopt them as snapshot
    /// `snapshot_id`. All or nothing: any missing entry leaves the active
    /// snapshot untouched. Returns `false` if a snapshot at least as new was
    /// already active. Once adopted, pending entries below `oldest_live`
    /// are dropped.
    pub fn apply_layout(
        &self,
        snapshot_id: SnapshotId,
        ids: Vec<EntryId>,
        oldest_live: EntryId,
    ) -> Result<bool> {
        let start = Instant::now();
        let config = &self.inner.config;

        if snapshot_id <= self.snapshot_id() {
            return Ok(false);
        }

        let layout = Layout::from_ids(ids);
        let built = {
            let pending = self.pending();
            Self::materialize(config, snapshot_id, layout, &pending)
        };
        let snapshot = match built {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(snapshot_id, error = %e, "Layout apply aborted, keeping current snapshot");
                metrics::record_layout_apply(metrics::OUTCOME_SERVER_ERROR, start.elapsed());
                return Err(e);
            }
        };

        let mut adopted = false;
        let previous = self.inner.snapshot.rcu(|current| {
            adopted = current.id < snapshot.id;
            if adopted {
                Arc::clone(&snapshot)
            } else {
                Arc::clone(current)
            }
        });

        if !adopted {
            metrics::record_layout_apply(metrics::OUTCOME_STALE, start.elapsed());
            return Ok(false);
        }

        self.collect_garbage(oldest_live);

        metrics::set_active_snapshot(snapshot_id);
        metrics::record_layout_apply(metrics::OUTCOME_OK, start.elapsed());
        info!(
            replica = %config.name,
            snapshot_id,
            previous = previous.id,
            entries = snapshot.layout.occupied().count(),
            shards = snapshot.num_shards(),
            "Snapshot adopted"
        );
        Ok(true)
    }

    /// Drop pending entries no current or future layout can reference.
    /// IDs only grow and the coordinator retires them oldest first.
    fn collect_garbage(&self, oldest_live: EntryId) {
        let mut pending = self.pending();
        let before = pending.len();
        pending.retain(|&id, _| id >= oldest_live);
        let removed = before - pending.len();
        metrics::set_pending_entries(pending.len());
        if removed > 0 {
            debug!(removed, oldest_live, "Collected retired entries");
        }
    }

    /// Build the shard buffers for a layout slice. Empty slots stay zero.
    fn materialize(
        config: &ReplicaConfig,
        snapshot_id: SnapshotId,
        layout: Layout,
        pending: &HashMap<EntryId, Vec<u8>>,
    ) -> Result<Snapshot> {
        let num_shards = config.log.num_shards_per_group as usize;
        let items_per_shard = config.items_per_shard();
        let data_size = config.log.data_size as usize;

        if layout.len() != items_per_shard * num_shards {
            return Err(ServerError::Core(pirlog_core::Error::Validation(format!(
                "layout slice has {} slots, expected {}",
                layout.len(),
                items_per_shard * num_shards
            ))));
        }

        let mut buffers = vec![vec![0u8; items_per_shard * data_size]; num_shards];
        for (slot, &id) in layout.ids().iter().enumerate() {
            if id == EMPTY_SLOT_ID {
                continue;
            }
            let data = pending
                .get(&id)
                .ok_or(pirlog_core::Error::MissingEntry { id })?;
            let offset = (slot % items_per_shard) * data_size;
            buffers[slot / items_per_shard][offset..offset + data_size].copy_from_slice(data);
        }

        let shards = buffers
            .into_iter()
            .map(|buffer| {
                new_shard(config.backing, config.log.bucket_size(), buffer).map(Mutex::new)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Snapshot {
            id: snapshot_id,
            layout,
            shards,
        })
    }
}

/// XOR of the selected buckets across this replica's shards, one block per
/// request, each block overlaid with its request's pad
fn answer(config: &ReplicaConfig, snapshot: &Snapshot, requests: &[PirArgs]) -> Result<Vec<u8>> {
    let bucket_size = config.log.bucket_size();
    let buckets_per_shard = config.log.num_buckets_per_shard as usize;
    let stride = request_vector_len(buckets_per_shard);
    let mut response = vec![0u8; requests.len() * bucket_size];

    for (k, shard) in snapshot.shards.iter().enumerate() {
        let first = config.first_bucket() + k * buckets_per_shard;
        let batch: Vec<u8> = requests
            .iter()
            .flat_map(|r| extract_bits(&r.request_vector, first, buckets_per_shard))
            .collect();

        let part = {
            let mut shard = shard
                .lock()
                .map_err(|_| ServerError::Internal("shard lock poisoned".to_string()))?;
            shard.read(&batch, stride)?
        };
        xor_into(&mut response, &part);
    }

    for (block, request) in response.chunks_exact_mut(bucket_size).zip(requests) {
        drbg::overlay(&request.pad_seed, block)?;
    }
    Ok(response)
}

impl ReplicaTransport for Replica {
    fn target(&self) -> &str {
        &self.inner.config.name
    }

    fn write(&self, args: WriteArgs) -> BoxFuture<'_, Result<WriteReply>> {
        let reply = Replica::write(self, args);
        async move { Ok(reply) }.boxed()
    }

    fn notify(&self, args: NotifyArgs) -> BoxFuture<'_, Result<NotifyReply>> {
        let reply = Replica::notify(self, args);
        async move { Ok(reply) }.boxed()
    }
}
