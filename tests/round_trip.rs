//! In-process round trips: coordinator, replicas and subscriber handles
//! wired together without HTTP
//!
//! Replicas pull layouts straight from the coordinator and the coordinator
//! forwards writes and notifications straight to the replicas.

use std::sync::Arc;
use std::time::Duration;

use pirlog_client::{combine_replies, DeliveryConfig, Handle, Topic};
use pirlog_core::wire::{ReadReply, ReplicaReadArgs};
use pirlog_core::{LogConfig, SnapshotId};
use pirlog_server::{
    CoordinatorConfig, LayoutCoordinator, LayoutSource, Replica, ReplicaConfig, ReplicaTransport,
};

/// One coordinator and one replica per trust domain
struct Deployment {
    log: LogConfig,
    coordinator: Arc<LayoutCoordinator>,
    replicas: Vec<Replica>,
}

impl Deployment {
    fn new(log: LogConfig, trust_domains: usize) -> Self {
        let mut config = CoordinatorConfig::new(log.clone());
        config.eviction_seed = Some(7);
        let coordinator = Arc::new(LayoutCoordinator::new(config).expect("coordinator"));

        let replicas = (0..trust_domains)
            .map(|i| {
                let config = ReplicaConfig::new(format!("td-{}", i), "in-process", log.clone());
                let source: Arc<dyn LayoutSource> = coordinator.clone();
                let replica = Replica::new(config, source).expect("replica");
                let transport: Arc<dyn ReplicaTransport> = Arc::new(replica.clone());
                coordinator.add_replica(transport);
                replica
            })
            .collect();

        Self {
            log,
            coordinator,
            replicas,
        }
    }

    async fn publish(&self, topic: &Topic, message: &[u8]) -> u64 {
        let args = topic.generate_publish(&self.log, message).expect("seal");
        let reply = self.coordinator.publish(args).await;
        assert_eq!(reply.err, None);
        reply.id
    }

    /// Freeze a snapshot and wait until every replica serves it
    async fn snapshot(&self) -> SnapshotId {
        let id = self.coordinator.build_snapshot().await;
        for _ in 0..200 {
            if self.replicas.iter().all(|r| r.snapshot_id() >= id) {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("replicas never adopted snapshot {}", id);
    }

    /// One poll round for `handle` across every trust domain
    async fn poll(&self, handle: &mut Handle) -> Vec<Vec<u8>> {
        let snapshot_id = self.replicas[0].snapshot_id();
        let (first, second) = handle
            .generate_poll(&self.log, self.replicas.len())
            .expect("poll");

        let mut replies = Vec::new();
        for (i, replica) in self.replicas.iter().enumerate() {
            let reply = replica
                .read(ReplicaReadArgs {
                    snapshot_id,
                    requests: vec![first.td[i].clone(), second.td[i].clone()],
                })
                .await;
            assert_eq!(reply.err, None);
            replies.push(reply);
        }

        let bucket_size = self.log.bucket_size();
        let mut first_bucket = combine_replies(&replies).expect("combine").data;
        assert_eq!(first_bucket.len(), 2 * bucket_size);
        let second_bucket = first_bucket.split_off(bucket_size);

        let data_size = self.log.data_size as usize;
        let mut messages = Vec::new();
        for (args, data) in [(&first, first_bucket), (&second, second_bucket)] {
            if let Some(message) = handle.on_response(args, &ReadReply::ok(data), data_size).await {
                messages.push(message);
            }
        }
        messages.dedup();
        messages
    }
}

#[tokio::test]
async fn test_publish_snapshot_poll() {
    let deployment = Deployment::new(LogConfig::new(64, 4, 256), 2);
    let topic = Topic::new();
    let mut handle = topic.handle();
    let mut subscription = handle.subscribe(&DeliveryConfig::drop_oldest(4));

    let id = deployment.publish(&topic, b"first message").await;
    assert_eq!(id, 1);
    assert_eq!(deployment.snapshot().await, 1);

    let messages = deployment.poll(&mut handle).await;
    assert_eq!(messages, vec![b"first message".to_vec()]);
    assert_eq!(subscription.recv().await, Some(b"first message".to_vec()));
}

#[tokio::test]
async fn test_unpublished_round_yields_nothing() {
    let deployment = Deployment::new(LogConfig::new(64, 4, 256), 3);
    let topic = Topic::new();
    deployment.publish(&topic, b"round zero").await;
    deployment.snapshot().await;

    let mut handle = topic.handle();
    handle.advance();
    assert!(deployment.poll(&mut handle).await.is_empty());
}

#[tokio::test]
async fn test_many_topics_many_rounds() {
    let deployment = Deployment::new(LogConfig::new(32, 4, 192), 2);
    let mut topics: Vec<Topic> = (0..4).map(|_| Topic::new()).collect();
    let mut handles: Vec<Handle> = topics.iter().map(Topic::handle).collect();

    for round in 0..3u8 {
        for (t, topic) in topics.iter_mut().enumerate() {
            let message = format!("topic {} round {}", t, round);
            deployment.publish(topic, message.as_bytes()).await;
            topic.advance();
        }
    }
    deployment.snapshot().await;

    for round in 0..3u8 {
        for (t, handle) in handles.iter_mut().enumerate() {
            let messages = deployment.poll(handle).await;
            assert_eq!(messages, vec![format!("topic {} round {}", t, round).into_bytes()]);
            handle.advance();
        }
    }
}

#[tokio::test]
async fn test_sharded_replicas_answer_like_single_shard() {
    let log = LogConfig::new(64, 2, 160).with_shards(4, 16);
    let deployment = Deployment::new(log, 2);
    let topic = Topic::new();
    let mut handle = topic.handle();

    deployment.publish(&topic, b"sharded").await;
    deployment.snapshot().await;

    assert_eq!(deployment.replicas[0].snapshot().num_shards(), 4);
    assert_eq!(deployment.poll(&mut handle).await, vec![b"sharded".to_vec()]);
}

#[tokio::test]
async fn test_later_snapshot_keeps_earlier_messages() {
    let deployment = Deployment::new(LogConfig::new(64, 4, 256), 2);
    let mut topic = Topic::new();
    let mut handle = topic.handle();

    deployment.publish(&topic, b"one").await;
    topic.advance();
    deployment.snapshot().await;

    deployment.publish(&topic, b"two").await;
    assert_eq!(deployment.snapshot().await, 2);

    assert_eq!(deployment.poll(&mut handle).await, vec![b"one".to_vec()]);
    handle.advance();
    assert_eq!(deployment.poll(&mut handle).await, vec![b"two".to_vec()]);
}

#[tokio::test]
async fn test_window_evicts_oldest() {
    let log = LogConfig::new(64, 4, 256).with_window(2);
    let deployment = Deployment::new(log, 2);
    let mut topic = Topic::new();
    let mut handle = topic.handle();

    for message in [&b"a"[..], b"b", b"c"] {
        deployment.publish(&topic, message).await;
        topic.advance();
    }
    deployment.snapshot().await;

    assert!(deployment.poll(&mut handle).await.is_empty());
    handle.advance();
    assert_eq!(deployment.poll(&mut handle).await, vec![b"b".to_vec()]);
    handle.advance();
    assert_eq!(deployment.poll(&mut handle).await, vec![b"c".to_vec()]);
}

#[tokio::test]
async fn test_stale_read_catches_up() {
    let deployment = Deployment::new(LogConfig::new(16, 2, 128), 1);
    let topic = Topic::new();
    deployment.publish(&topic, b"late").await;

    // Freeze without waiting; a read ahead of the replica reports stale
    let id = deployment.coordinator.build_snapshot().await;
    let mut handle = topic.handle();
    let (args, _) = handle.generate_poll(&deployment.log, 1).expect("poll");
    let replica = &deployment.replicas[0];
    let reply = replica
        .read(ReplicaReadArgs {
            snapshot_id: id + 5,
            requests: args.td.clone(),
        })
        .await;
    assert!(reply.stale);
    assert!(reply.data.is_empty());

    deployment.snapshot().await;
    assert_eq!(deployment.poll(&mut handle).await, vec![b"late".to_vec()]);
}
