//! Conformance helpers shared by backend tests

use crate::Shard;

/// Requests per conformance batch
pub const TEST_BATCH_SIZE: usize = 3;

/// `size` bytes counting up from zero, wrapping at 256
pub fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| i as u8).collect()
}

/// Run the three-request batch `{1}`, `{0}`, `{0, 1, 2}` against `shard` and
/// check every response block against its data.
pub fn helper_test_shard_read(shard: &mut dyn Shard) {
    let num_buckets = shard.num_buckets();
    assert!(
        num_buckets >= 3,
        "test misconfigured: shard has {} buckets, needs 3",
        num_buckets
    );

    let stride = pirlog_core::bitvec::request_vector_len(num_buckets);
    let mut requests = vec![0u8; stride * TEST_BATCH_SIZE];
    let mut select = |row: usize, bucket: usize| {
        pirlog_core::bitvec::set_bit(&mut requests[row * stride..(row + 1) * stride], bucket);
    };
    select(0, 1);
    select(1, 0);
    select(2, 0);
    select(2, 1);
    select(2, 2);

    let response = shard.read(&requests, stride).expect("shard read failed");
    let bucket_size = shard.bucket_size();
    let data = shard.data();
    assert_eq!(response.len(), TEST_BATCH_SIZE * bucket_size);

    let bucket = |b: usize| &data[b * bucket_size..(b + 1) * bucket_size];

    assert_eq!(&response[..bucket_size], bucket(1), "response 0 incorrect");
    assert_eq!(
        &response[bucket_size..2 * bucket_size],
        bucket(0),
        "response 1 incorrect"
    );
    let expected: Vec<u8> = (0..bucket_size)
        .map(|i| bucket(0)[i] ^ bucket(1)[i] ^ bucket(2)[i])
        .collect();
    assert_eq!(
        &response[2 * bucket_size..],
        &expected[..],
        "response 2 incorrect"
    );
}
