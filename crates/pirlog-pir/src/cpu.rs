//! Portable CPU backend
//!
//! One pass over the shard answers the whole batch. Each request bit is
//! widened into an all-zeros or all-ones byte mask and every bucket byte is
//! ANDed with it before being XORed into the accumulator, so the work done is
//! the same for every bit pattern.

use pirlog_core::bitvec::request_vector_len;
use tracing::debug;

use crate::error::ShardError;
use crate::{Result, Shard};

pub struct CpuShard {
    bucket_size: usize,
    num_buckets: usize,
    data: Option<Vec<u8>>,
}

impl CpuShard {
    pub fn new(bucket_size: usize, data: Vec<u8>) -> Result<Self> {
        if bucket_size == 0 {
            return Err(ShardError::ZeroBucketSize);
        }
        if data.len() % bucket_size != 0 {
            return Err(ShardError::UnalignedData {
                len: data.len(),
                bucket_size,
            });
        }
        let num_buckets = data.len() / bucket_size;
        debug!(num_buckets, bucket_size, "CPU shard created");
        Ok(Self {
            bucket_size,
            num_buckets,
            data: Some(data),
        })
    }

    fn check_batch(&self, requests: &[u8], req_stride: usize) -> Result<usize> {
        let needed = request_vector_len(self.num_buckets);
        if req_stride == 0 {
            return Err(ShardError::InvalidRequest("zero request stride".to_string()));
        }
        if req_stride < needed {
            return Err(ShardError::InvalidRequest(format!(
                "stride {} too short for {} buckets (need {})",
                req_stride, self.num_buckets, needed
            )));
        }
        if requests.len() % req_stride != 0 {
            return Err(ShardError::InvalidRequest(format!(
                "{} request bytes is not a multiple of stride {}",
                requests.len(),
                req_stride
            )));
        }
        Ok(requests.len() / req_stride)
    }
}

impl Shard for CpuShard {
    fn read(&mut self, requests: &[u8], req_stride: usize) -> Result<Vec<u8>> {
        let data = self.data.as_deref().ok_or(ShardError::Freed)?;
        let batch = self.check_batch(requests, req_stride)?;
        let bucket_size = self.bucket_size;

        let mut response = vec![0u8; batch * bucket_size];
        for (bucket_index, bucket) in data.chunks_exact(bucket_size).enumerate() {
            let byte = bucket_index / 8;
            let shift = bucket_index % 8;
            for (request, acc) in response.chunks_exact_mut(bucket_size).enumerate() {
                let bit = (requests[request * req_stride + byte] >> shift) & 1;
                let mask = 0u8.wrapping_sub(bit);
                for (a, d) in acc.iter_mut().zip(bucket) {
                    *a ^= d & mask;
                }
            }
        }
        Ok(response)
    }

    fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    fn free(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}
