//! Request/reply structures exchanged between clients, replicas and the
//! layout coordinator
//!
//! Expected failures travel in each reply's `err` field; transports only
//! fail for faults outside the protocol. Byte fields are hex strings in JSON.

use serde::{Deserialize, Serialize};

use crate::{EntryId, SnapshotId};

/// Store one entry in a replica's pending buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteArgs {
    pub id: EntryId,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl WriteReply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(err: impl ToString) -> Self {
        Self {
            err: Some(err.to_string()),
        }
    }
}

/// One trust domain's share of a read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PirArgs {
    /// Bitset over all bucket indices
    #[serde(with = "hex_bytes")]
    pub request_vector: Vec<u8>,
    /// Seed of the pad the replica overlays on its answer
    #[serde(with = "hex_bytes")]
    pub pad_seed: Vec<u8>,
}

/// A read split across trust domains. `td[i]` goes to domain `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadArgs {
    pub td: Vec<PirArgs>,
}

/// A batch of one trust domain's shares, addressed to a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaReadArgs {
    pub snapshot_id: SnapshotId,
    pub requests: Vec<PirArgs>,
}

/// Concatenated per-request bucket values, one `bucket_size` block each
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReply {
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// The replica is behind the requested snapshot; retry later
    #[serde(default)]
    pub stale: bool,
}

impl ReadReply {
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn error(err: impl ToString) -> Self {
        Self {
            err: Some(err.to_string()),
            ..Self::default()
        }
    }

    pub fn stale(have: SnapshotId, want: SnapshotId) -> Self {
        Self {
            err: Some(crate::Error::Stale { have, want }.to_string()),
            stale: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLayoutArgs {
    pub snapshot_id: SnapshotId,
    /// Group whose slice is requested
    pub index: u64,
    /// Number of equal slices the layout is cut into
    pub num_split: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutStatus {
    #[default]
    Ok,
    /// Wrong snapshot; the reply carries the current one
    InvalidSnapshot,
    InvalidIndex,
    InvalidNumsplit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLayoutReply {
    pub err: LayoutStatus,
    pub snapshot_id: SnapshotId,
    #[serde(default)]
    pub layout: Vec<EntryId>,
    /// Oldest entry ID still live at the coordinator. Neither this layout
    /// nor any later one references an ID below it.
    #[serde(default)]
    pub oldest_live: EntryId,
}

/// Ask a replica to fetch layout `snapshot_id` from `addr`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyArgs {
    pub addr: String,
    pub snapshot_id: SnapshotId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInfoReply {
    pub name: String,
    pub snapshot_id: SnapshotId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Writer request to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishArgs {
    pub bucket1: u64,
    pub bucket2: u64,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReply {
    /// Assigned entry ID, 0 on failure
    pub id: EntryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Serde adapter for `Vec<u8>` as a `0x`-prefixed hex string
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for fixed-size byte arrays as hex strings
pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_status_wire_names() {
        let json = serde_json::to_string(&LayoutStatus::InvalidNumsplit).unwrap();
        assert_eq!(json, "\"invalid_numsplit\"");
        let json = serde_json::to_string(&LayoutStatus::InvalidSnapshot).unwrap();
        assert_eq!(json, "\"invalid_snapshot\"");
    }

    #[test]
    fn test_write_args_hex() {
        let args = WriteArgs {
            id: 3,
            data: vec![0xde, 0xad],
        };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["data"], "0xdead");

        let parsed: WriteArgs = serde_json::from_str(r#"{"id":3,"data":"dead"}"#).unwrap();
        assert_eq!(parsed, args);
    }

    #[test]
    fn test_ok_reply_omits_err() {
        let json = serde_json::to_string(&WriteReply::ok()).unwrap();
        assert_eq!(json, "{}");
        let reply: NotifyReply = serde_json::from_str("{}").unwrap();
        assert!(reply.err.is_none());
    }

    #[test]
    fn test_stale_reply() {
        let reply = ReadReply::stale(2, 5);
        assert!(reply.stale);
        assert!(reply.err.unwrap().contains("have 2"));
    }

    #[test]
    fn test_seed_rejects_wrong_length() {
        let err = serde_json::from_str::<crate::Seed>("\"0xabcd\"");
        assert!(err.is_err());
    }
}
