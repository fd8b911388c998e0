//! `CLUSTER INFO` parsing and local-node classification.
//!
//! The response is a line-oriented `key:value` stream (CRLF
//! separators, `#` comment lines). Only the documented subset of keys
//! below is read; unknown keys pass through untouched so that newer
//! Redis releases do not break the parser.
//!
//! A node fresh out of startup — empty, aware only of itself — always
//! reports the exact fingerprint `{state=fail, known_nodes=1, every
//! slot and stat counter 0}`. That full-struct comparison is the one
//! and only classifier of [`LocalNodeState::Fresh`]; any other
//! well-formed response means the node participates in a cluster.

use crate::core::error::{TetherError, TetherResult};

/// Parsed `CLUSTER INFO` counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub state: String,
    pub slots_assigned: i64,
    pub slots_ok: i64,
    pub slots_pfail: i64,
    pub slots_fail: i64,
    pub known_nodes: i64,
    pub size: i64,
    pub current_epoch: i64,
    pub my_epoch: i64,
    pub messages_sent: i64,
    pub messages_received: i64,
}

impl ClusterInfo {
    /// The self-report of a node that has never met a cluster.
    pub fn fresh_fingerprint() -> Self {
        Self {
            state: "fail".to_string(),
            known_nodes: 1,
            ..Self::default()
        }
    }

    /// Whether this report matches the fresh fingerprint exactly.
    pub fn is_fresh(&self) -> bool {
        *self == Self::fresh_fingerprint()
    }
}

/// What the sidecar knows about its own node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalNodeState {
    /// Newly started, empty, knows only itself.
    Fresh,
    /// Participates in a multi-node cluster.
    InCluster,
    /// Could not be reached; re-observed on the next tick.
    Unknown,
}

/// Parse a raw `CLUSTER INFO` response.
pub fn parse_cluster_info(raw: &str) -> TetherResult<ClusterInfo> {
    let mut info = ClusterInfo::default();
    for line in raw.split("\r\n").flat_map(|chunk| chunk.split('\n')) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            TetherError::local_node(format!(
                "cannot parse 'cluster info', expected '<key>:<value>', got {line:?}"
            ))
        })?;

        let target = match key {
            "cluster_state" => {
                info.state = value.to_string();
                continue;
            }
            "cluster_slots_assigned" => &mut info.slots_assigned,
            "cluster_slots_ok" => &mut info.slots_ok,
            "cluster_slots_pfail" => &mut info.slots_pfail,
            "cluster_slots_fail" => &mut info.slots_fail,
            "cluster_known_nodes" => &mut info.known_nodes,
            "cluster_size" => &mut info.size,
            "cluster_current_epoch" => &mut info.current_epoch,
            "cluster_my_epoch" => &mut info.my_epoch,
            "cluster_stats_messages_sent" => &mut info.messages_sent,
            "cluster_stats_messages_received" => &mut info.messages_received,
            _ => continue,
        };
        *target = value.parse::<i64>().map_err(|err| {
            TetherError::local_node(format!("cannot parse {key:?} value {value:?} as int: {err}"))
        })?;
    }
    Ok(info)
}
