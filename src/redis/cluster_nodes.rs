//! `CLUSTER NODES` parsing and deterministic primary selection.
//!
//! The response is a space-separated table, one node per row:
//!
//! ```text
//! <id> <addr@cport> <flags> <primary-id> <ping> <pong> <epoch> <link-state> [<slots>...]
//! ```
//!
//! Three normalisations are contracts, not incidentals:
//!
//! - Replica rows carry no slot columns, so every row is truncated
//!   after its `connected`/`disconnected` column before splitting,
//!   giving all rows the same field count.
//! - `myself,<role>` folds to `<role>`.
//! - `<role>,fail` folds to `<role>`.

use crate::core::error::{TetherError, TetherResult};
use crate::core::node::NodeAddress;
use std::collections::BTreeMap;

/// Role of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

/// One row of `CLUSTER NODES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub addr: NodeAddress,
    pub role: Role,
    /// Id of the primary this node replicates, for replica rows.
    pub replica_of: Option<String>,
    pub connected: bool,
}

/// Parse a raw `CLUSTER NODES` response into all rows, unfiltered.
pub fn parse_cluster_nodes(raw: &str) -> TetherResult<Vec<ClusterNode>> {
    let mut nodes = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        nodes.push(parse_row(line)?);
    }
    Ok(nodes)
}

fn parse_row(line: &str) -> TetherResult<ClusterNode> {
    // Truncate after the link-state column; replica rows have no slot
    // columns and this makes every row uniform. "disconnected" ends in
    // "connected", so finding the first occurrence keeps it whole.
    let truncated = match line.find("connected") {
        Some(pos) => &line[..pos + "connected".len()],
        None => line,
    };
    let normalised = truncated
        .replace("myself,master", "master")
        .replace("myself,slave", "slave")
        .replace("master,fail", "master")
        .replace("slave,fail", "slave");

    let fields: Vec<&str> = normalised.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(TetherError::local_node(format!(
            "cannot parse 'cluster nodes' row, expected 8 columns, got {}: {line:?}",
            fields.len()
        )));
    }

    let role = match fields[2] {
        "master" => Role::Primary,
        "slave" => Role::Replica,
        other => {
            return Err(TetherError::local_node(format!(
                "unrecognised role {other:?} in 'cluster nodes' row: {line:?}"
            )))
        }
    };

    // The address column may carry a `@cluster-port` suffix.
    let addr_text = fields[1].split('@').next().unwrap_or(fields[1]);
    let addr: NodeAddress = addr_text
        .parse()
        .map_err(|err| TetherError::local_node(format!("bad node address: {err}")))?;

    Ok(ClusterNode {
        id: fields[0].to_string(),
        addr,
        role,
        replica_of: match fields[3] {
            "-" => None,
            id => Some(id.to_string()),
        },
        connected: fields[7] == "connected",
    })
}

/// Connected primaries.
pub fn primaries(nodes: &[ClusterNode]) -> Vec<&ClusterNode> {
    nodes
        .iter()
        .filter(|node| node.connected && node.role == Role::Primary)
        .collect()
}

/// Connected replicas.
pub fn replicas(nodes: &[ClusterNode]) -> Vec<&ClusterNode> {
    nodes
        .iter()
        .filter(|node| node.connected && node.role == Role::Replica)
        .collect()
}

/// The connected primary with the fewest connected replicas.
///
/// Ties break by lexicographic node id so that concurrent observers
/// of the same topology agree on the pick. `None` when the table has
/// no connected primary.
pub fn primary_with_fewest_replicas(nodes: &[ClusterNode]) -> Option<(NodeAddress, String)> {
    let mut replica_counts: BTreeMap<&str, usize> = primaries(nodes)
        .into_iter()
        .map(|primary| (primary.id.as_str(), 0))
        .collect();
    for replica in replicas(nodes) {
        if let Some(primary_id) = &replica.replica_of {
            if let Some(count) = replica_counts.get_mut(primary_id.as_str()) {
                *count += 1;
            }
        }
    }

    // BTreeMap iteration is id-ordered, so min_by_key on the count
    // alone lands on the lexicographically smallest id among ties.
    let (chosen_id, _) = replica_counts.into_iter().min_by_key(|(_, count)| *count)?;
    nodes
        .iter()
        .find(|node| node.id == chosen_id)
        .map(|node| (node.addr.clone(), node.id.clone()))
}
