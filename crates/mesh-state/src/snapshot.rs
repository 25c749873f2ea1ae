//! Read-only views published for the HTTP gateway.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mesh_protocol::{Metric, PeerAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeValidations {
    pub address: PeerAddress,
    pub validations: u64,
}

/// Confirmed cluster counters plus per-node validations, busiest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub all: BTreeMap<Metric, u64>,
    pub nodes: Vec<NodeValidations>,
    pub updated_at: DateTime<Utc>,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            all: Metric::ALL.iter().map(|m| (*m, 0)).collect(),
            nodes: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl StatsSnapshot {
    pub fn new(all: BTreeMap<Metric, u64>, mut nodes: Vec<NodeValidations>) -> Self {
        nodes.sort_by(|a, b| {
            b.validations
                .cmp(&a.validations)
                .then_with(|| a.address.cmp(&b.address))
        });
        Self {
            all,
            nodes,
            updated_at: Utc::now(),
        }
    }
}

/// Alive peer -> the alive peers it last reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkSnapshot {
    pub peers: BTreeMap<PeerAddress, Vec<PeerAddress>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_sorted_descending() {
        let snap = StatsSnapshot::new(
            BTreeMap::new(),
            vec![
                NodeValidations { address: "a:1".into(), validations: 3 },
                NodeValidations { address: "b:1".into(), validations: 10 },
                NodeValidations { address: "c:1".into(), validations: 3 },
            ],
        );
        let order: Vec<&str> = snap.nodes.iter().map(|n| n.address.as_str()).collect();
        assert_eq!(order, vec!["b:1", "a:1", "c:1"]);
    }

    #[test]
    fn test_stats_snapshot_json_shape() {
        let snap = StatsSnapshot::default();
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["all"]["solved"], 0);
        assert_eq!(value["all"]["validations"], 0);
        assert!(value["nodes"].is_array());
    }
}
