//! In-memory JSON blob persistence for a constellation (C9 Save/Load).
//!
//! Round-trips a `Constellation` through `serde_json::Value` using its own
//! `Serialize`/`Deserialize` impls; no separate wire format. A `Conditional`
//! edge's predicate closure is never part of the blob (`DependencyEdge`
//! skips `condition_predicate` on serialize), so a loaded conditional edge
//! degrades to `SuccessOnly` exactly as any other predicate-less conditional
//! edge does.

use serde_json::Value;

use super::constellation::Constellation;

pub fn to_blob(constellation: &Constellation) -> Value {
    serde_json::to_value(constellation).expect("Constellation has no non-serializable fields")
}

pub fn from_blob(blob: Value) -> Result<Constellation, String> {
    serde_json::from_value(blob).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::edge::{DependencyEdge, EdgeKind};
    use crate::domain::models::task::TaskNode;

    #[test]
    fn round_trip_preserves_tasks_and_edges() {
        let mut c = Constellation::new("roundtrip");
        let a = c.add_task(TaskNode::new("a", "d", 30)).unwrap();
        let b = c.add_task(TaskNode::new("b", "d", 30)).unwrap();
        c.add_edge(DependencyEdge::new(a, b, EdgeKind::SuccessOnly)).unwrap();

        let restored = from_blob(to_blob(&c)).unwrap();
        assert_eq!(restored.constellation_id, c.constellation_id);
        assert_eq!(restored.tasks.len(), c.tasks.len());
        assert_eq!(restored.edges.len(), c.edges.len());
        assert_eq!(restored.state, c.state);
    }

    #[test]
    fn conditional_edge_loses_its_predicate_on_round_trip() {
        let mut c = Constellation::new("roundtrip");
        let a = c.add_task(TaskNode::new("a", "d", 30)).unwrap();
        let b = c.add_task(TaskNode::new("b", "d", 30)).unwrap();
        let predicate: super::super::edge::Predicate = std::sync::Arc::new(|_| true);
        c.add_edge(DependencyEdge::conditional(a, b, "always", predicate)).unwrap();

        let restored = from_blob(to_blob(&c)).unwrap();
        let edge = restored.edges.values().next().unwrap();
        assert_eq!(edge.kind, EdgeKind::Conditional);
        assert!(edge.condition_predicate.is_none());
    }

    #[test]
    fn malformed_blob_is_rejected() {
        assert!(from_blob(serde_json::json!({"not": "a constellation"})).is_err());
    }
}
