//! Property-based invariant checks, exercised over randomly generated DAG
//! shapes and device sequences.

use std::collections::HashSet;

use constellation_core::domain::models::edge::{DependencyEdge, EdgeKind};
use constellation_core::domain::models::persistence::{from_blob, to_blob};
use constellation_core::domain::models::{Constellation, TaskNode, TaskNodeStatus};
use proptest::prelude::*;

/// Builds a random DAG over `n` tasks by only ever adding edges from a
/// lower-indexed task to a higher-indexed one, which is acyclic by
/// construction — used as a ground truth to compare `topological_order`
/// against.
fn arbitrary_dag(task_count: usize, edge_choices: Vec<bool>) -> (Constellation, Vec<uuid::Uuid>) {
    let mut c = Constellation::new("prop");
    let ids: Vec<_> = (0..task_count).map(|i| c.add_task(TaskNode::new(format!("t{i}"), "d", 30)).unwrap()).collect();

    let mut choice = edge_choices.into_iter();
    for i in 0..task_count {
        for j in (i + 1)..task_count {
            if choice.next().unwrap_or(false) {
                let _ = c.add_edge(DependencyEdge::new(ids[i], ids[j], EdgeKind::Unconditional));
            }
        }
    }
    (c, ids)
}

proptest! {
    /// Acyclicity: any DAG built by only adding forward edges (i < j) always
    /// has a valid topological order covering every task exactly once.
    #[test]
    fn topological_order_is_total_and_acyclic(task_count in 1usize..8, bits in proptest::collection::vec(any::<bool>(), 0..28)) {
        let (c, ids) = arbitrary_dag(task_count, bits);
        let order = c.topological_order().unwrap();
        prop_assert_eq!(order.len(), ids.len());
        let seen: HashSet<_> = order.iter().copied().collect();
        prop_assert_eq!(seen.len(), order.len());
        for id in &ids {
            prop_assert!(seen.contains(id));
        }

        // Every edge's source appears before its target in the order.
        let position: std::collections::HashMap<_, _> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for edge in c.edges.values() {
            prop_assert!(position[&edge.from_task_id] < position[&edge.to_task_id]);
        }
    }

    /// Ready-set correctness: a task appears in `ready_tasks()` only while its
    /// status is a ready-candidate and every incoming edge is satisfied.
    #[test]
    fn ready_tasks_only_returns_satisfied_candidates(task_count in 2usize..6, bits in proptest::collection::vec(any::<bool>(), 0..10)) {
        let (mut c, _ids) = arbitrary_dag(task_count, bits);
        let ready = c.ready_tasks();
        for id in &ready {
            let task = &c.tasks[id];
            prop_assert!(task.status.is_ready_candidate());
            for edge_id in &task.incoming_deps {
                prop_assert_eq!(c.edges[edge_id].last_evaluation_result, Some(constellation_core::domain::models::edge::EvaluationResult::Satisfied));
            }
        }
    }

    /// Terminal monotonicity: once a task reaches a terminal status it never
    /// leaves it, regardless of further mutation attempts.
    #[test]
    fn terminal_status_is_sticky(fail in any::<bool>()) {
        let mut c = Constellation::new("prop");
        let id = c.add_task(TaskNode::new("a", "d", 30)).unwrap();
        c.mark_started(id).unwrap();
        c.mark_completed(id, !fail, None, None).unwrap();
        let status_after_first = c.tasks[&id].status;
        prop_assert!(status_after_first.is_terminal());

        // Further transition attempts are rejected and the status is unchanged.
        prop_assert!(c.mark_started(id).is_err());
        prop_assert!(c.mark_completed(id, true, None, None).is_err());
        c.mark_cancelled(id).unwrap(); // no-op on an already-terminal task
        prop_assert_eq!(c.tasks[&id].status, status_after_first);
    }

    /// Persistence round-trip: loading a saved blob reproduces the same
    /// tasks, edges, and aggregate state as the constellation it was saved
    /// from (all edges here are `Unconditional`, so the predicate-dropping
    /// behavior of `Conditional` edges never enters into it).
    #[test]
    fn load_of_a_saved_blob_reproduces_the_constellation(task_count in 1usize..8, bits in proptest::collection::vec(any::<bool>(), 0..28)) {
        let (c, _ids) = arbitrary_dag(task_count, bits);
        let restored = from_blob(to_blob(&c)).unwrap();

        prop_assert_eq!(restored.constellation_id, c.constellation_id);
        prop_assert_eq!(restored.state, c.state);
        prop_assert_eq!(restored.tasks.len(), c.tasks.len());
        prop_assert_eq!(restored.edges.len(), c.edges.len());

        for (task_id, task) in &c.tasks {
            let restored_task = &restored.tasks[task_id];
            prop_assert_eq!(restored_task.name.clone(), task.name.clone());
            prop_assert_eq!(restored_task.status, task.status);
        }
        for (edge_id, edge) in &c.edges {
            let restored_edge = &restored.edges[edge_id];
            prop_assert_eq!(restored_edge.from_task_id, edge.from_task_id);
            prop_assert_eq!(restored_edge.to_task_id, edge.to_task_id);
            prop_assert_eq!(restored_edge.kind, edge.kind);
        }
    }
}

#[test]
fn pending_task_is_never_a_ready_candidate_once_running() {
    let mut c = Constellation::new("c");
    let id = c.add_task(TaskNode::new("a", "d", 30)).unwrap();
    assert!(TaskNodeStatus::Pending.is_ready_candidate());
    c.mark_started(id).unwrap();
    assert!(!c.ready_tasks().contains(&id));
}
