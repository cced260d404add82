//! Dependency edge domain model.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::task::TaskNodeStatus;

/// Kind of dependency edge, governing when its target becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Unconditional,
    SuccessOnly,
    CompletionOnly,
    Conditional,
}

/// A pure function of a source task's result, used by `Conditional` edges.
///
/// Never serialized: on persistence round-trip a `Conditional` edge with no
/// supplied predicate degrades to `SuccessOnly`.
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Outcome of the most recent predicate evaluation, recorded on the edge for
/// observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationResult {
    Satisfied,
    NotSatisfied,
    /// The predicate panicked; treated as not-satisfied but recorded distinctly
    /// so operators can tell a false condition from a broken one.
    PredicateError,
}

/// A directed edge from one task to another in a constellation's DAG.
#[derive(Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub edge_id: Uuid,
    pub from_task_id: Uuid,
    pub to_task_id: Uuid,
    pub kind: EdgeKind,
    pub condition_description: Option<String>,
    /// In-memory only; skipped on serialize.
    #[serde(skip)]
    pub condition_predicate: Option<Predicate>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub last_evaluation_result: Option<EvaluationResult>,
    pub last_evaluation_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyEdge")
            .field("edge_id", &self.edge_id)
            .field("from_task_id", &self.from_task_id)
            .field("to_task_id", &self.to_task_id)
            .field("kind", &self.kind)
            .field("has_predicate", &self.condition_predicate.is_some())
            .field("last_evaluation_result", &self.last_evaluation_result)
            .finish()
    }
}

impl DependencyEdge {
    pub fn new(from_task_id: Uuid, to_task_id: Uuid, kind: EdgeKind) -> Self {
        Self {
            edge_id: Uuid::new_v4(),
            from_task_id,
            to_task_id,
            kind,
            condition_description: None,
            condition_predicate: None,
            metadata: Map::new(),
            last_evaluation_result: None,
            last_evaluation_at: None,
        }
    }

    pub fn conditional(
        from_task_id: Uuid,
        to_task_id: Uuid,
        description: impl Into<String>,
        predicate: Predicate,
    ) -> Self {
        Self {
            condition_description: Some(description.into()),
            condition_predicate: Some(predicate),
            ..Self::new(from_task_id, to_task_id, EdgeKind::Conditional)
        }
    }

    /// The effective kind, applying the "Conditional with no predicate
    /// behaves as SuccessOnly" default.
    fn effective_kind(&self) -> EdgeKind {
        if self.kind == EdgeKind::Conditional && self.condition_predicate.is_none() {
            EdgeKind::SuccessOnly
        } else {
            self.kind
        }
    }

    /// Evaluate satisfaction given the terminal status and result of the
    /// source task. Records the evaluation outcome on the edge. Returns
    /// `false` (and does not record) if the source task is not yet terminal.
    pub fn evaluate(&mut self, source_status: TaskNodeStatus, source_result: Option<&Value>) -> bool {
        if !source_status.is_terminal() {
            return false;
        }

        let (satisfied, outcome) = match self.effective_kind() {
            EdgeKind::Unconditional => (true, EvaluationResult::Satisfied),
            EdgeKind::CompletionOnly => (true, EvaluationResult::Satisfied),
            EdgeKind::SuccessOnly => {
                let ok = source_status == TaskNodeStatus::Completed;
                (ok, if ok { EvaluationResult::Satisfied } else { EvaluationResult::NotSatisfied })
            }
            EdgeKind::Conditional => {
                if source_status != TaskNodeStatus::Completed {
                    (false, EvaluationResult::NotSatisfied)
                } else {
                    let predicate = self.condition_predicate.clone().expect("checked above");
                    let value = source_result.cloned().unwrap_or(Value::Null);
                    match catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
                        Ok(true) => (true, EvaluationResult::Satisfied),
                        Ok(false) => (false, EvaluationResult::NotSatisfied),
                        Err(_) => (false, EvaluationResult::PredicateError),
                    }
                }
            }
        };

        self.last_evaluation_result = Some(outcome);
        self.last_evaluation_at = Some(Utc::now());
        satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done() -> TaskNodeStatus {
        TaskNodeStatus::Completed
    }

    #[test]
    fn unconditional_satisfied_by_any_terminal_status() {
        let mut edge = DependencyEdge::new(Uuid::new_v4(), Uuid::new_v4(), EdgeKind::Unconditional);
        assert!(edge.evaluate(TaskNodeStatus::Failed, None));
        assert!(edge.evaluate(done(), None));
    }

    #[test]
    fn success_only_requires_completed() {
        let mut edge = DependencyEdge::new(Uuid::new_v4(), Uuid::new_v4(), EdgeKind::SuccessOnly);
        assert!(!edge.evaluate(TaskNodeStatus::Failed, None));
        assert!(edge.evaluate(done(), None));
    }

    #[test]
    fn conditional_without_predicate_degrades_to_success_only() {
        let mut edge = DependencyEdge::new(Uuid::new_v4(), Uuid::new_v4(), EdgeKind::Conditional);
        assert!(!edge.evaluate(TaskNodeStatus::Failed, None));
        assert!(edge.evaluate(done(), None));
    }

    #[test]
    fn conditional_with_predicate_evaluates_result() {
        let pred: Predicate = Arc::new(|v: &Value| {
            v.get("coverage").and_then(Value::as_f64).unwrap_or(0.0) >= 0.8
        });
        let mut edge = DependencyEdge::conditional(Uuid::new_v4(), Uuid::new_v4(), "coverage >= 0.8", pred);

        let low = serde_json::json!({"coverage": 0.7});
        assert!(!edge.evaluate(done(), Some(&low)));
        assert_eq!(edge.last_evaluation_result, Some(EvaluationResult::NotSatisfied));

        let high = serde_json::json!({"coverage": 0.9});
        assert!(edge.evaluate(done(), Some(&high)));
        assert_eq!(edge.last_evaluation_result, Some(EvaluationResult::Satisfied));
    }

    #[test]
    fn panicking_predicate_is_treated_as_not_satisfied() {
        let pred: Predicate = Arc::new(|_: &Value| panic!("boom"));
        let mut edge = DependencyEdge::conditional(Uuid::new_v4(), Uuid::new_v4(), "bad", pred);
        assert!(!edge.evaluate(done(), Some(&Value::Null)));
        assert_eq!(edge.last_evaluation_result, Some(EvaluationResult::PredicateError));
    }

    #[test]
    fn non_terminal_source_never_satisfies() {
        let mut edge = DependencyEdge::new(Uuid::new_v4(), Uuid::new_v4(), EdgeKind::Unconditional);
        assert!(!edge.evaluate(TaskNodeStatus::Running, None));
        assert!(edge.last_evaluation_result.is_none());
    }
}
