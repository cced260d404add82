//! FIFO of pending task submissions for a busy device.
//!
//! Each device gets its own `VecDeque`; `DashMap` gives per-device exclusive
//! access without a queue-wide lock, so submissions stay serialized per
//! device without serializing across devices.

use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;

use super::types::{FailureReason, SubmissionOutcome, TaskRequest};

struct QueuedSubmission {
    request: TaskRequest,
    deadline: Instant,
    responder: oneshot::Sender<SubmissionOutcome>,
}

#[derive(Default)]
pub struct DeviceTaskQueue {
    queues: DashMap<String, std::collections::VecDeque<QueuedSubmission>>,
}

impl DeviceTaskQueue {
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    /// Enqueue a task request for later submission. `responder` is the
    /// completion handle already handed to the original caller; it is
    /// resolved whenever this entry is eventually dispatched and terminates,
    /// or when the queue is drained.
    pub fn enqueue(
        &self,
        device_id: &str,
        request: TaskRequest,
        deadline: Instant,
        responder: oneshot::Sender<SubmissionOutcome>,
    ) {
        self.queues
            .entry(device_id.to_string())
            .or_default()
            .push_back(QueuedSubmission { request, deadline, responder });
    }

    /// Pop the next queued submission for `device_id`, if any.
    #[allow(clippy::type_complexity)]
    pub fn dequeue_one(
        &self,
        device_id: &str,
    ) -> Option<(TaskRequest, Instant, oneshot::Sender<SubmissionOutcome>)> {
        let mut queue = self.queues.get_mut(device_id)?;
        queue
            .pop_front()
            .map(|item| (item.request, item.deadline, item.responder))
    }

    /// Resolve every queued submission for `device_id` as `Failed(reason)`
    /// and empty the queue.
    pub fn drain(&self, device_id: &str, reason: FailureReason) {
        if let Some(mut queue) = self.queues.get_mut(device_id) {
            for item in queue.drain(..) {
                let _ = item.responder.send(SubmissionOutcome::Failed(reason.clone()));
            }
        }
    }

    pub fn len(&self, device_id: &str) -> usize {
        self.queues.get(device_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, device_id: &str) -> bool {
        self.len(device_id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> TaskRequest {
        TaskRequest {
            task_id: uuid::Uuid::new_v4(),
            description: "d".into(),
            data: Default::default(),
            timeout_s: 30,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = DeviceTaskQueue::new();
        let deadline = Instant::now() + Duration::from_secs(30);
        let r1 = request();
        let r2 = request();
        let id1 = r1.task_id;
        let id2 = r2.task_id;
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        q.enqueue("w", r1, deadline, tx1);
        q.enqueue("w", r2, deadline, tx2);

        let (first, ..) = q.dequeue_one("w").unwrap();
        assert_eq!(first.task_id, id1);
        let (second, ..) = q.dequeue_one("w").unwrap();
        assert_eq!(second.task_id, id2);
        assert!(q.dequeue_one("w").is_none());
    }

    #[tokio::test]
    async fn drain_resolves_all_pending_as_failed() {
        let q = DeviceTaskQueue::new();
        let deadline = Instant::now() + Duration::from_secs(30);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        q.enqueue("w", request(), deadline, tx1);
        q.enqueue("w", request(), deadline, tx2);

        q.drain("w", FailureReason::Disconnected);

        assert_eq!(rx1.await.unwrap(), SubmissionOutcome::Failed(FailureReason::Disconnected));
        assert_eq!(rx2.await.unwrap(), SubmissionOutcome::Failed(FailureReason::Disconnected));
        assert!(q.is_empty("w"));
    }

    #[test]
    fn len_reports_current_depth() {
        let q = DeviceTaskQueue::new();
        assert_eq!(q.len("w"), 0);
        let (tx, _rx) = oneshot::channel();
        q.enqueue("w", request(), Instant::now() + Duration::from_secs(1), tx);
        assert_eq!(q.len("w"), 1);
    }
}
