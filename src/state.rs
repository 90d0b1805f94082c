//! Per-run aggregate state and its transitions.
//!
//! [`RunState`] is owned by the controller for the duration of one run and
//! only mutated through the methods below, from the scheduler's own control
//! flow.

use std::time::Instant;

use crate::types::{CompletionSummary, Pass, ProgressSnapshot, WorkItem};

#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    /// Ready items captured at run start.
    pub total: usize,
    /// Items settled during the primary pass.
    pub processed: usize,
    pub succeeded: usize,
    /// Items that failed the retry pass.
    pub failed: usize,
    pub pass: Pass,
    /// Items that failed the primary pass, in failure order.
    pub retry_queue: Vec<WorkItem>,
    /// Size of the retry queue when the retry pass began.
    pub retried: usize,
    started_at: Instant,
}

impl RunState {
    pub fn new(total: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            pass: Pass::Primary,
            retry_queue: Vec::new(),
            retried: 0,
            started_at: Instant::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
        self.settle();
    }

    /// Primary-pass failure: park the item for the retry pass.
    pub fn queue_for_retry(&mut self, item: WorkItem) {
        self.retry_queue.push(item);
        self.settle();
    }

    /// Retry-pass failure: the item is done for good.
    pub fn record_terminal_failure(&mut self) {
        self.failed += 1;
        self.settle();
    }

    fn settle(&mut self) {
        if self.pass == Pass::Primary {
            self.processed += 1;
        }
    }

    /// Switch to the retry pass, handing over the queued items.
    pub fn begin_retry_pass(&mut self) -> Vec<WorkItem> {
        self.pass = Pass::Retry;
        let items = std::mem::take(&mut self.retry_queue);
        self.retried = items.len();
        items
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }

    fn snapshot(&self, percent: f64, current: usize, status: String) -> ProgressSnapshot {
        ProgressSnapshot {
            percent,
            status,
            current,
            total: self.total,
        }
    }

    /// Per-item primary pass progress.
    pub fn progress(&self) -> ProgressSnapshot {
        self.snapshot(
            self.percent(),
            self.processed,
            format!(
                "Generated {}/{} | {} successful",
                self.processed, self.total, self.succeeded
            ),
        )
    }

    /// Current counters with a free-form status line.
    pub fn with_status(&self, status: impl Into<String>) -> ProgressSnapshot {
        self.snapshot(self.percent(), self.processed, status.into())
    }

    pub fn retrying_status(&self) -> ProgressSnapshot {
        self.with_status(format!("Retrying {} failed files...", self.retry_queue.len()))
    }

    pub fn rate_limited_status(&self, wait_secs: u64) -> ProgressSnapshot {
        self.with_status(format!("All keys rate-limited. Waiting {}s...", wait_secs))
    }

    pub fn completed_status(&self) -> ProgressSnapshot {
        self.snapshot(
            100.0,
            self.total,
            format!("Complete. {} of {} successful.", self.succeeded, self.total),
        )
    }

    pub fn stopped_status(&self) -> ProgressSnapshot {
        self.with_status("Stopped.")
    }

    pub fn summary(&self) -> CompletionSummary {
        CompletionSummary {
            run_id: self.run_id.clone(),
            succeeded: self.succeeded,
            failed: self.failed,
            total: self.total,
            retried: self.retried,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_pass_counts() {
        let mut state = RunState::new(4);
        state.record_success();
        state.queue_for_retry(WorkItem::new("b.jpg"));
        state.record_success();
        assert_eq!(state.processed, 3);
        assert_eq!(state.succeeded, 2);
        assert_eq!(state.retry_queue.len(), 1);
        assert_eq!(state.progress().status, "Generated 3/4 | 2 successful");
        assert_eq!(state.progress().percent, 75.0);
    }

    #[test]
    fn test_retry_pass_does_not_move_progress() {
        let mut state = RunState::new(2);
        state.queue_for_retry(WorkItem::new("a.jpg"));
        state.queue_for_retry(WorkItem::new("b.jpg"));
        assert_eq!(state.retrying_status().status, "Retrying 2 failed files...");

        let items = state.begin_retry_pass();
        assert_eq!(items.len(), 2);
        assert!(state.retry_queue.is_empty());
        assert_eq!(state.pass, Pass::Retry);

        state.record_success();
        state.record_terminal_failure();
        assert_eq!(state.processed, 2);
        assert_eq!(state.succeeded, 1);
        assert_eq!(state.failed, 1);

        let summary = state.summary();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.retried, 2);
        assert_eq!(
            state.completed_status().status,
            "Complete. 1 of 2 successful."
        );
    }

    #[test]
    fn test_empty_run_percent() {
        let state = RunState::new(0);
        assert_eq!(state.percent(), 0.0);
        assert_eq!(state.rate_limited_status(7).status, "All keys rate-limited. Waiting 7s...");
    }
}
