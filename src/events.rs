use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::types::{CompletionSummary, ProgressSnapshot, RunPhase, WorkItemStatus};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Everything a front end can observe about a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GenerationEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, total: usize },

    #[serde(rename_all = "camelCase")]
    ItemStatusChanged {
        item_id: String,
        status: WorkItemStatus,
    },

    #[serde(rename_all = "camelCase")]
    Retrying {
        item_id: String,
        filename: String,
        delay_ms: u64,
    },

    #[serde(rename_all = "camelCase")]
    RateLimited { wait_secs: u64 },

    #[serde(rename_all = "camelCase")]
    ItemQueuedForRetry { item_id: String, error: String },

    #[serde(rename_all = "camelCase")]
    ItemFailed { item_id: String, error: String },

    #[serde(rename_all = "camelCase")]
    RetryPassStarted { count: usize },

    Paused,

    Resumed,

    Progress(ProgressSnapshot),

    Completed(CompletionSummary),

    Stopped,

    #[serde(rename_all = "camelCase")]
    Regenerated { index: usize, filename: String },

    Notice { level: NoticeLevel, message: String },
}

impl GenerationEvent {
    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        GenerationEvent::Notice {
            level,
            message: message.into(),
        }
    }
}

/// Fan-out point for run observations.
///
/// Every event goes to the broadcast channel. The latest progress snapshot
/// and run phase are additionally kept on watch channels, so late
/// subscribers can read the current state without replaying history.
pub struct EventSink {
    events: broadcast::Sender<GenerationEvent>,
    progress: watch::Sender<ProgressSnapshot>,
    phase: watch::Sender<RunPhase>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            events,
            progress,
            phase,
        }
    }

    /// Send an event. Having no subscribers is not an error.
    pub fn emit(&self, event: GenerationEvent) {
        let _ = self.events.send(event);
    }

    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(GenerationEvent::notice(level, message));
    }

    pub fn progress(&self, snapshot: ProgressSnapshot) {
        self.progress.send_replace(snapshot.clone());
        self.emit(GenerationEvent::Progress(snapshot));
    }

    pub fn set_phase(&self, phase: RunPhase) {
        self.phase.send_replace(phase);
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events.subscribe()
    }

    pub fn watch_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    pub fn watch_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pass;

    #[test]
    fn test_sink_without_subscribers() {
        let sink = EventSink::default();
        sink.emit(GenerationEvent::Paused);
        sink.progress(ProgressSnapshot::default());
        assert_eq!(sink.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_sink_progress_and_phase() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();
        let progress = sink.watch_progress();

        let snapshot = ProgressSnapshot {
            percent: 50.0,
            status: "Generated 1/2 | 1 successful".into(),
            current: 1,
            total: 2,
        };
        sink.progress(snapshot.clone());
        sink.set_phase(RunPhase::Running(Pass::Retry));

        assert_eq!(rx.recv().await.unwrap(), GenerationEvent::Progress(snapshot.clone()));
        assert_eq!(*progress.borrow(), snapshot);
        assert_eq!(*sink.watch_phase().borrow(), RunPhase::Running(Pass::Retry));
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = GenerationEvent::RateLimited { wait_secs: 12 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "rateLimited");
        assert_eq!(json["waitSecs"], 12);

        let json = serde_json::to_value(GenerationEvent::notice(NoticeLevel::Warning, "hi")).unwrap();
        assert_eq!(json["type"], "notice");
        assert_eq!(json["level"], "warning");
    }
}
