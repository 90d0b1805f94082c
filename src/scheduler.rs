//! One sweep over a list of work items.
//!
//! Items are dispatched in fixed-size slices. Each slice gets one credential
//! from the [`CredentialRateLimiter`] and all of its items run concurrently;
//! the next slice is not dispatched until every item of the current one has
//! settled and been accounted for.

use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backoff::execute_with_backoff;
use crate::config::GeneratorConfig;
use crate::error::{GenerationError, Result};
use crate::events::{EventSink, GenerationEvent, NoticeLevel};
use crate::limiter::CredentialRateLimiter;
use crate::prompt::create_prompt;
use crate::settings::Settings;
use crate::state::RunState;
use crate::store::{ResultStore, StagingArea};
use crate::types::{
    Credential, GeneratedFields, GenerationMode, GenerationRequest, Pass, ResultRecord, RunPhase,
    WorkItem, WorkItemStatus,
};
use crate::MetadataGenerator;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every slice was dispatched and accounted.
    Finished,
    /// Stop was requested; remaining slices were left untouched.
    Stopped,
}

/// Collaborators shared by both passes of a run.
pub struct SchedulerContext<'a, G> {
    pub generator: &'a G,
    pub staging: &'a StagingArea,
    pub results: &'a ResultStore,
    pub events: &'a EventSink,
    /// Settings captured at run start.
    pub settings: &'a Settings,
    pub config: &'a GeneratorConfig,
}

pub struct BatchScheduler<'a, G> {
    ctx: SchedulerContext<'a, G>,
    limiter: CredentialRateLimiter,
    pause: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl<'a, G: MetadataGenerator> BatchScheduler<'a, G> {
    pub fn new(
        ctx: SchedulerContext<'a, G>,
        limiter: CredentialRateLimiter,
        pause: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            limiter,
            pause,
            cancel,
        }
    }

    pub fn limiter(&self) -> &CredentialRateLimiter {
        &self.limiter
    }

    /// Run one pass over `items`, updating `state` and the result store as
    /// items settle.
    ///
    /// The pass that `state` is currently in decides how failures are
    /// classified: primary-pass failures are queued for retry, retry-pass
    /// failures become error records.
    pub async fn run_pass(&mut self, state: &mut RunState, items: &[WorkItem]) -> Result<PassOutcome> {
        let pass = state.pass;
        let batch_size = self.ctx.config.effective_batch_size();
        let mode = self.ctx.settings.controls.active_tab;
        let prompt = create_prompt(&self.ctx.settings.controls, mode);

        if batch_size < self.ctx.config.batch_size {
            tracing::warn!(
                requested = self.ctx.config.batch_size,
                batch_size,
                "Batch size exceeds the per-key request limit, clamping"
            );
        }

        tracing::info!(
            pass = ?pass,
            items = items.len(),
            batch_size,
            credentials = self.limiter.len(),
            "Starting pass"
        );

        for (batch_index, chunk) in items.chunks(batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(PassOutcome::Stopped);
            }
            if !self.wait_while_paused(pass).await {
                return Ok(PassOutcome::Stopped);
            }

            let events = self.ctx.events;
            let waiting = &*state;
            let assigned = self
                .limiter
                .assign(chunk.len(), &self.cancel, |wait_secs| {
                    events.emit(GenerationEvent::RateLimited { wait_secs });
                    events.progress(waiting.rate_limited_status(wait_secs));
                })
                .await;
            let key_index = match assigned {
                Ok(index) => index,
                Err(GenerationError::Cancelled) => return Ok(PassOutcome::Stopped),
                Err(e) => return Err(e),
            };
            let credential = self
                .limiter
                .credential(key_index)
                .cloned()
                .ok_or_else(|| GenerationError::Other(format!("no credential at {}", key_index)))?;

            tracing::debug!(
                batch = batch_index,
                size = chunk.len(),
                credential = key_index,
                "Dispatching batch"
            );

            for item in chunk {
                self.set_status(item, WorkItemStatus::Processing, None)?;
            }

            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|item| self.process_item(item, &prompt, mode, &credential)),
            )
            .await;

            if self.cancel.is_cancelled() {
                tracing::info!(
                    batch = batch_index,
                    "Stop requested, discarding results of the in-flight batch"
                );
                for item in chunk {
                    self.set_status(item, WorkItemStatus::Ready, None)?;
                }
                return Ok(PassOutcome::Stopped);
            }

            for (item, outcome) in chunk.iter().zip(outcomes) {
                self.settle(state, item, mode, outcome)?;
            }
        }

        Ok(PassOutcome::Finished)
    }

    async fn process_item(
        &self,
        item: &WorkItem,
        prompt: &str,
        mode: GenerationMode,
        credential: &Credential,
    ) -> Result<GeneratedFields> {
        let payload = item
            .payload
            .clone()
            .ok_or_else(|| GenerationError::MissingPayload(item.filename.clone()))?;
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            payload,
            mode,
            model: self.ctx.settings.model.clone(),
        };

        let events = self.ctx.events;
        execute_with_backoff(
            self.ctx.generator,
            &request,
            credential,
            &self.ctx.settings.controls,
            &self.ctx.config.backoff,
            &self.cancel,
            &item.filename,
            |delay| {
                events.emit(GenerationEvent::Retrying {
                    item_id: item.id.clone(),
                    filename: item.filename.clone(),
                    delay_ms: delay.as_millis() as u64,
                })
            },
        )
        .await
    }

    fn settle(
        &self,
        state: &mut RunState,
        item: &WorkItem,
        mode: GenerationMode,
        outcome: Result<GeneratedFields>,
    ) -> Result<()> {
        let ctx = &self.ctx;
        match (outcome, state.pass) {
            (Ok(fields), _) => {
                ctx.results.push(ResultRecord::success(item, fields))?;
                ctx.staging.remove(&item.id)?;
                state.record_success();
            }
            (Err(e), Pass::Primary) => {
                let message = e.to_string();
                tracing::warn!(item = %item.filename, error = %message, "Generation failed, queued for retry");
                self.set_status(item, WorkItemStatus::Error, Some(message.clone()))?;
                ctx.events.emit(GenerationEvent::ItemQueuedForRetry {
                    item_id: item.id.clone(),
                    error: message,
                });
                ctx.events.notice(
                    NoticeLevel::Warning,
                    format!("Error for {}. It will be retried later.", item.filename),
                );
                state.queue_for_retry(item.clone());
            }
            (Err(e), Pass::Retry) => {
                let message = e.to_string();
                tracing::error!(item = %item.filename, error = %message, "Retry failed, recording error result");
                ctx.results.push(ResultRecord::failed(item, mode, &message))?;
                ctx.staging.remove(&item.id)?;
                ctx.events.emit(GenerationEvent::ItemFailed {
                    item_id: item.id.clone(),
                    error: message.clone(),
                });
                ctx.events.notice(
                    NoticeLevel::Error,
                    format!("Retry failed for {}: {}", item.filename, message),
                );
                state.record_terminal_failure();
            }
        }

        if state.pass == Pass::Primary {
            ctx.events.progress(state.progress());
        }
        Ok(())
    }

    fn set_status(&self, item: &WorkItem, status: WorkItemStatus, error: Option<String>) -> Result<()> {
        self.ctx.staging.set_status(&item.id, status, error)?;
        self.ctx.events.emit(GenerationEvent::ItemStatusChanged {
            item_id: item.id.clone(),
            status,
        });
        Ok(())
    }

    /// Suspend while the pause flag is set. Returns `false` if stop was
    /// requested instead of a resume.
    async fn wait_while_paused(&mut self, pass: Pass) -> bool {
        if !*self.pause.borrow() {
            return true;
        }

        tracing::info!(pass = ?pass, "Paused before next batch");
        self.ctx.events.set_phase(RunPhase::Paused(pass));

        let resumed = tokio::select! {
            r = self.pause.wait_for(|paused| !*paused) => r.is_ok(),
            _ = self.cancel.cancelled() => false,
        };
        if !resumed || self.cancel.is_cancelled() {
            return false;
        }

        tracing::info!(pass = ?pass, "Resumed");
        self.ctx.events.set_phase(RunPhase::Running(pass));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncodedPayload, MetadataFields};
    use std::sync::Mutex;

    /// Fails every call for the listed file names.
    struct Picky {
        reject: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl MetadataGenerator for Picky {
        async fn generate(
            &self,
            request: &GenerationRequest,
            _credential: &Credential,
        ) -> Result<GeneratedFields> {
            let name = request.payload.base64_data.clone();
            self.seen.lock().unwrap().push(name.clone());
            if self.reject.contains(&name.as_str()) {
                return Err(GenerationError::InvalidResponse("bad".into()));
            }
            Ok(GeneratedFields::Metadata(MetadataFields {
                title: name,
                keywords: vec!["k".into()],
                ..Default::default()
            }))
        }
    }

    fn items(names: &[&str]) -> Vec<WorkItem> {
        names
            .iter()
            .map(|n| WorkItem::ready(*n, EncodedPayload::new(*n, "image/jpeg")).with_id(*n))
            .collect()
    }

    fn settings() -> Settings {
        Settings {
            api_keys: vec![Credential::new("key-a")],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_pass_classifies_outcomes() {
        let generator = Picky {
            reject: vec!["b"],
            seen: Mutex::new(Vec::new()),
        };
        let staging = StagingArea::new();
        let work = items(&["a", "b", "c"]);
        for item in &work {
            staging.add(item.clone()).unwrap();
        }
        let results = ResultStore::new();
        let events = EventSink::default();
        let settings = settings();
        let config = GeneratorConfig::builder().with_max_attempts(1).build();
        let limiter = CredentialRateLimiter::new(settings.api_keys.clone(), &config).unwrap();
        let (_pause_tx, pause_rx) = watch::channel(false);

        let mut scheduler = BatchScheduler::new(
            SchedulerContext {
                generator: &generator,
                staging: &staging,
                results: &results,
                events: &events,
                settings: &settings,
                config: &config,
            },
            limiter,
            pause_rx,
            CancellationToken::new(),
        );

        let mut state = RunState::new(work.len());
        let outcome = scheduler.run_pass(&mut state, &work).await.unwrap();

        assert_eq!(outcome, PassOutcome::Finished);
        assert_eq!(state.processed, 3);
        assert_eq!(state.succeeded, 2);
        assert_eq!(state.retry_queue.len(), 1);
        assert_eq!(state.retry_queue[0].id, "b");
        assert_eq!(results.len(), 2);
        // failed item stays staged with an error status, the rest are removed
        assert_eq!(staging.len(), 1);
        assert_eq!(staging.get("b").unwrap().status, WorkItemStatus::Error);
        assert_eq!(scheduler.limiter().request_count(0), 3);
        assert_eq!(
            events.watch_progress().borrow().status,
            "Generated 3/3 | 2 successful"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_pass_records_terminal_failure() {
        let generator = Picky {
            reject: vec!["b"],
            seen: Mutex::new(Vec::new()),
        };
        let staging = StagingArea::new();
        let results = ResultStore::new();
        let events = EventSink::default();
        let settings = settings();
        let config = GeneratorConfig::builder().with_max_attempts(1).build();
        let limiter = CredentialRateLimiter::new(settings.api_keys.clone(), &config).unwrap();
        let (_pause_tx, pause_rx) = watch::channel(false);
        let mut scheduler = BatchScheduler::new(
            SchedulerContext {
                generator: &generator,
                staging: &staging,
                results: &results,
                events: &events,
                settings: &settings,
                config: &config,
            },
            limiter,
            pause_rx,
            CancellationToken::new(),
        );

        let mut state = RunState::new(2);
        for item in items(&["a", "b"]) {
            state.queue_for_retry(item);
        }
        let retry = state.begin_retry_pass();
        scheduler.run_pass(&mut state, &retry).await.unwrap();

        assert_eq!(state.succeeded, 1);
        assert_eq!(state.failed, 1);
        assert!(state.retry_queue.is_empty());
        let records = results.list();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_error());
        assert!(records[1].is_error());
        assert_eq!(records[1].fields.title(), Some("Error"));
        assert_eq!(generator.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_payload_is_queued_without_calling() {
        let generator = Picky {
            reject: vec![],
            seen: Mutex::new(Vec::new()),
        };
        let staging = StagingArea::new();
        let results = ResultStore::new();
        let events = EventSink::default();
        let settings = settings();
        let config = GeneratorConfig::default();
        let limiter = CredentialRateLimiter::new(settings.api_keys.clone(), &config).unwrap();
        let (_pause_tx, pause_rx) = watch::channel(false);
        let mut scheduler = BatchScheduler::new(
            SchedulerContext {
                generator: &generator,
                staging: &staging,
                results: &results,
                events: &events,
                settings: &settings,
                config: &config,
            },
            limiter,
            pause_rx,
            CancellationToken::new(),
        );

        let mut item = WorkItem::new("raw.eps").with_id("raw");
        item.status = WorkItemStatus::Ready;
        let mut state = RunState::new(1);
        scheduler.run_pass(&mut state, &[item]).await.unwrap();

        assert_eq!(state.retry_queue.len(), 1);
        assert!(generator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let generator = Picky {
            reject: vec![],
            seen: Mutex::new(Vec::new()),
        };
        let staging = StagingArea::new();
        let results = ResultStore::new();
        let events = EventSink::default();
        let settings = settings();
        let config = GeneratorConfig::default();
        let limiter = CredentialRateLimiter::new(settings.api_keys.clone(), &config).unwrap();
        let (_pause_tx, pause_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut scheduler = BatchScheduler::new(
            SchedulerContext {
                generator: &generator,
                staging: &staging,
                results: &results,
                events: &events,
                settings: &settings,
                config: &config,
            },
            limiter,
            pause_rx,
            cancel,
        );

        let work = items(&["a", "b"]);
        let mut state = RunState::new(2);
        let outcome = scheduler.run_pass(&mut state, &work).await.unwrap();
        assert_eq!(outcome, PassOutcome::Stopped);
        assert_eq!(state.processed, 0);
        assert!(results.is_empty());
        assert!(generator.seen.lock().unwrap().is_empty());
    }
}
