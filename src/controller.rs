//! Run lifecycle: start, pause/resume, stop, regenerate.
//!
//! A run is `idle → running(primary) → running(retry)? → completed`, with
//! `stopped` reachable from any running state. The controller owns the
//! staging area, the result store and the event sink; front ends hold it in
//! an `Arc` and drive it from as many tasks as they like.

use std::sync::Mutex;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::backoff::execute_with_backoff;
use crate::config::GeneratorConfig;
use crate::error::{GenerationError, Result};
use crate::events::{EventSink, GenerationEvent, NoticeLevel};
use crate::limiter::CredentialRateLimiter;
use crate::prompt::create_prompt;
use crate::scheduler::{BatchScheduler, PassOutcome, SchedulerContext};
use crate::settings::Settings;
use crate::state::RunState;
use crate::store::{ResultStore, StagingArea};
use crate::types::{
    GenerationRequest, Pass, ProgressSnapshot, ResultRecord, RunOutcome, RunPhase, WorkItem,
    WorkItemStatus,
};
use crate::MetadataGenerator;

pub struct GenerationController<G> {
    generator: G,
    config: GeneratorConfig,
    settings: Mutex<Settings>,
    staging: StagingArea,
    results: ResultStore,
    events: EventSink,
    pause: watch::Sender<bool>,
    /// Stop token of the active run, if any.
    run_token: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl<G: MetadataGenerator> GenerationController<G> {
    pub fn new(generator: G, config: GeneratorConfig, settings: Settings) -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            generator,
            config,
            settings: Mutex::new(settings),
            staging: StagingArea::new(),
            results: ResultStore::new(),
            events: EventSink::default(),
            pause,
            run_token: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    // -- Accessors --

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn results(&self) -> Vec<ResultRecord> {
        self.results.list()
    }

    pub fn result_store(&self) -> &ResultStore {
        &self.results
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events.subscribe()
    }

    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.events.watch_progress()
    }

    pub fn phase(&self) -> watch::Receiver<RunPhase> {
        self.events.watch_phase()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Token cancelled by [`GenerationController::shutdown`]. Every run
    /// token is a child of it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.settings
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Replace the settings used by the next run or regeneration. A run
    /// already in progress keeps the snapshot it started with.
    pub fn update_settings(&self, settings: Settings) {
        if let Ok(mut current) = self.settings.lock() {
            *current = settings;
        }
    }

    // -- Run lifecycle --

    /// Run both passes over every ready item and wait for the run to end.
    ///
    /// Fails without leaving `Idle` when no credential is configured or
    /// nothing is ready; the reason is also published as a notice.
    pub async fn start(&self) -> Result<RunOutcome> {
        if self.run_active() {
            return Err(already_running());
        }

        let settings = self.settings();
        if settings.api_keys.is_empty() {
            self.events.notice(
                NoticeLevel::Error,
                "API Key Missing. Please add an API key in the settings.",
            );
            return Err(GenerationError::MissingCredential);
        }

        let items = self.staging.ready_items();
        if items.is_empty() {
            let message = if self.staging.is_empty() {
                "No files uploaded to generate."
            } else {
                "Files are not ready for processing."
            };
            self.events.notice(NoticeLevel::Info, message);
            return Err(GenerationError::NothingToProcess(message.to_string()));
        }

        let config = self.run_config(&settings);
        let limiter = CredentialRateLimiter::new(settings.api_keys.clone(), &config)?;

        let cancel = self.shutdown.child_token();
        {
            let mut slot = self
                .run_token
                .lock()
                .map_err(|e| GenerationError::Other(format!("run lock poisoned: {}", e)))?;
            if slot.is_some() {
                return Err(already_running());
            }
            *slot = Some(cancel.clone());
        }
        self.pause.send_replace(false);

        let mut state = RunState::new(items.len());
        tracing::info!(
            run_id = %state.run_id,
            items = state.total,
            credentials = settings.api_keys.len(),
            model = %settings.model,
            mode = settings.controls.active_tab.as_str(),
            "Generation run started"
        );
        self.events.set_phase(RunPhase::Running(Pass::Primary));
        self.events.emit(GenerationEvent::RunStarted {
            run_id: state.run_id.clone(),
            total: state.total,
        });
        self.events.progress(state.progress());

        let result = self
            .run_passes(&settings, &config, limiter, &cancel, &mut state, &items)
            .await;

        if let Ok(mut slot) = self.run_token.lock() {
            *slot = None;
        }

        match result {
            Ok(PassOutcome::Finished) if !cancel.is_cancelled() => {
                let summary = state.summary();
                tracing::info!(
                    run_id = %summary.run_id,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    total = summary.total,
                    duration_ms = summary.duration_ms,
                    "Generation run completed"
                );
                self.events.set_phase(RunPhase::Completed);
                self.events.progress(state.completed_status());
                self.events.emit(GenerationEvent::Completed(summary.clone()));
                self.events.notice(
                    NoticeLevel::Success,
                    format!(
                        "Complete. {} of {} successful.",
                        summary.succeeded, summary.total
                    ),
                );
                Ok(RunOutcome::Completed(summary))
            }
            Ok(_) => {
                let released = self.release_unfinished(&items);
                tracing::info!(
                    run_id = %state.run_id,
                    succeeded = state.succeeded,
                    released,
                    "Generation run stopped"
                );
                self.events.set_phase(RunPhase::Stopped);
                self.events.progress(state.stopped_status());
                self.events.emit(GenerationEvent::Stopped);
                self.events.notice(NoticeLevel::Info, "Generation stopped.");
                Ok(RunOutcome::Stopped {
                    succeeded: state.succeeded,
                    total: state.total,
                })
            }
            Err(e) => {
                tracing::error!(run_id = %state.run_id, error = %e, "Generation run failed");
                self.events.set_phase(RunPhase::Stopped);
                self.events.progress(state.with_status(e.to_string()));
                self.events.notice(NoticeLevel::Error, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_passes(
        &self,
        settings: &Settings,
        config: &GeneratorConfig,
        limiter: CredentialRateLimiter,
        cancel: &CancellationToken,
        state: &mut RunState,
        items: &[WorkItem],
    ) -> Result<PassOutcome> {
        let mut scheduler = BatchScheduler::new(
            SchedulerContext {
                generator: &self.generator,
                staging: &self.staging,
                results: &self.results,
                events: &self.events,
                settings,
                config,
            },
            limiter,
            self.pause.subscribe(),
            cancel.clone(),
        );

        let outcome = scheduler.run_pass(state, items).await?;
        if outcome == PassOutcome::Stopped || state.retry_queue.is_empty() {
            return Ok(outcome);
        }

        let count = state.retry_queue.len();
        tracing::info!(count, "Starting retry pass after settle delay");
        self.events.progress(state.retrying_status());
        self.events
            .emit(GenerationEvent::RetryPassStarted { count });

        tokio::select! {
            _ = cancel.cancelled() => return Ok(PassOutcome::Stopped),
            _ = tokio::time::sleep(config.retry_settle_delay) => {}
        }

        let retry_items = state.begin_retry_pass();
        let phase = if self.is_paused() {
            RunPhase::Paused(Pass::Retry)
        } else {
            RunPhase::Running(Pass::Retry)
        };
        self.events.set_phase(phase);
        scheduler.run_pass(state, &retry_items).await
    }

    /// Scheduling config for a run: the user's batch size, when set,
    /// replaces the configured one.
    fn run_config(&self, settings: &Settings) -> GeneratorConfig {
        let mut config = self.config.clone();
        if settings.controls.batch_size > 0 {
            config.batch_size = settings.controls.batch_size;
        }
        config
    }

    fn run_active(&self) -> bool {
        self.run_token
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Return items this run parked with an error status (queued for retry
    /// but never settled) to `Ready`, so a later run picks them up.
    fn release_unfinished(&self, items: &[WorkItem]) -> usize {
        let mut released = 0;
        for item in items {
            let parked = self
                .staging
                .get(&item.id)
                .is_some_and(|staged| staged.status == WorkItemStatus::Error);
            if parked
                && self
                    .staging
                    .set_status(&item.id, WorkItemStatus::Ready, None)
                    .is_ok()
            {
                self.events.emit(GenerationEvent::ItemStatusChanged {
                    item_id: item.id.clone(),
                    status: WorkItemStatus::Ready,
                });
                released += 1;
            }
        }
        released
    }

    /// Suspend dispatch of new batches. Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        let changed = self.pause.send_if_modified(|paused| !std::mem::replace(paused, true));
        if changed {
            tracing::info!("Pause requested");
            self.events.emit(GenerationEvent::Paused);
            self.events.notice(NoticeLevel::Info, "Generation paused.");
        }
        changed
    }

    /// Let dispatch continue. Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let changed = self.pause.send_if_modified(|paused| std::mem::replace(paused, false));
        if changed {
            tracing::info!("Resume requested");
            self.events.emit(GenerationEvent::Resumed);
            self.events.notice(NoticeLevel::Info, "Generation resumed.");
        }
        changed
    }

    /// Flip the pause flag; returns the new state.
    pub fn toggle_pause(&self) -> bool {
        if self.is_paused() {
            self.resume();
            false
        } else {
            self.pause();
            true
        }
    }

    /// Hard-stop the active run. In-flight requests settle but no further
    /// batch is dispatched. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let token = self.run_token.lock().ok().and_then(|slot| slot.clone());
        match token {
            Some(token) if !token.is_cancelled() => {
                tracing::info!("Stop requested");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Stop the active run and cancel any regeneration in flight.
    pub fn shutdown(&self) {
        self.stop();
        self.shutdown.cancel();
    }

    /// Stop any run, drop every staged file and result, and reset progress.
    pub fn clear_all(&self) {
        self.stop();
        self.staging.clear();
        self.results.clear();
        self.pause.send_replace(false);
        if !self.events.phase().is_active() {
            self.events.set_phase(RunPhase::Idle);
        }
        self.events.progress(ProgressSnapshot::default());
        self.events
            .notice(NoticeLevel::Info, "All files and results have been cleared.");
    }

    /// Delete result `index`.
    pub fn delete_result(&self, index: usize) -> Result<ResultRecord> {
        self.results.remove(index)
    }

    /// Re-run generation for result `index` with the first credential,
    /// outside batching and rate limiting.
    ///
    /// On success the record's fields are replaced in place. On failure the
    /// record is left unchanged and the error is returned.
    pub async fn regenerate(&self, index: usize) -> Result<ResultRecord> {
        let settings = self.settings();
        let Some(credential) = settings.api_keys.first().cloned() else {
            self.events.notice(NoticeLevel::Error, "API Key Missing.");
            return Err(GenerationError::MissingCredential);
        };

        let record = self.results.get(index).ok_or_else(|| {
            self.events
                .notice(NoticeLevel::Error, "Cannot regenerate. Missing data.");
            GenerationError::NotFound(format!("result #{}", index))
        })?;
        let Some(payload) = record.payload.clone() else {
            self.events
                .notice(NoticeLevel::Error, "Cannot regenerate. Missing data.");
            return Err(GenerationError::MissingPayload(record.filename.clone()));
        };

        let mode = settings.controls.active_tab;
        let request = GenerationRequest {
            prompt: create_prompt(&settings.controls, mode),
            payload,
            mode,
            model: settings.model.clone(),
        };

        tracing::info!(item = %record.filename, "Regenerating result");
        let events = &self.events;
        let outcome = execute_with_backoff(
            &self.generator,
            &request,
            &credential,
            &settings.controls,
            &self.config.backoff,
            &self.shutdown,
            &record.filename,
            |_| events.notice(NoticeLevel::Warning, "Regeneration failed, retrying..."),
        )
        .await;

        match outcome {
            Ok(fields) => {
                self.results.replace_fields(&record.id, fields)?;
                self.events.emit(GenerationEvent::Regenerated {
                    index,
                    filename: record.filename.clone(),
                });
                self.events.notice(
                    NoticeLevel::Success,
                    format!("{} regenerated.", record.filename),
                );
                self.results
                    .list()
                    .into_iter()
                    .find(|r| r.id == record.id)
                    .ok_or_else(|| GenerationError::NotFound(record.id.clone()))
            }
            Err(e) => {
                tracing::error!(item = %record.filename, error = %e, "Regeneration failed");
                self.events
                    .notice(NoticeLevel::Error, format!("Regeneration failed: {}", e));
                Err(e)
            }
        }
    }
}

fn already_running() -> GenerationError {
    GenerationError::Other("A generation run is already in progress.".to_string())
}
