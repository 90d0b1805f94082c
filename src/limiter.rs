//! Credential-aware request budgeting.
//!
//! Every credential gets `requests_per_minute` requests per rate window. All
//! credentials share one window start: when more than a full window has
//! elapsed since it, every counter resets together. Capacity is reserved at
//! assignment time, before any request is sent, so batches still in flight
//! count against the budget.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GeneratorConfig;
use crate::error::{GenerationError, Result};
use crate::types::Credential;

#[derive(Debug, Clone)]
struct CredentialSlot {
    credential: Credential,
    request_count: usize,
}

/// Assigns credentials to batches under a shared per-minute window.
#[derive(Debug)]
pub struct CredentialRateLimiter {
    slots: Vec<CredentialSlot>,
    cursor: usize,
    window_start: Instant,
    limit: usize,
    window: Duration,
    wait_margin: Duration,
    status_tick: Duration,
}

impl CredentialRateLimiter {
    /// Create a limiter whose window starts now.
    ///
    /// Fails with [`GenerationError::MissingCredential`] when `credentials`
    /// is empty, since no batch could ever be assigned.
    pub fn new(credentials: Vec<Credential>, config: &GeneratorConfig) -> Result<Self> {
        if credentials.is_empty() {
            return Err(GenerationError::MissingCredential);
        }
        config.validate()?;
        Ok(Self {
            slots: credentials
                .into_iter()
                .map(|credential| CredentialSlot {
                    credential,
                    request_count: 0,
                })
                .collect(),
            cursor: 0,
            window_start: Instant::now(),
            limit: config.requests_per_minute,
            window: config.rate_window,
            wait_margin: config.wait_margin,
            status_tick: config.status_tick,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn credential(&self, index: usize) -> Option<&Credential> {
        self.slots.get(index).map(|s| &s.credential)
    }

    /// Requests reserved against credential `index` in the current window.
    pub fn request_count(&self, index: usize) -> usize {
        self.slots.get(index).map(|s| s.request_count).unwrap_or(0)
    }

    /// Time left until a blocked caller re-scans: window end plus margin.
    pub fn remaining_wait(&self) -> Duration {
        let deadline = self.window_start + self.window + self.wait_margin;
        deadline.saturating_duration_since(Instant::now())
    }

    fn roll_window(&mut self, now: Instant) {
        if now.duration_since(self.window_start) > self.window {
            self.window_start = now;
            for slot in &mut self.slots {
                slot.request_count = 0;
            }
            tracing::debug!("Rate window rolled over, request counts reset");
        }
    }

    /// Reserve `batch_size` requests on the next credential with room,
    /// scanning round-robin from the cursor. Never suspends.
    pub fn try_assign(&mut self, batch_size: usize) -> Option<usize> {
        self.roll_window(Instant::now());

        let n = self.slots.len();
        for offset in 0..n {
            let index = (self.cursor + offset) % n;
            let slot = &mut self.slots[index];
            if slot.request_count + batch_size <= self.limit {
                slot.request_count += batch_size;
                self.cursor = (index + 1) % n;
                return Some(index);
            }
        }
        None
    }

    /// Reserve capacity for a batch, waiting for the window to roll over if
    /// every credential is exhausted.
    ///
    /// While waiting, `on_wait` receives the remaining whole seconds once per
    /// status tick. The wait ends early with [`GenerationError::Cancelled`]
    /// when `cancel` fires.
    pub async fn assign<F>(
        &mut self,
        batch_size: usize,
        cancel: &CancellationToken,
        mut on_wait: F,
    ) -> Result<usize>
    where
        F: FnMut(u64),
    {
        if batch_size > self.limit {
            return Err(GenerationError::InvalidConfig(format!(
                "batch of {} exceeds the per-credential limit of {} requests per window",
                batch_size, self.limit
            )));
        }

        loop {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            if let Some(index) = self.try_assign(batch_size) {
                tracing::debug!(
                    credential = index,
                    batch_size,
                    used = self.slots[index].request_count,
                    limit = self.limit,
                    "Credential assigned"
                );
                return Ok(index);
            }

            tracing::info!(
                credentials = self.slots.len(),
                wait_secs = ceil_secs(self.remaining_wait()),
                "All keys rate-limited, waiting for window reset"
            );

            loop {
                let remaining = self.remaining_wait();
                on_wait(ceil_secs(remaining));
                if remaining.is_zero() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    _ = tokio::time::sleep(remaining.min(self.status_tick)) => {}
                }
            }
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    (d.as_millis() as u64).div_ceil(1000)
}
