//! Multi-region invoker (SuperLambda)
//!
//! One logical compute target backed by several physical instances: main
//! region replicas first, then one instance per secondary region.
//!
//! ```text
//!  invoke(request)
//!    │
//!    ├─ pass 0..=max_retries ───────────────────────────────────────────┐
//!    │    (backoff before every pass after the first)                    │
//!    │    read liveness rows ─▶ keep active ─▶ sort (main first, name)   │
//!    │    for each candidate:                                            │
//!    │        spawn call ──┐                                             │
//!    │        sleep(max) ──┴─ select! ─▶ response: return               │
//!    │                                 └▶ timeout/error: fallback += 1   │
//!    └───────────────────────────────────────────────────────────────────┘
//!    NoActiveInstances { retries, fallbacks }
//! ```
//!
//! A call that loses the race is abandoned, not cancelled: the spawned task
//! keeps running and its side effects may still land.

mod http;
#[cfg(feature = "aws")]
mod lambda;
mod local;

pub use http::HttpInvoker;
#[cfg(feature = "aws")]
pub use lambda::LambdaInvoker;
pub use local::{Fault, LocalComputePool};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::SuperLambdaConfig;
use crate::defaults::DEFAULT_WAKE_PROBE_MS;
use crate::error::{KnnError, Result};
use crate::handler::{Envelope, EnvelopeResponse, WaitResponse, KNN_PATH};
use crate::liveness::{LivenessRow, LivenessStore};
use crate::usage::{UsageEvent, UsageKind, UsageSink};

/// Address of one physical compute instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub name: String,
    pub region: String,
}

impl InstanceRef {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.region)
    }
}

impl From<LivenessRow> for InstanceRef {
    fn from(row: LivenessRow) -> Self {
        Self::new(row.name, row.region)
    }
}

/// Calls a single physical instance
#[async_trait]
pub trait InstanceInvoker: Send + Sync + 'static {
    async fn invoke(&self, instance: &InstanceRef, request: Envelope) -> Result<EnvelopeResponse>;
}

/// Result of a successful logical invocation
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub response: EnvelopeResponse,
    /// Instance that won the race
    pub instance: InstanceRef,
    /// Candidates abandoned on timeout or error before the winner
    pub fallbacks: u32,
    /// Rescans of the liveness table
    pub retries: u32,
    pub elapsed: Duration,
}

/// Why a candidate did not win
#[derive(Debug)]
enum Fallback {
    Timeout,
    Error(String),
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Timeout => write!(f, "timeout"),
            Fallback::Error(e) => write!(f, "{}", e),
        }
    }
}

/// Main-region instances first, then by name (region breaks name ties)
pub fn sort_candidates(rows: Vec<LivenessRow>, main_region: &str) -> Vec<InstanceRef> {
    let mut candidates: Vec<InstanceRef> = rows
        .into_iter()
        .filter(LivenessRow::is_active)
        .map(InstanceRef::from)
        .collect();
    candidates.sort_by(|a, b| {
        (a.region != main_region, &a.name, &a.region).cmp(&(b.region != main_region, &b.name, &b.region))
    });
    candidates
}

pub struct SuperLambda {
    database_name: String,
    main_region: String,
    liveness: LivenessStore,
    invoker: Arc<dyn InstanceInvoker>,
    config: SuperLambdaConfig,
    usage: Option<Arc<dyn UsageSink>>,
}

impl SuperLambda {
    pub fn new(
        database_name: impl Into<String>,
        main_region: impl Into<String>,
        liveness: LivenessStore,
        invoker: Arc<dyn InstanceInvoker>,
        config: SuperLambdaConfig,
    ) -> Self {
        Self {
            database_name: database_name.into(),
            main_region: main_region.into(),
            liveness,
            invoker,
            config,
            usage: None,
        }
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(sink);
        self
    }

    pub fn config(&self) -> &SuperLambdaConfig {
        &self.config
    }

    /// Active instances in invocation order
    pub async fn candidates(&self) -> Result<Vec<InstanceRef>> {
        let rows = self.liveness.rows().await?;
        Ok(sort_candidates(rows, &self.main_region))
    }

    /// Invoke the logical target, falling back across instances and
    /// rescanning liveness until the retry budget is spent
    pub async fn invoke(&self, request: Envelope) -> Result<InvokeOutcome> {
        let started = Instant::now();
        let mut fallbacks = 0u32;

        for retry in 0..=self.config.max_retries {
            if retry > 0 {
                tokio::time::sleep(self.config.retry_backoff).await;
            }

            let candidates = match self.candidates().await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(retry, error = %e, "Liveness scan failed");
                    continue;
                }
            };

            if candidates.is_empty() {
                tracing::debug!(retry, "No active instances");
                continue;
            }

            for candidate in candidates {
                match self.race(&candidate, request.clone()).await {
                    Ok(response) => {
                        let outcome = InvokeOutcome {
                            response,
                            instance: candidate,
                            fallbacks,
                            retries: retry,
                            elapsed: started.elapsed(),
                        };
                        tracing::info!(
                            instance = %outcome.instance,
                            path = %request.path,
                            status = outcome.response.status,
                            fallbacks,
                            retries = retry,
                            elapsed_ms = outcome.elapsed.as_millis() as u64,
                            "Invocation served"
                        );
                        self.record_usage(&request, &outcome);
                        return Ok(outcome);
                    }
                    Err(reason) => {
                        fallbacks += 1;
                        tracing::warn!(instance = %candidate, retry, fallbacks, reason = %reason, "Falling back");
                    }
                }
            }
        }

        tracing::error!(
            retries = self.config.max_retries,
            fallbacks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Invocation failed: no active instances"
        );
        Err(KnnError::NoActiveInstances {
            retries: self.config.max_retries,
            fallbacks,
        })
    }

    /// Race one call against `max_timeout`. The loser is dropped; for the
    /// call that means its task is detached and left to finish on its own.
    async fn race(&self, candidate: &InstanceRef, request: Envelope) -> std::result::Result<EnvelopeResponse, Fallback> {
        let invoker = self.invoker.clone();
        let target = candidate.clone();
        let call = tokio::spawn(async move { invoker.invoke(&target, request).await });

        tokio::select! {
            joined = call => match joined {
                Ok(Ok(response)) if response.status >= 500 => Err(Fallback::Error(format!(
                    "status {}: {}",
                    response.status, response.body
                ))),
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(Fallback::Error(e.to_string())),
                Err(e) => Err(Fallback::Error(e.to_string())),
            },
            _ = tokio::time::sleep(self.config.max_timeout) => Err(Fallback::Timeout),
        }
    }

    fn record_usage(&self, request: &Envelope, outcome: &InvokeOutcome) {
        let Some(sink) = &self.usage else {
            return;
        };
        if request.path != KNN_PATH || !outcome.response.is_success() {
            return;
        }

        if let Some(Value::Array(updates)) = request.body.get("updates") {
            let removed = updates
                .iter()
                .filter(|u| u.get("deactivated").and_then(Value::as_bool) == Some(true))
                .count();
            let added = updates.len() - removed;
            if added > 0 {
                sink.emit(UsageEvent::writes(&self.database_name, UsageKind::Add, added));
            }
            if removed > 0 {
                sink.emit(UsageEvent::writes(&self.database_name, UsageKind::Remove, removed));
            }
        }
        sink.emit(UsageEvent::query(
            &self.database_name,
            outcome.elapsed.as_millis() as u64,
        ));
    }

    /// Probe the first `count` active instances with `/wait` and collect the
    /// instance ids that answered within `max_timeout`
    pub async fn wake(&self, count: usize) -> Result<BTreeSet<String>> {
        let candidates = self.candidates().await?;
        let probes = candidates.into_iter().take(count).map(|candidate| async move {
            let call = self
                .invoker
                .invoke(&candidate, Envelope::wait(DEFAULT_WAKE_PROBE_MS));
            match tokio::time::timeout(self.config.max_timeout, call).await {
                Ok(Ok(response)) => response
                    .decode::<WaitResponse>()
                    .map(|r| r.instance_id)
                    .ok(),
                Ok(Err(e)) => {
                    tracing::warn!(instance = %candidate, error = %e, "Wake probe failed");
                    None
                }
                Err(_) => {
                    tracing::warn!(instance = %candidate, "Wake probe timed out");
                    None
                }
            }
        });

        let answered: BTreeSet<String> = join_all(probes).await.into_iter().flatten().collect();
        tracing::info!(requested = count, answered = answered.len(), "Wake complete");
        Ok(answered)
    }
}
