//! Auth event logger: bounded in-memory ring buffer, structured tracing
//! output, `metrics` counters and an optional persistent sink.
//!
//! Logging never fails and never blocks the caller. Sink writes are spawned
//! onto the runtime; their failures are traced and dropped.

use async_trait::async_trait;
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{AuthEvent, AuthEventKind, Severity};

pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Durable destination for auth events.
#[async_trait]
pub trait AuthEventSink: Send + Sync {
    async fn write(&self, event: &AuthEvent) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Default)]
struct Counters {
    login_success: AtomicU64,
    login_failure: AtomicU64,
    tokens_issued: AtomicU64,
    tokens_revoked: AtomicU64,
    cross_app_navigations: AtomicU64,
    rate_limited: AtomicU64,
    token_validation_failures: AtomicU64,
}

/// Counters derived from the event stream since process start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AuthMetrics {
    pub login_success: u64,
    pub login_failure: u64,
    /// Successes over attempts; 1.0 when there were no attempts.
    pub login_success_rate: f64,
    /// Tokens issued minus revocation events, floored at zero.
    pub active_tokens: u64,
    pub cross_app_navigations: u64,
    pub rate_limited: u64,
    pub token_validation_failures: u64,
    pub buffered_events: usize,
}

pub struct AuthEventLogger {
    buffer: Mutex<VecDeque<AuthEvent>>,
    capacity: usize,
    counters: Counters,
    sink: Option<Arc<dyn AuthEventSink>>,
}

impl Default for AuthEventLogger {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl AuthEventLogger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            counters: Counters::default(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuthEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<AuthEvent>> {
        // A panic elsewhere must not disable logging
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn log(&self, event: AuthEvent) {
        emit_trace(&event);
        self.count(&event);

        {
            let mut buffer = self.buffer();
            if buffer.len() == self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        if let Some(sink) = &self.sink {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let sink = sink.clone();
                    handle.spawn(async move {
                        if let Err(e) = sink.write(&event).await {
                            tracing::error!(
                                error = %e,
                                kind = event.kind.as_str(),
                                "Failed to persist auth event"
                            );
                        }
                    });
                }
                Err(_) => {
                    tracing::debug!(
                        kind = event.kind.as_str(),
                        "No runtime available; auth event kept in memory only"
                    );
                }
            }
        }
    }

    /// Shorthand for an event with only a kind and optional user.
    pub fn record(&self, kind: AuthEventKind, user_id: Option<&str>) {
        let mut event = AuthEvent::new(kind);
        if let Some(user_id) = user_id {
            event = event.user(user_id);
        }
        self.log(event);
    }

    fn count(&self, event: &AuthEvent) {
        let counter_for = match event.kind {
            AuthEventKind::LoginSuccess => Some(&self.counters.login_success),
            AuthEventKind::LoginFailure => Some(&self.counters.login_failure),
            AuthEventKind::TokenIssued => Some(&self.counters.tokens_issued),
            AuthEventKind::TokenRevoked => Some(&self.counters.tokens_revoked),
            AuthEventKind::CrossAppNavigation => Some(&self.counters.cross_app_navigations),
            AuthEventKind::RateLimited => Some(&self.counters.rate_limited),
            AuthEventKind::TokenValidationFailed => Some(&self.counters.token_validation_failures),
            _ => None,
        };
        if let Some(c) = counter_for {
            c.fetch_add(1, Ordering::Relaxed);
        }

        counter!("auth_events_total", "kind" => event.kind.as_str()).increment(1);
        if matches!(
            event.kind,
            AuthEventKind::TokenIssued | AuthEventKind::TokenRevoked
        ) {
            gauge!("auth_active_tokens").set(self.active_tokens() as f64);
        }
    }

    fn active_tokens(&self) -> u64 {
        self.counters
            .tokens_issued
            .load(Ordering::Relaxed)
            .saturating_sub(self.counters.tokens_revoked.load(Ordering::Relaxed))
    }

    /// Most recent events first.
    pub fn recent(&self, limit: usize) -> Vec<AuthEvent> {
        self.buffer().iter().rev().take(limit).cloned().collect()
    }

    pub fn for_user(&self, user_id: &str, limit: usize) -> Vec<AuthEvent> {
        self.buffer()
            .iter()
            .rev()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn by_kind(&self, kind: AuthEventKind, limit: usize) -> Vec<AuthEvent> {
        self.buffer()
            .iter()
            .rev()
            .filter(|e| e.kind == kind)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> AuthMetrics {
        let login_success = self.counters.login_success.load(Ordering::Relaxed);
        let login_failure = self.counters.login_failure.load(Ordering::Relaxed);
        let attempts = login_success + login_failure;
        AuthMetrics {
            login_success,
            login_failure,
            login_success_rate: if attempts == 0 {
                1.0
            } else {
                login_success as f64 / attempts as f64
            },
            active_tokens: self.active_tokens(),
            cross_app_navigations: self.counters.cross_app_navigations.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            token_validation_failures: self
                .counters
                .token_validation_failures
                .load(Ordering::Relaxed),
            buffered_events: self.len(),
        }
    }
}

fn emit_trace(event: &AuthEvent) {
    let kind = event.kind.as_str();
    let user_id = event.user_id.as_deref().unwrap_or("-");
    let app = event.app.map(|a| a.as_str()).unwrap_or("-");
    let error = event.error.as_deref().unwrap_or("");
    match event.severity {
        Severity::Debug => {
            tracing::debug!(kind, user_id, app, duration_ms = ?event.duration_ms, "Auth event")
        }
        Severity::Info => {
            tracing::info!(kind, user_id, app, duration_ms = ?event.duration_ms, "Auth event")
        }
        Severity::Warning => {
            tracing::warn!(kind, user_id, app, error, "Auth event")
        }
        Severity::Error | Severity::Critical => {
            tracing::error!(kind, user_id, app, error, severity = ?event.severity, "Auth event")
        }
    }
}
