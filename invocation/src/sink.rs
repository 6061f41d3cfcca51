use async_trait::async_trait;
use errors::ErrorKind;
use parking_lot::Mutex;
use scribe_core::InvocationAttempt;
use std::time::Duration;

/// Receives every attempt of an invocation as it happens.
#[async_trait]
pub trait AttemptSink: Send + Sync {
    async fn record(&self, attempt: &InvocationAttempt);

    /// Called before sleeping ahead of attempt `next_index`.
    async fn backoff(&self, _next_index: u32, _delay: Duration, _cause: ErrorKind) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl AttemptSink for NoopSink {
    async fn record(&self, _attempt: &InvocationAttempt) {}
}

/// Keeps attempts and backoff delays in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    attempts: Mutex<Vec<InvocationAttempt>>,
    delays: Mutex<Vec<Duration>>
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<InvocationAttempt> {
        self.attempts.lock().clone()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl AttemptSink for RecordingSink {
    async fn record(&self, attempt: &InvocationAttempt) {
        self.attempts.lock().push(attempt.clone());
    }

    async fn backoff(&self, _next_index: u32, delay: Duration, _cause: ErrorKind) {
        self.delays.lock().push(delay);
    }
}
