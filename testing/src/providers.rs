use async_trait::async_trait;
use errors::ProviderError;
use parking_lot::Mutex;
use scribe_core::{
    EmbeddingProvider, GenerationProvider, GenerationRequest, GenerationResponse, TokenUsage
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One call observed by [`ScriptedGenerationProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub api_key: String,
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub has_schema: bool
}

type Scripted = Result<GenerationResponse, ProviderError>;

/// Generation provider that replays queued outcomes per model.
///
/// When a model's queue is empty the provider answers with
/// `"<model>: <first prompt line>"`.
#[derive(Default)]
pub struct ScriptedGenerationProvider {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    repeat: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Mutex<Option<Duration>>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize
}

impl ScriptedGenerationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call blocks until [`release`](Self::release) hands out a permit.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    pub fn push_text(&self, model: &str, text: impl Into<String>) {
        let text = text.into();
        let usage = TokenUsage::new(10, text.len() as u64 / 4 + 1);
        self.push(model, Ok(GenerationResponse { text, usage }));
    }

    pub fn push_error(&self, model: &str, error: ProviderError) {
        self.push(model, Err(error));
    }

    pub fn push(&self, model: &str, outcome: Scripted) {
        self.scripts
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Used whenever the model's queue is empty.
    pub fn always(&self, model: &str, outcome: Scripted) {
        self.repeat.lock().insert(model.to_string(), outcome);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.model == model).count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, request: &GenerationRequest) -> Scripted {
        if let Some(outcome) = self
            .scripts
            .lock()
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        if let Some(outcome) = self.repeat.lock().get(&request.model) {
            return outcome.clone();
        }
        let first_line = request.prompt.lines().next().unwrap_or_default();
        Ok(GenerationResponse {
            text: format!("{}: {}", request.model, first_line),
            usage: TokenUsage::new(10, 5)
        })
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerationProvider {
    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest
    ) -> Result<GenerationResponse, ProviderError> {
        self.calls.lock().push(RecordedCall {
            model: request.model.clone(),
            api_key: api_key.to_string(),
            prompt: request.prompt.clone(),
            system_instruction: request.system_instruction.clone(),
            has_schema: request.response_schema.is_some()
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_outcome(request)
    }
}

/// Deterministic embedding provider.
///
/// Texts registered with [`with_vector`](Self::with_vector) get that exact
/// vector; anything else gets a bag-of-keywords vector over the configured
/// vocabulary (one axis per keyword, plus a constant axis so no vector is
/// zero).
pub struct KeywordEmbeddingProvider {
    vocabulary: Vec<String>,
    fixed: Mutex<HashMap<String, Vec<f32>>>,
    failure: Mutex<Option<ProviderError>>,
    calls: AtomicUsize
}

impl KeywordEmbeddingProvider {
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        Self {
            vocabulary: vocabulary
                .into_iter()
                .map(|w| w.into().to_lowercase())
                .collect(),
            fixed: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0)
        }
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.lock().insert(text.to_string(), vector);
        self
    }

    /// Every subsequent call fails with `error`.
    pub fn fail_with(&self, error: ProviderError) {
        *self.failure.lock() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn keyword_vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|word| lower.matches(word.as_str()).count() as f32)
            .collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        if let Some(vector) = self.fixed.lock().get(text) {
            return Ok(vector.clone());
        }
        Ok(self.keyword_vector(text))
    }
}
