use chrono::{DateTime, Utc};
use errors::ErrorKind;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

macro_rules! string_id {
    ($name:ident, $what:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Option<Self> {
                let id = id.into();
                if id.is_empty() || id.len() > 128 {
                    None
                } else {
                    Some(Self(id))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s).ok_or_else(|| InvalidId {
                    what: $what,
                    value: s.to_string()
                })
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {what}: {value:?}")]
pub struct InvalidId {
    pub what: &'static str,
    pub value: String
}

string_id!(TaskId, "task id");
string_id!(CredentialId, "credential id");

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    Outline,
    Chapter,
    Character,
    Polish
}

/// Lifecycle state of a task.
///
/// `Pending` is the only initial state. `Completed`, `Failed` and
/// `Cancelled` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running | TaskStatus::Cancelled) => true,
            (
                TaskStatus::Running,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            ) => true,
            _ => false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid task transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into()
        }
    }
}

/// Structured failure attached to a task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into()
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<errors::InvocationError> for TaskError {
    fn from(err: errors::InvocationError) -> Self {
        Self::new(err.kind, err.message)
    }
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineRequest {
    pub premise: String,
    #[serde(default)]
    pub genre: Option<String>,
    pub chapter_count: u32,
    #[serde(default = "default_language")]
    pub language: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRequest {
    pub title: String,
    pub synopsis: String,
    #[serde(default)]
    pub previous_excerpt: Option<String>,
    #[serde(default = "default_language")]
    pub language: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRequest {
    pub name: String,
    pub role: String,
    #[serde(default = "default_language")]
    pub language: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolishRequest {
    pub text: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default = "default_language")]
    pub language: String
}

/// Typed input for each generation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Outline(OutlineRequest),
    Chapter(ChapterRequest),
    Character(CharacterRequest),
    Polish(PolishRequest)
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Outline(_) => TaskKind::Outline,
            TaskPayload::Chapter(_) => TaskKind::Chapter,
            TaskPayload::Character(_) => TaskKind::Character,
            TaskPayload::Polish(_) => TaskKind::Polish
        }
    }

    pub fn language(&self) -> &str {
        match self {
            TaskPayload::Outline(r) => &r.language,
            TaskPayload::Chapter(r) => &r.language,
            TaskPayload::Character(r) => &r.language,
            TaskPayload::Polish(r) => &r.language
        }
    }

    /// Text used as the retrieval query when the plan does not override it.
    pub fn retrieval_query(&self) -> String {
        match self {
            TaskPayload::Outline(r) => r.premise.clone(),
            TaskPayload::Chapter(r) => format!("{}\n{}", r.title, r.synopsis),
            TaskPayload::Character(r) => format!("{} {}", r.name, r.role),
            TaskPayload::Polish(r) => r.text.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContextStrategy {
    #[default]
    None,
    Retrieve,
    Compress,
    RetrieveThenCompress
}

impl ContextStrategy {
    pub fn retrieves(self) -> bool {
        matches!(
            self,
            ContextStrategy::Retrieve | ContextStrategy::RetrieveThenCompress
        )
    }

    pub fn compresses(self) -> bool {
        matches!(
            self,
            ContextStrategy::Compress | ContextStrategy::RetrieveThenCompress
        )
    }
}

/// How background knowledge is supplied to a generation task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextPlan {
    pub strategy: ContextStrategy,
    pub nodes: Vec<ContextNode>,
    pub raw_context: Option<String>,
    pub query: Option<String>,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>
}

/// Everything a caller submits for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub payload: TaskPayload,
    #[serde(default)]
    pub context: ContextPlan,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub fallback_model: Option<String>
}

impl TaskSpec {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            payload,
            context: ContextPlan::default(),
            model: None,
            fallback_model: None
        }
    }

    pub fn with_context(mut self, context: ContextPlan) -> Self {
        self.context = context;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub attempts: Vec<InvocationAttempt>,
    /// Estimated tokens of background context supplied to the model.
    pub context_tokens: u32
}

/// A unit of orchestrated work and its full lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub spec: TaskSpec,
    pub status: TaskStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<TaskOutput>,
    pub error: Option<TaskError>,
    pub logs: Vec<LogEntry>
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            kind: spec.payload.kind(),
            spec,
            status: TaskStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
            logs: Vec::new()
        }
    }

    /// Moves the task to `next`, stamping `started_at`/`ended_at`.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next
            });
        }

        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        if next == TaskStatus::Completed {
            self.progress = 100;
        }
        self.status = next;
        Ok(())
    }

    /// Returns true when the stored progress changed.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.status != TaskStatus::Running || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    pub limit: Option<usize>
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| s == task.status) && self.kind.is_none_or(|k| k == task.kind)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub running: u64,
    pub pending: u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_length: usize,
    pub running_count: usize,
    pub max_concurrent: usize
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEventKind {
    StageChanged { from: TaskStatus, to: TaskStatus },
    ProgressChanged { progress: u8 },
    LogAppended { entry: LogEntry }
}

/// Published by the scheduler for every observable task change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeactivationReason {
    Manual,
    FailureThreshold
}

/// Audit view of a credential. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: CredentialId,
    pub active: bool,
    pub removed: bool,
    pub usage_count: u64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivation_reason: Option<DeactivationReason>
}

impl CredentialStatus {
    pub fn new(id: CredentialId) -> Self {
        Self {
            id,
            active: true,
            removed: false,
            usage_count: 0,
            consecutive_failures: 0,
            total_failures: 0,
            last_used_at: None,
            deactivated_at: None,
            deactivation_reason: None
        }
    }
}

// ---------------------------------------------------------------------------
// Context nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEmbedding {
    pub vector: Vec<f32>,
    /// Content hash of the description the vector was computed from.
    pub source_hash: String
}

/// A fragment of structured background knowledge in an outline tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextNode {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub embedding: Option<CachedEmbedding>,
    #[serde(default)]
    pub children: Vec<ContextNode>
}

impl ContextNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            embedding: None,
            children: Vec::new()
        }
    }

    pub fn with_children(mut self, children: Vec<ContextNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_embedding(mut self, embedding: CachedEmbedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Replaces the description and drops the cached embedding.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.embedding = None;
    }

    /// Total number of nodes in this subtree, including self.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(ContextNode::subtree_len).sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure
}

/// One try of a resilient call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationAttempt {
    /// 1-based, strictly increasing within one invocation.
    pub index: u32,
    pub model: String,
    pub credential_id: Option<CredentialId>,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub latency_ms: u64,
    pub usage: TokenUsage,
    /// Delay slept before this attempt.
    pub delay_before_ms: u64,
    pub fallback: bool
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub response_schema: Option<serde_json::Value>
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_instruction: None,
            response_schema: None
        }
    }

    pub fn with_system_instruction(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline_spec() -> TaskSpec {
        TaskSpec::new(TaskPayload::Outline(OutlineRequest {
            premise: "A lighthouse keeper finds a map".to_string(),
            genre: Some("mystery".to_string()),
            chapter_count: 12,
            language: "en".to_string()
        }))
    }

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_task_timestamps_follow_status() {
        let mut task = Task::new(TaskId::generate(), outline_spec());
        assert_eq!(task.kind, TaskKind::Outline);
        assert!(task.started_at.is_none() && task.ended_at.is_none());

        task.transition(TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());
        assert!(task.ended_at.is_none());

        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.ended_at.is_some());
        assert_eq!(task.progress, 100);

        let err = task.transition(TaskStatus::Running).unwrap_err();
        assert_eq!(err.from, TaskStatus::Completed);
    }

    #[test]
    fn test_progress_is_monotonic_while_running() {
        let mut task = Task::new(TaskId::generate(), outline_spec());
        assert!(!task.set_progress(10), "pending tasks do not report progress");

        task.transition(TaskStatus::Running).unwrap();
        assert!(task.set_progress(40));
        assert!(!task.set_progress(20));
        assert_eq!(task.progress, 40);
        assert!(task.set_progress(250));
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_payload_is_tagged_by_kind() {
        let json = serde_json::json!({
            "payload": {
                "kind": "polish",
                "text": "It was a dark night.",
            }
        });
        let spec: TaskSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.payload.kind(), TaskKind::Polish);
        assert_eq!(spec.payload.language(), "en");
        assert_eq!(spec.context.strategy, ContextStrategy::None);
    }

    #[test]
    fn test_set_description_invalidates_embedding() {
        let mut node = ContextNode::new("n1", "Harbor", "A foggy harbor").with_embedding(
            CachedEmbedding {
                vector: vec![1.0, 0.0],
                source_hash: "abc".to_string()
            }
        );
        node.set_description("A sunny harbor");
        assert!(node.embedding.is_none());
    }

    #[test]
    fn test_task_filter() {
        let task = Task::new(TaskId::generate(), outline_spec());
        assert!(TaskFilter::default().matches(&task));
        assert!(
            TaskFilter {
                status: Some(TaskStatus::Pending),
                kind: Some(TaskKind::Outline),
                limit: None
            }
            .matches(&task)
        );
        assert!(
            !TaskFilter {
                kind: Some(TaskKind::Chapter),
                ..Default::default()
            }
            .matches(&task)
        );
    }

    #[test]
    fn test_ids_reject_empty() {
        assert!(TaskId::new("").is_none());
        assert!("".parse::<CredentialId>().is_err());
        assert_eq!("key-1".parse::<CredentialId>().unwrap().as_str(), "key-1");
    }
}
