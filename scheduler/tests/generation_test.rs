use config::{
    CompressionConfig, CredentialPoolConfig, InvocationConfig, RetrievalConfig, SchedulerConfig
};
use context::{Compressor, Embedder, Retriever};
use credentials::CredentialPool;
use errors::ProviderError;
use invocation::ResilientInvoker;
use scheduler::{GenerationExecutor, TaskScheduler};
use scribe_core::{ContextPlan, ContextStrategy, LogLevel, Task, TaskSpec, TaskStatus};
use std::sync::Arc;
use testing::{KeywordEmbeddingProvider, ScriptedGenerationProvider, chapter_spec, story_tree};

const PRIMARY: &str = "primary-model";
const COMPACT: &str = "compact-model";

const RAW_CONTEXT: &str = "Saltmarsh is a fishing town of about two thousand people. \
    The harbor council has seven members and meets weekly in the old customs house. \
    Mara, the keeper's daughter, is stubborn and cannot swim.";

struct Harness {
    generation: Arc<ScriptedGenerationProvider>,
    embeddings: Arc<KeywordEmbeddingProvider>,
    scheduler: TaskScheduler
}

fn harness() -> Harness {
    let generation = Arc::new(ScriptedGenerationProvider::new());
    let embeddings = Arc::new(KeywordEmbeddingProvider::new([
        "lighthouse", "market", "map", "fog", "keeper"
    ]));

    let invocation = InvocationConfig {
        jitter_ms: 0,
        max_attempts: 1,
        default_model: PRIMARY.to_string(),
        ..Default::default()
    };
    let pool = CredentialPool::with_credentials(
        &CredentialPoolConfig::default(),
        [("key-1", "sk-1")]
    );
    let invoker = Arc::new(ResilientInvoker::new(
        generation.clone(),
        Arc::new(pool),
        &invocation
    ));

    let retrieval = RetrievalConfig {
        embed_pacing_ms: 0,
        ..Default::default()
    };
    let retriever = Retriever::new(Embedder::new(embeddings.clone()), &retrieval);
    let compressor = Compressor::new(
        invoker.clone(),
        CompressionConfig {
            enabled: true,
            model: COMPACT.to_string(),
            min_input_chars: 40
        }
    );
    let executor = GenerationExecutor::new(invoker, &invocation)
        .with_retriever(Arc::new(retriever), retrieval)
        .with_compressor(Arc::new(compressor));

    Harness {
        generation,
        embeddings,
        scheduler: TaskScheduler::new(&SchedulerConfig::default(), Arc::new(executor))
    }
}

async fn run(harness: &Harness, spec: TaskSpec) -> Task {
    let mut handle = harness.scheduler.submit(spec).await.unwrap();
    handle.wait().await.unwrap()
}

fn generation_prompt(harness: &Harness) -> String {
    harness
        .generation
        .calls()
        .into_iter()
        .find(|c| c.model == PRIMARY)
        .map(|c| c.prompt)
        .unwrap()
}

fn retrieval_spec() -> TaskSpec {
    chapter_spec("The dark lamp", "Mara climbs the lighthouse at night").with_context(
        ContextPlan {
            strategy: ContextStrategy::Retrieve,
            nodes: story_tree(),
            top_k: Some(2),
            score_threshold: Some(0.5),
            ..Default::default()
        }
    )
}

#[tokio::test]
async fn test_retrieved_nodes_reach_the_prompt() {
    let harness = harness();

    let task = run(&harness, retrieval_spec()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let prompt = generation_prompt(&harness);
    assert!(prompt.starts_with("Chapter: The dark lamp"));
    assert!(prompt.contains("<reference>"));
    assert!(prompt.contains("- The Lighthouse: An abandoned lighthouse"));
    assert!(!prompt.contains("Fish Market"));
    assert!(task.result.unwrap().context_tokens > 0);
    assert!(
        task.logs
            .iter()
            .any(|e| e.message.starts_with("Retrieved 2 of 5 context nodes"))
    );
    assert_eq!(harness.embeddings.calls(), 6);
}

#[tokio::test]
async fn test_retrieval_failure_does_not_fail_task() {
    let harness = harness();
    harness
        .embeddings
        .fail_with(ProviderError::network("connection reset"));

    let task = run(&harness, retrieval_spec()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(!generation_prompt(&harness).contains("<reference>"));
    assert!(task.logs.iter().any(|e| {
        e.level == LogLevel::Warn && e.message.starts_with("Context retrieval failed")
    }));
    assert_eq!(task.result.unwrap().context_tokens, 0);
}

#[tokio::test]
async fn test_compressed_context_replaces_raw() {
    let harness = harness();
    harness.generation.push_text(
        COMPACT,
        r#"{"entities":[{"name":"Mara","traits":["stubborn","cannot swim"]}],"facts":["population 2000","council of 7"]}"#
    );

    let spec = chapter_spec("Council night", "The council argues").with_context(ContextPlan {
        strategy: ContextStrategy::Compress,
        raw_context: Some(RAW_CONTEXT.to_string()),
        ..Default::default()
    });
    let task = run(&harness, spec).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let prompt = generation_prompt(&harness);
    assert!(prompt.contains("[ENTS]Mara:stubborn,cannot swim[FACTS]population 2000;council of 7"));
    assert!(!prompt.contains("customs house"));
    assert!(
        task.logs
            .iter()
            .any(|e| e.message.starts_with("Context compression applied"))
    );
    assert!(
        task.logs
            .iter()
            .any(|e| e.message.starts_with("Compression attempt 1 on compact-model succeeded"))
    );
}

#[tokio::test]
async fn test_failed_compression_passes_raw_context_through() {
    let harness = harness();
    harness
        .generation
        .push_error(COMPACT, ProviderError::malformed("truncated JSON"));

    let spec = chapter_spec("Council night", "The council argues").with_context(ContextPlan {
        strategy: ContextStrategy::Compress,
        raw_context: Some(RAW_CONTEXT.to_string()),
        ..Default::default()
    });
    let task = run(&harness, spec).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(generation_prompt(&harness).contains(RAW_CONTEXT));
    assert!(
        task.logs
            .iter()
            .any(|e| e.message.starts_with("Context compression fallback"))
    );
}

#[tokio::test]
async fn test_progress_reaches_milestones() {
    let harness = harness();
    let mut events = harness.scheduler.subscribe();

    let task = run(&harness, chapter_spec("Plain", "No context")).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let scribe_core::TaskEventKind::ProgressChanged { progress: p } = event.kind {
            progress.push(p);
        }
    }
    assert_eq!(progress, vec![10, 40, 90, 100]);
}
