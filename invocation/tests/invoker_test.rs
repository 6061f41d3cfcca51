use config::{CredentialPoolConfig, InvocationConfig};
use credentials::CredentialPool;
use errors::{ErrorKind, ProviderError};
use invocation::{InvocationRequest, RecordingSink, ResilientInvoker};
use scribe_core::AttemptOutcome;
use std::sync::Arc;
use std::time::Duration;
use testing::ScriptedGenerationProvider;
use tokio_util::sync::CancellationToken;

const PRIMARY: &str = "primary-model";
const FALLBACK: &str = "fallback-model";

fn invocation_config() -> InvocationConfig {
    InvocationConfig {
        jitter_ms: 0,
        ..Default::default()
    }
}

fn pool(keys: usize) -> Arc<CredentialPool> {
    let config = CredentialPoolConfig {
        failure_threshold: 10,
        reactivate_after_secs: None
    };
    Arc::new(CredentialPool::with_credentials(
        &config,
        (1..=keys).map(|i| (format!("key-{i}"), format!("sk-{i}")))
    ))
}

fn invoker(provider: &Arc<ScriptedGenerationProvider>, config: &InvocationConfig) -> ResilientInvoker {
    ResilientInvoker::new(provider.clone(), pool(2), config)
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    provider.push_text(PRIMARY, "Chapter one.");
    let invoker = invoker(&provider, &invocation_config());
    let sink = RecordingSink::new();

    let response = invoker
        .invoke(
            &InvocationRequest::new(PRIMARY, "Write chapter one"),
            &CancellationToken::new(),
            &sink
        )
        .await
        .unwrap();

    assert_eq!(response.text, "Chapter one.");
    assert_eq!(response.model, PRIMARY);
    assert!(!response.used_fallback);
    assert_eq!(response.attempts.len(), 1);
    assert_eq!(response.attempts[0].outcome, AttemptOutcome::Success);
    assert_eq!(sink.attempts(), response.attempts);
    assert_eq!(invoker.usage().summary(PRIMARY).unwrap().successful_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_error_then_success() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    provider.push_error(
        PRIMARY,
        ProviderError::new(ErrorKind::ServiceUnavailable, "503")
    );
    provider.push_text(PRIMARY, "ok");
    let invoker = invoker(&provider, &invocation_config());
    let sink = RecordingSink::new();

    let response = invoker
        .invoke(
            &InvocationRequest::new(PRIMARY, "prompt"),
            &CancellationToken::new(),
            &sink
        )
        .await
        .unwrap();

    assert_eq!(response.attempts.len(), 2);
    assert_eq!(
        response.attempts[0].outcome,
        AttemptOutcome::RetryableFailure
    );
    assert_eq!(response.attempts[1].delay_before_ms, 3000);
    assert_eq!(
        response
            .attempts
            .iter()
            .map(|a| a.index)
            .collect::<Vec<_>>(),
        vec![1, 2]
    );
    // Consecutive attempts rotate credentials.
    assert_ne!(
        response.attempts[0].credential_id,
        response.attempts[1].credential_id
    );
}

#[tokio::test(start_paused = true)]
async fn test_quota_exhaustion_cascades_to_fallback_once() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    provider.always(PRIMARY, Err(ProviderError::quota("429 Too Many Requests")));
    provider.push_text(FALLBACK, "fallback prose");
    let invoker = invoker(&provider, &invocation_config());
    let sink = RecordingSink::new();

    let request = InvocationRequest::new(PRIMARY, "prompt")
        .with_fallback_model(Some(FALLBACK.to_string()));
    let response = invoker
        .invoke(&request, &CancellationToken::new(), &sink)
        .await
        .unwrap();

    assert_eq!(provider.calls_for(PRIMARY), 3);
    assert_eq!(provider.calls_for(FALLBACK), 1);
    assert_eq!(response.text, "fallback prose");
    assert_eq!(response.model, FALLBACK);
    assert!(response.used_fallback);
    assert_eq!(response.attempts.len(), 4);
    assert!(response.attempts[3].fallback);
    assert_eq!(response.attempts[3].delay_before_ms, 0);

    // Quota delays: 3000 * 3, then 6000 * 3.
    assert_eq!(
        sink.delays(),
        vec![Duration::from_millis(9000), Duration::from_millis(18000)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_fallback_surfaces_its_error() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    provider.always(PRIMARY, Err(ProviderError::quota("429")));
    provider.push_error(
        FALLBACK,
        ProviderError::new(ErrorKind::ServiceUnavailable, "fallback down")
    );
    let invoker = invoker(&provider, &invocation_config());

    let request = InvocationRequest::new(PRIMARY, "prompt")
        .with_fallback_model(Some(FALLBACK.to_string()));
    let err = invoker
        .invoke(&request, &CancellationToken::new(), &RecordingSink::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert_eq!(err.message, "fallback down");
    assert_eq!(err.attempts, 4);
    assert_eq!(provider.calls_for(FALLBACK), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_quota_exhaustion_skips_fallback() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    provider.always(
        PRIMARY,
        Err(ProviderError::new(ErrorKind::ServiceUnavailable, "502"))
    );
    let invoker = invoker(&provider, &invocation_config());

    let request = InvocationRequest::new(PRIMARY, "prompt")
        .with_fallback_model(Some(FALLBACK.to_string()));
    let err = invoker
        .invoke(&request, &CancellationToken::new(), &RecordingSink::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert_eq!(err.attempts, 3);
    assert_eq!(provider.calls_for(FALLBACK), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_without_fallback_reports_last_error() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    provider.push_error(PRIMARY, ProviderError::network("connection reset"));
    provider.push_error(PRIMARY, ProviderError::quota("429 first"));
    provider.push_error(PRIMARY, ProviderError::quota("429 last"));
    let invoker = invoker(&provider, &invocation_config());
    let sink = RecordingSink::new();

    let err = invoker
        .invoke(
            &InvocationRequest::new(PRIMARY, "prompt"),
            &CancellationToken::new(),
            &sink
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    assert_eq!(err.message, "429 last");
    assert_eq!(err.attempts, 3);

    let delays = sink.delays();
    assert_eq!(delays.len(), 2);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    let ceiling = Duration::from_millis(invocation_config().max_delay_ms);
    assert!(delays.iter().all(|d| *d <= ceiling));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_errors_are_not_retried() {
    for kind in [
        ErrorKind::ContentPolicyBlocked,
        ErrorKind::MalformedResponse,
        ErrorKind::InvalidRequest
    ] {
        let provider = Arc::new(ScriptedGenerationProvider::new());
        provider.push_error(PRIMARY, ProviderError::new(kind, "nope"));
        let invoker = invoker(&provider, &invocation_config());

        let request = InvocationRequest::new(PRIMARY, "prompt")
            .with_fallback_model(Some(FALLBACK.to_string()));
        let err = invoker
            .invoke(&request, &CancellationToken::new(), &RecordingSink::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, kind);
        assert_eq!(err.attempts, 1);
        assert_eq!(provider.calls().len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_pool_is_fatal() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    let invoker = ResilientInvoker::new(provider.clone(), pool(0), &invocation_config());
    let sink = RecordingSink::new();

    let err = invoker
        .invoke(
            &InvocationRequest::new(PRIMARY, "prompt"),
            &CancellationToken::new(),
            &sink
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::NoCredentialAvailable);
    assert_eq!(err.attempts, 1);
    assert!(provider.calls().is_empty());
    assert_eq!(sink.attempts()[0].credential_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_is_retryable() {
    let provider = Arc::new(
        ScriptedGenerationProvider::new().with_latency(Duration::from_secs(500))
    );
    let config = InvocationConfig {
        max_attempts: 2,
        call_timeout_secs: 30,
        ..invocation_config()
    };
    let invoker = invoker(&provider, &config);
    let sink = RecordingSink::new();

    let err = invoker
        .invoke(
            &InvocationRequest::new(PRIMARY, "prompt"),
            &CancellationToken::new(),
            &sink
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.attempts, 2);
    // Timeouts use the network multiplier.
    assert_eq!(sink.delays(), vec![Duration::from_millis(4500)]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_retries() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    provider.always(PRIMARY, Err(ProviderError::quota("429")));
    let invoker = Arc::new(invoker(&provider, &invocation_config()));
    let cancel = CancellationToken::new();

    let handle = {
        let invoker = Arc::clone(&invoker);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let request = InvocationRequest::new(PRIMARY, "prompt")
                .with_fallback_model(Some(FALLBACK.to_string()));
            invoker
                .invoke(&request, &cancel, &RecordingSink::new())
                .await
        })
    };

    // First attempt fails immediately; the 9s backoff is in progress.
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts, 1);
    assert_eq!(provider.calls_for(PRIMARY), 1);
    assert_eq!(provider.calls_for(FALLBACK), 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_after_cancel_is_discarded() {
    let provider = Arc::new(
        ScriptedGenerationProvider::new().with_latency(Duration::from_secs(5))
    );
    let invoker = Arc::new(invoker(&provider, &invocation_config()));
    let cancel = CancellationToken::new();

    let handle = {
        let invoker = Arc::clone(&invoker);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            invoker
                .invoke(
                    &InvocationRequest::new(PRIMARY, "prompt"),
                    &cancel,
                    &RecordingSink::new()
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    // The in-flight call was allowed to complete.
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_makes_no_call() {
    let provider = Arc::new(ScriptedGenerationProvider::new());
    let invoker = invoker(&provider, &invocation_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = invoker
        .invoke(
            &InvocationRequest::new(PRIMARY, "prompt"),
            &cancel,
            &RecordingSink::new()
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.attempts, 0);
    assert!(provider.calls().is_empty());
}
