use crate::embedding::Embedder;
use crate::similarity::cosine_similarity;
use config::RetrievalConfig;
use errors::{ContextError, ErrorKind, ProviderError};
use observability::EngineTelemetry;
use scribe_core::{CachedEmbedding, ContextNode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use utils::compute_content_hash;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    /// Exclusive lower bound on the similarity score.
    pub score_threshold: f32
}

impl From<&RetrievalConfig> for RetrievalOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            score_threshold: config.score_threshold
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub node_id: String,
    pub name: String,
    pub description: String,
    pub score: f32
}

/// Retrieval result, best match first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedContext {
    pub entries: Vec<RankedEntry>,
    /// Nodes that had enough description to be scored.
    pub candidates: usize,
    /// Embeddings computed by this call (cache misses).
    pub embedded: usize
}

impl RankedContext {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// One `- name: description` line per entry, for prompt inclusion.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- {}: {}", e.name, e.description.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Semantic top-K retrieval over a tree of [`ContextNode`]s.
///
/// Embeddings are computed lazily and written back into the nodes together
/// with the hash of the description they were computed from, so repeated
/// calls over an unchanged pool make only the query embedding call.
pub struct Retriever {
    embedder: Embedder,
    min_description_chars: usize,
    pacing: Duration,
    embed_timeout: Duration,
    telemetry: EngineTelemetry
}

impl Retriever {
    pub fn new(embedder: Embedder, config: &RetrievalConfig) -> Self {
        Self {
            embedder,
            min_description_chars: config.min_description_chars,
            pacing: Duration::from_millis(config.embed_pacing_ms),
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
            telemetry: EngineTelemetry::new()
        }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub async fn retrieve(
        &self,
        query: &str,
        nodes: &mut [ContextNode],
        options: RetrievalOptions,
        cancel: &CancellationToken
    ) -> Result<RankedContext, ContextError> {
        let span = info_span!(
            "retrieve",
            top_k = options.top_k,
            score_threshold = options.score_threshold,
            pool_size = nodes.iter().map(ContextNode::subtree_len).sum::<usize>()
        );

        async move {
            let mut calls = 0usize;
            let query_vector = self.paced_embed(query, &mut calls, cancel).await?;

            let mut scored: Vec<RankedEntry> = Vec::new();
            let mut embedded = 0usize;

            let mut stack: Vec<&mut ContextNode> = nodes.iter_mut().rev().collect();
            while let Some(node) = stack.pop() {
                let ContextNode {
                    id,
                    name,
                    description,
                    embedding,
                    children
                } = node;
                stack.extend(children.iter_mut().rev());

                if description.trim().chars().count() < self.min_description_chars {
                    continue;
                }

                let hash = compute_content_hash(description);
                // Vectors from a different embedding model are stale too.
                let stale = embedding.as_ref().is_none_or(|e| {
                    e.source_hash != hash || e.vector.len() != query_vector.len()
                });
                if stale {
                    let vector = self.paced_embed(description, &mut calls, cancel).await?;
                    *embedding = Some(CachedEmbedding {
                        vector,
                        source_hash: hash
                    });
                    embedded += 1;
                }

                let Some(cached) = embedding.as_ref() else {
                    continue;
                };

                scored.push(RankedEntry {
                    node_id: id.clone(),
                    name: name.clone(),
                    description: description.clone(),
                    score: cosine_similarity(&query_vector, &cached.vector)
                });
            }

            let candidates = scored.len();
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            let entries: Vec<RankedEntry> = scored
                .into_iter()
                .take(options.top_k)
                .filter(|e| e.score > options.score_threshold)
                .collect();

            debug!(
                candidates,
                embedded,
                returned = entries.len(),
                "Retrieval finished"
            );
            self.telemetry
                .record_retrieval(candidates, entries.len(), embedded);

            Ok(RankedContext {
                entries,
                candidates,
                embedded
            })
        }
        .instrument(span)
        .await
    }

    /// Embeds `text`, sleeping `pacing` first unless this is the call's
    /// first embedding request. The call itself is bounded by
    /// `embed_timeout` and abandoned on cancellation.
    async fn paced_embed(
        &self,
        text: &str,
        calls: &mut usize,
        cancel: &CancellationToken
    ) -> Result<Vec<f32>, ContextError> {
        if *calls > 0 && !self.pacing.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ContextError::Cancelled),
                _ = tokio::time::sleep(self.pacing) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        *calls += 1;
        tokio::select! {
            _ = cancel.cancelled() => Err(ContextError::Cancelled),
            result = tokio::time::timeout(self.embed_timeout, self.embedder.embed(text)) => {
                result.unwrap_or_else(|_| {
                    warn!(
                        timeout_secs = self.embed_timeout.as_secs(),
                        "Embedding call timed out"
                    );
                    Err(ContextError::Embedding(ProviderError::new(
                        ErrorKind::Timeout,
                        format!(
                            "embedding call exceeded timeout of {}s",
                            self.embed_timeout.as_secs()
                        )
                    )))
                })
            }
        }
    }
}
