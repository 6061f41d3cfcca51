use adapters::{OpenAiClient, OpenAiEmbeddingProvider, OpenAiGenerationProvider};
use anyhow::Result;
use config::Config;
use context::{Compressor, Embedder, Retriever};
use credentials::CredentialPool;
use invocation::ResilientInvoker;
use scheduler::{GenerationExecutor, TaskScheduler};
use std::sync::Arc;
use tracing::info;

/// Everything a command needs, wired from one configuration.
pub struct Engine {
    pub config: Config,
    pub credentials: Arc<CredentialPool>,
    pub invoker: Arc<ResilientInvoker>,
    pub retriever: Arc<Retriever>,
    pub compressor: Arc<Compressor>
}

impl Engine {
    pub fn build(config: Config) -> Result<Self> {
        let credentials = Arc::new(CredentialPool::with_credentials(
            &config.credentials,
            config.provider.credentials()
        ));
        if credentials.is_empty() {
            crate::output::warn(
                "no API keys configured; set provider.api_keys or SCRIBE_PROVIDER_API_KEYS"
            );
        }

        let client = OpenAiClient::new(&config.provider.base_url)?;
        let generation = Arc::new(OpenAiGenerationProvider::new(client.clone()));
        let embeddings = Arc::new(OpenAiEmbeddingProvider::new(
            client,
            &config.provider.embedding_model,
            credentials.clone()
        ));

        let invoker = Arc::new(ResilientInvoker::new(
            generation,
            credentials.clone(),
            &config.invocation
        ));
        let retriever = Arc::new(Retriever::new(Embedder::new(embeddings), &config.retrieval));
        let compressor = Arc::new(Compressor::new(
            invoker.clone(),
            config.compression.clone()
        ));

        info!(
            base_url = %config.provider.base_url,
            credentials = credentials.active_count(),
            max_concurrent = config.scheduler.max_concurrent,
            "Engine ready"
        );

        Ok(Self {
            config,
            credentials,
            invoker,
            retriever,
            compressor
        })
    }

    pub fn scheduler(&self) -> TaskScheduler {
        let executor = GenerationExecutor::new(self.invoker.clone(), &self.config.invocation)
            .with_retriever(self.retriever.clone(), self.config.retrieval.clone())
            .with_compressor(self.compressor.clone());
        TaskScheduler::new(&self.config.scheduler, Arc::new(executor))
    }
}
