use async_trait::async_trait;
use mailflow_llm::client::EmbeddingClient;
use mailflow_llm::models::dimension_from_model_name;
use tracing::info;

use crate::error::Result;

/// Embedding source for indexing and retrieval. A trait so tests can use a
/// deterministic stub instead of the network.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality: model-name pattern when recognised, otherwise
    /// a probe embedding.
    async fn dimension(&self) -> Result<usize>;
}

/// Production embedder over the OpenAI-compatible embeddings endpoint.
pub struct ApiEmbedder {
    client: EmbeddingClient,
}

impl ApiEmbedder {
    pub fn new(client: EmbeddingClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    fn model(&self) -> &str {
        self.client.model()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.client.embed(texts).await?)
    }

    async fn dimension(&self) -> Result<usize> {
        if let Some(dim) = dimension_from_model_name(self.client.model()) {
            info!(model = %self.client.model(), dim, "dimension inferred from model name");
            return Ok(dim);
        }
        let dim = self.client.probe_dimension().await?;
        info!(model = %self.client.model(), dim, "dimension detected via probe embedding");
        Ok(dim)
    }
}
