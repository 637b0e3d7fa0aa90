//! Category-specialised similarity retrieval.

use std::time::Duration;

use mailflow_core::types::EmailCategory;
use tracing::{debug, warn};

use crate::embed::Embedder;
use crate::error::Result;
use crate::store::VectorStore;

/// Top-k used when no category applies (diagnostics, RAG self-test).
pub const BASE_K: usize = 20;

/// Per-category retrieval depth. Enquiries need broad product coverage,
/// complaints need procedures, feedback needs the related feature notes.
pub fn retriever_k(category: EmailCategory) -> usize {
    match category {
        EmailCategory::ProductEnquiry => 12,
        EmailCategory::CustomerComplaint => 10,
        EmailCategory::CustomerFeedback => 8,
        EmailCategory::Unrelated => BASE_K,
    }
}

/// Embed `query` and return the joined text of the top-k chunks for the
/// category. Transient embedding failures are retried once after 2 s.
pub async fn retrieve_context(
    store: &VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    category: EmailCategory,
) -> Result<String> {
    let k = retriever_k(category);
    let vector = match embedder.embed(&[query.to_string()]).await {
        Ok(mut rows) => rows.pop().unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "query embedding failed; retrying once");
            tokio::time::sleep(Duration::from_secs(2)).await;
            let mut rows = embedder.embed(&[query.to_string()]).await?;
            rows.pop().unwrap_or_default()
        }
    };

    let hits = store.search(&vector, k)?;
    debug!(query, k, hits = hits.len(), "retrieved context chunks");
    if hits.is_empty() {
        return Ok(String::new());
    }
    Ok(hits
        .iter()
        .map(|h| h.record.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkRecord;
    use async_trait::async_trait;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        fn model(&self) -> &str {
            "unit"
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            // Direction keyed off the first character so similarity is
            // deterministic.
            Ok(texts
                .iter()
                .map(|t| {
                    if t.starts_with('价') {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
        async fn dimension(&self) -> Result<usize> {
            Ok(2)
        }
    }

    #[test]
    fn k_values_per_category() {
        assert_eq!(retriever_k(EmailCategory::ProductEnquiry), 12);
        assert_eq!(retriever_k(EmailCategory::CustomerComplaint), 10);
        assert_eq!(retriever_k(EmailCategory::CustomerFeedback), 8);
        assert_eq!(retriever_k(EmailCategory::Unrelated), BASE_K);
    }

    #[tokio::test]
    async fn retrieval_joins_nearest_chunks() {
        let base = tempfile::tempdir().unwrap();
        let store = VectorStore::create_clean(base.path(), 2).unwrap();
        store
            .insert_batch(vec![
                ChunkRecord {
                    id: "p".into(),
                    source: "pricing.txt".into(),
                    text: "基础版每年1万元".into(),
                    vector: vec![1.0, 0.0],
                },
                ChunkRecord {
                    id: "o".into(),
                    source: "other.txt".into(),
                    text: "部署说明".into(),
                    vector: vec![0.0, 1.0],
                },
            ])
            .unwrap();

        let ctx = retrieve_context(&store, &UnitEmbedder, "价格是多少", EmailCategory::ProductEnquiry)
            .await
            .unwrap();
        assert!(ctx.starts_with("基础版每年1万元"));
    }

    #[tokio::test]
    async fn empty_store_yields_empty_context() {
        let base = tempfile::tempdir().unwrap();
        let store = VectorStore::create_clean(base.path(), 2).unwrap();
        let ctx = retrieve_context(&store, &UnitEmbedder, "价格", EmailCategory::CustomerComplaint)
            .await
            .unwrap();
        assert!(ctx.is_empty());
    }
}
