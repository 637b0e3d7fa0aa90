//! Knowledge-base index building.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::chunker;
use crate::embed::Embedder;
use crate::error::{KbError, Result};
use crate::store::{ChunkRecord, VectorStore};

/// Document extensions eligible for indexing.
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["txt", "md"];

const EMBED_BATCH: usize = 16;

/// Result of a successful index build.
#[derive(Debug)]
pub struct IndexOutcome {
    pub db_path: PathBuf,
    pub dimension: usize,
    pub chunks: usize,
}

/// A chunk paired with its source document, pre-embedding.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub source: String,
    pub text: String,
}

/// List indexable documents in the knowledge directory.
pub fn list_documents(knowledge_dir: &Path) -> Result<Vec<String>> {
    if !knowledge_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(knowledge_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| has_allowed_extension(name))
        .collect();
    names.sort();
    Ok(names)
}

/// Remove one document from the knowledge directory. The index keeps its
/// chunks until the next rebuild.
pub fn delete_document(knowledge_dir: &Path, name: &str) -> Result<()> {
    // Reject path traversal in client-supplied names.
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(KbError::DocumentNotFound(name.to_string()));
    }
    let path = knowledge_dir.join(name);
    if !path.is_file() {
        return Err(KbError::DocumentNotFound(name.to_string()));
    }
    fs::remove_file(path)?;
    Ok(())
}

/// Load and chunk all documents (or one specific file).
///
/// Files are read as UTF-8 first; undecodable files fall back to a lossy
/// decode rather than being skipped — knowledge bases accumulate odd
/// encodings from exports.
pub fn load_document_chunks(
    knowledge_dir: &Path,
    specific_file: Option<&str>,
) -> Result<Vec<DocumentChunk>> {
    let names: Vec<String> = match specific_file {
        Some(name) => {
            if !has_allowed_extension(name) || !knowledge_dir.join(name).is_file() {
                return Err(KbError::DocumentNotFound(name.to_string()));
            }
            vec![name.to_string()]
        }
        None => list_documents(knowledge_dir)?,
    };

    let mut chunks = Vec::new();
    for name in names {
        let path = knowledge_dir.join(&name);
        let text = match fs::read(&path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!(file = %name, "non-UTF-8 document; decoding lossily");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            },
            Err(e) => {
                warn!(file = %name, error = %e, "unreadable document skipped");
                continue;
            }
        };
        let file_chunks = chunker::split_text(&text);
        info!(file = %name, chunks = file_chunks.len(), "document chunked");
        chunks.extend(file_chunks.into_iter().map(|text| DocumentChunk {
            source: name.clone(),
            text,
        }));
    }
    Ok(chunks)
}

/// Build (or rebuild) the index for the embedder's dimension.
///
/// The `db_{dim}` directory is deleted and recreated; stores for other
/// dimensions are left in place. Embedding runs in batches; if a batch
/// fails, its chunks are retried one by one so a single bad chunk cannot
/// sink the build.
pub async fn build_index(
    embedder: &dyn Embedder,
    base_dir: &Path,
    knowledge_dir: &Path,
    specific_file: Option<&str>,
) -> Result<IndexOutcome> {
    let chunks = load_document_chunks(knowledge_dir, specific_file)?;
    if chunks.is_empty() {
        return Err(KbError::NoDocuments);
    }

    let dimension = embedder.dimension().await?;
    let store = VectorStore::create_clean(base_dir, dimension)?;
    info!(
        dim = dimension,
        chunks = chunks.len(),
        dir = %store.dir().display(),
        "building index"
    );

    let mut inserted = 0usize;
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) => {
                let records = batch
                    .iter()
                    .zip(vectors)
                    .map(|(c, vector)| ChunkRecord {
                        id: Uuid::new_v4().to_string(),
                        source: c.source.clone(),
                        text: c.text.clone(),
                        vector,
                    })
                    .collect();
                store.insert_batch(records)?;
                inserted += batch.len();
            }
            Err(e) => {
                warn!(error = %e, "batch embedding failed; retrying chunks sequentially");
                for c in batch {
                    match embedder.embed(&[c.text.clone()]).await {
                        Ok(mut vectors) => {
                            let Some(vector) = vectors.pop() else { continue };
                            store.insert_batch(vec![ChunkRecord {
                                id: Uuid::new_v4().to_string(),
                                source: c.source.clone(),
                                text: c.text.clone(),
                                vector,
                            }])?;
                            inserted += 1;
                        }
                        Err(e) => {
                            warn!(source = %c.source, error = %e, "chunk embedding failed; skipped");
                        }
                    }
                }
            }
        }
    }

    info!(inserted, "index build complete");
    Ok(IndexOutcome {
        db_path: store.dir().to_path_buf(),
        dimension,
        chunks: inserted,
    })
}

fn has_allowed_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder: a fixed dimension, vector derived from text
    /// length. `fail_first_batches` makes leading batch calls fail to
    /// exercise the sequential retry path.
    struct StubEmbedder {
        dim: usize,
        batch_calls: AtomicUsize,
        fail_first_batches: usize,
    }

    impl StubEmbedder {
        fn new(dim: usize) -> Self {
            Self {
                dim,
                batch_calls: AtomicUsize::new(0),
                fail_first_batches: 0,
            }
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model(&self) -> &str {
            "stub"
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.len() > 1 {
                let n = self.batch_calls.fetch_add(1, Ordering::SeqCst);
                if n < self.fail_first_batches {
                    return Err(KbError::DocumentNotFound("injected".into()));
                }
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dim];
                    v[0] = t.chars().count() as f32;
                    v
                })
                .collect())
        }
        async fn dimension(&self) -> Result<usize> {
            Ok(self.dim)
        }
    }

    fn write_docs(dir: &Path) {
        fs::write(dir.join("faq.txt"), "企服通是什么？企服通是企业数字化服务平台。").unwrap();
        fs::write(dir.join("pricing.md"), "基础版每年1万元。标准版每年3万元。").unwrap();
        fs::write(dir.join("ignore.pdf"), b"binary").unwrap();
    }

    #[test]
    fn list_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        let names = list_documents(dir.path()).unwrap();
        assert_eq!(names, vec!["faq.txt".to_string(), "pricing.md".to_string()]);
    }

    #[test]
    fn delete_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        assert!(delete_document(dir.path(), "../faq.txt").is_err());
        delete_document(dir.path(), "faq.txt").unwrap();
        assert!(!dir.path().join("faq.txt").exists());
    }

    #[tokio::test]
    async fn build_creates_dimension_keyed_store() {
        let kb = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(kb.path());

        let outcome = build_index(&StubEmbedder::new(4), data.path(), kb.path(), None)
            .await
            .unwrap();
        assert_eq!(outcome.dimension, 4);
        assert!(outcome.chunks >= 2);
        assert!(data.path().join("db_4").exists());

        let store = VectorStore::open(data.path(), 4).unwrap();
        assert_eq!(store.len(), outcome.chunks);
    }

    #[tokio::test]
    async fn rebuild_at_new_dimension_keeps_old_directory() {
        let kb = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(kb.path());

        build_index(&StubEmbedder::new(2560), data.path(), kb.path(), None)
            .await
            .unwrap();
        build_index(&StubEmbedder::new(4096), data.path(), kb.path(), None)
            .await
            .unwrap();

        assert!(data.path().join("db_2560").exists());
        assert!(data.path().join("db_4096").exists());
    }

    #[tokio::test]
    async fn batch_failure_falls_back_to_sequential() {
        let kb = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(kb.path());

        let embedder = StubEmbedder {
            dim: 3,
            batch_calls: AtomicUsize::new(0),
            fail_first_batches: 10, // every batch call fails
        };
        let outcome = build_index(&embedder, data.path(), kb.path(), None)
            .await
            .unwrap();
        assert!(outcome.chunks >= 2, "sequential retry should still index");
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() {
        let kb = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let err = build_index(&StubEmbedder::new(2), data.path(), kb.path(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "没有找到可索引的文档");
    }
}
