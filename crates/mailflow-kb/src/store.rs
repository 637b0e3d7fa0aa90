use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{KbError, Result};

const CHUNKS_FILE: &str = "chunks.jsonl";

/// One embedded chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    /// Source document filename.
    pub source: String,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A scored search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub record: ChunkRecord,
}

/// Dimension-keyed vector store.
///
/// Lives in `db_{dimension}/` under the data root; switching embedding
/// models therefore never mixes vectors of incompatible width. Records are
/// JSON lines on disk and fully resident in memory — knowledge bases here
/// are hundreds of chunks, not millions.
pub struct VectorStore {
    dir: PathBuf,
    dimension: usize,
    records: RwLock<Vec<ChunkRecord>>,
}

impl VectorStore {
    /// `db_{dimension}` directory for a data root.
    pub fn db_dir(base: &Path, dimension: usize) -> PathBuf {
        base.join(format!("db_{}", dimension))
    }

    /// Open (creating if absent) the store for one dimension.
    pub fn open(base: &Path, dimension: usize) -> Result<Self> {
        let dir = Self::db_dir(base, dimension);
        fs::create_dir_all(&dir)?;
        let records = load_records(&dir.join(CHUNKS_FILE), dimension)?;
        info!(dir = %dir.display(), chunks = records.len(), "vector store opened");
        Ok(Self {
            dir,
            dimension,
            records: RwLock::new(records),
        })
    }

    /// Delete any existing directory for this dimension and start empty.
    /// Older-dimension directories are untouched (kept as history).
    pub fn create_clean(base: &Path, dimension: usize) -> Result<Self> {
        let dir = Self::db_dir(base, dimension);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            dimension,
            records: RwLock::new(Vec::new()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a batch of records, persisting them before they become
    /// visible to searches.
    pub fn insert_batch(&self, batch: Vec<ChunkRecord>) -> Result<()> {
        for r in &batch {
            if r.vector.len() != self.dimension {
                return Err(KbError::DimensionMismatch {
                    expected: self.dimension,
                    got: r.vector.len(),
                });
            }
        }
        let path = self.dir.join(CHUNKS_FILE);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        for r in &batch {
            serde_json::to_writer(&mut file, r)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        self.records.write().unwrap().extend(batch);
        Ok(())
    }

    /// Cosine-similarity top-k over all records.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(KbError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        let records = self.records.read().unwrap();
        let mut hits: Vec<SearchHit> = records
            .iter()
            .map(|r| SearchHit {
                score: cosine(query, &r.vector),
                record: r.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn load_records(path: &Path, dimension: usize) -> Result<Vec<ChunkRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChunkRecord>(&line) {
            Ok(r) if r.vector.len() == dimension => records.push(r),
            Ok(r) => {
                warn!(
                    id = %r.id,
                    got = r.vector.len(),
                    expected = dimension,
                    "dropping chunk with mismatched dimension"
                );
            }
            Err(e) => warn!(error = %e, "dropping unreadable chunk line"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            source: "doc.txt".to_string(),
            text: format!("text-{id}"),
            vector,
        }
    }

    #[test]
    fn insert_search_round_trip() {
        let base = tempfile::tempdir().unwrap();
        let store = VectorStore::create_clean(base.path(), 3).unwrap();
        store
            .insert_batch(vec![
                rec("a", vec![1.0, 0.0, 0.0]),
                rec("b", vec![0.0, 1.0, 0.0]),
                rec("c", vec![0.9, 0.1, 0.0]),
            ])
            .unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "a");
        assert_eq!(hits[1].record.id, "c");
    }

    #[test]
    fn reopen_reads_persisted_records() {
        let base = tempfile::tempdir().unwrap();
        {
            let store = VectorStore::create_clean(base.path(), 2).unwrap();
            store.insert_batch(vec![rec("a", vec![1.0, 0.0])]).unwrap();
        }
        let store = VectorStore::open(base.path(), 2).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let store = VectorStore::create_clean(base.path(), 4).unwrap();
        assert!(matches!(
            store.insert_batch(vec![rec("a", vec![1.0, 0.0])]),
            Err(KbError::DimensionMismatch { expected: 4, got: 2 })
        ));
        assert!(store.search(&[1.0], 5).is_err());
    }

    #[test]
    fn create_clean_replaces_same_dimension_only() {
        let base = tempfile::tempdir().unwrap();
        let old = VectorStore::create_clean(base.path(), 2).unwrap();
        old.insert_batch(vec![rec("a", vec![1.0, 0.0])]).unwrap();

        // Rebuild at a new dimension: db_2 stays on disk, db_3 starts empty.
        let new = VectorStore::create_clean(base.path(), 3).unwrap();
        assert_eq!(new.len(), 0);
        assert!(VectorStore::db_dir(base.path(), 2).exists());
        assert!(VectorStore::db_dir(base.path(), 3).exists());

        let reopened = VectorStore::open(base.path(), 2).unwrap();
        assert_eq!(reopened.len(), 1);
    }
}
