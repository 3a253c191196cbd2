//! On-disk vector store, one file per [`EmbeddingSpaceId`] (§4.5: "different
//! providers/models/dimensions never share a store"). Grounded on the
//! teacher's length-prefixed binary persistence idiom already used in
//! `merkle.rs`, rather than pulling in a vector-database crate for what is,
//! at this scale, a flat in-memory index with an on-disk snapshot.

use crate::error::{Error, Result};
use crate::model::{EmbeddingRecord, EmbeddingSpaceId};
use crate::util::cosine_similarity;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct EmbeddingStore {
    space: EmbeddingSpaceId,
    records: BTreeMap<(String, usize), Vec<f32>>,
}

impl EmbeddingStore {
    pub fn new(space: EmbeddingSpaceId) -> Self {
        Self {
            space,
            records: BTreeMap::new(),
        }
    }

    pub fn upsert(&mut self, record: EmbeddingRecord) {
        self.records
            .insert((record.cache_key, record.chunk_index), record.vector);
    }

    pub fn remove_cache_key(&mut self, cache_key: &str) {
        self.records.retain(|(key, _), _| key != cache_key);
    }

    /// Whether any chunk of `cache_key` already has a vector in this space,
    /// used to skip re-embedding content reused via `addTag` (§4.3).
    pub fn has_cache_key(&self, cache_key: &str) -> bool {
        self.records.keys().any(|(key, _)| key == cache_key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cosine top-K over the whole store, optionally restricted to a set of
    /// allowed cache keys (tag filtering happens one layer up, in the
    /// retrieval pipeline, which resolves a tag to its member cache keys).
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        allowed_cache_keys: Option<&std::collections::HashSet<String>>,
    ) -> Vec<(String, usize, f32)> {
        let mut scored: Vec<(String, usize, f32)> = self
            .records
            .iter()
            .filter(|((cache_key, _), _)| {
                allowed_cache_keys.map(|set| set.contains(cache_key)).unwrap_or(true)
            })
            .map(|((cache_key, chunk_index), vector)| {
                (cache_key.clone(), *chunk_index, cosine_similarity(query, vector))
            })
            .collect();
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn path_for(root: &Path, space: &EmbeddingSpaceId) -> PathBuf {
        root.join("index").join("embeddings").join(space.store_dir_name()).join("vectors.bin")
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path_for(root, &self.space);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| store_err(format!("{source}")))?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp).map_err(|e| store_err(format!("{e}")))?;
        write_u32(&mut file, self.records.len() as u32)?;
        for ((cache_key, chunk_index), vector) in &self.records {
            write_string(&mut file, cache_key)?;
            write_u32(&mut file, *chunk_index as u32)?;
            write_u32(&mut file, vector.len() as u32)?;
            for v in vector {
                file.write_all(&v.to_le_bytes()).map_err(|e| store_err(format!("{e}")))?;
            }
        }
        file.flush().map_err(|e| store_err(format!("{e}")))?;
        std::fs::rename(&tmp, &path).map_err(|e| store_err(format!("{e}")))?;
        Ok(())
    }

    pub fn load(root: &Path, space: EmbeddingSpaceId) -> Result<Self> {
        let path = Self::path_for(root, &space);
        if !path.exists() {
            return Ok(Self::new(space));
        }
        let mut file = std::fs::File::open(&path).map_err(|e| store_err(format!("{e}")))?;
        let count = read_u32(&mut file)?;
        let mut records = BTreeMap::new();
        for _ in 0..count {
            let cache_key = read_string(&mut file)?;
            let chunk_index = read_u32(&mut file)? as usize;
            let dim = read_u32(&mut file)? as usize;
            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                let mut buf = [0u8; 4];
                file.read_exact(&mut buf).map_err(|e| store_err(format!("{e}")))?;
                vector.push(f32::from_le_bytes(buf));
            }
            records.insert((cache_key, chunk_index), vector);
        }
        Ok(Self { space, records })
    }
}

fn store_err(message: String) -> Error {
    Error::CatalogWrite { message }
}

fn write_u32(w: &mut impl Write, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes()).map_err(|e| store_err(format!("{e}")))
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| store_err(format!("{e}")))?;
    Ok(u32::from_le_bytes(buf))
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes()).map_err(|e| store_err(format!("{e}")))
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| store_err(format!("{e}")))?;
    String::from_utf8(buf).map_err(|e| store_err(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> EmbeddingSpaceId {
        EmbeddingSpaceId {
            provider_id: "hashing".into(),
            model: "hash-v1".into(),
            dim: 4,
        }
    }

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let mut store = EmbeddingStore::new(space());
        store.upsert(EmbeddingRecord {
            cache_key: "a".into(),
            chunk_index: 0,
            vector: vec![1.0, 0.0, 0.0, 0.0],
        });
        store.upsert(EmbeddingRecord {
            cache_key: "b".into(),
            chunk_index: 0,
            vector: vec![0.0, 1.0, 0.0, 0.0],
        });
        let results = store.search(&[1.0, 0.0, 0.0, 0.0], 2, None);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn save_and_load_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let mut store = EmbeddingStore::new(space());
        store.upsert(EmbeddingRecord {
            cache_key: "a".into(),
            chunk_index: 0,
            vector: vec![1.0, 2.0, 3.0, 4.0],
        });
        store.save(temp.path()).unwrap();
        let loaded = EmbeddingStore::load(temp.path(), space()).unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
