//! Chunk store: durable `cacheKey -> Vec<Chunk>` persistence. The Chunks
//! sub-index must outlive a single refresh call so the Embeddings and
//! Lexical sub-indexes, which run after it in the fixed
//! `{chunks, embeddings, lexical}` order, can read back the chunks produced
//! for a given `cacheKey` without re-chunking. Uses the same hand-rolled
//! length-prefixed binary idiom as `merkle.rs`/`embed/store.rs`, keyed by
//! `cacheKey` rather than by tag — chunks are shared across every tag that
//! references the same content.

use crate::error::{Error, Result};
use crate::model::{Chunk, ChunkKind};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    chunks: BTreeMap<String, Vec<Chunk>>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, cache_key: &str, chunks: Vec<Chunk>) {
        self.chunks.insert(cache_key.to_string(), chunks);
    }

    pub fn remove(&mut self, cache_key: &str) {
        self.chunks.remove(cache_key);
    }

    pub fn get(&self, cache_key: &str) -> Option<&[Chunk]> {
        self.chunks.get(cache_key).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn path_for(root: &Path) -> PathBuf {
        root.join("index").join("chunks").join("store.bin")
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path_for(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| chunk_store_io(format!("{e}")))?;
        }
        let tmp = path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp).map_err(|e| chunk_store_io(format!("{e}")))?;

        write_u32(&mut file, self.chunks.len() as u32)?;
        for (cache_key, chunks) in &self.chunks {
            write_string(&mut file, cache_key)?;
            write_u32(&mut file, chunks.len() as u32)?;
            for chunk in chunks {
                write_chunk(&mut file, chunk)?;
            }
        }
        file.flush().map_err(|e| chunk_store_io(format!("{e}")))?;
        std::fs::rename(&tmp, &path).map_err(|e| chunk_store_io(format!("{e}")))?;
        Ok(())
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path_for(root);
        if !path.exists() {
            return Ok(Self::new());
        }
        let mut file = std::fs::File::open(&path).map_err(|e| chunk_store_io(format!("{e}")))?;
        let count = read_u32(&mut file)?;
        let mut chunks = BTreeMap::new();
        for _ in 0..count {
            let cache_key = read_string(&mut file)?;
            let chunk_count = read_u32(&mut file)?;
            let mut entries = Vec::with_capacity(chunk_count as usize);
            for _ in 0..chunk_count {
                entries.push(read_chunk(&mut file)?);
            }
            chunks.insert(cache_key, entries);
        }
        Ok(Self { chunks })
    }
}

fn chunk_store_io(message: String) -> Error {
    Error::CatalogWrite { message }
}

fn write_chunk(w: &mut impl Write, chunk: &Chunk) -> Result<()> {
    write_string(w, &chunk.digest)?;
    write_u32(w, chunk.index as u32)?;
    write_string(w, &chunk.filepath)?;
    write_string(w, chunk_kind_tag(chunk.kind))?;
    write_u32(w, chunk.start_line as u32)?;
    write_u32(w, chunk.end_line as u32)?;
    write_string(w, &chunk.content)?;
    write_u32(w, chunk.token_estimate as u32)?;
    write_u32(w, chunk.heading_path.len() as u32)?;
    for part in &chunk.heading_path {
        write_string(w, part)?;
    }
    match &chunk.symbol {
        Some(symbol) => {
            write_u32(w, 1)?;
            write_string(w, symbol)?;
        }
        None => write_u32(w, 0)?,
    }
    write_string(w, &chunk.slug)?;
    Ok(())
}

fn read_chunk(r: &mut impl Read) -> Result<Chunk> {
    let digest = read_string(r)?;
    let index = read_u32(r)? as usize;
    let filepath = read_string(r)?;
    let kind = chunk_kind_from_tag(&read_string(r)?);
    let start_line = read_u32(r)? as usize;
    let end_line = read_u32(r)? as usize;
    let content = read_string(r)?;
    let token_estimate = read_u32(r)? as usize;
    let heading_len = read_u32(r)?;
    let mut heading_path = Vec::with_capacity(heading_len as usize);
    for _ in 0..heading_len {
        heading_path.push(read_string(r)?);
    }
    let has_symbol = read_u32(r)?;
    let symbol = if has_symbol == 1 { Some(read_string(r)?) } else { None };
    let slug = read_string(r)?;
    Ok(Chunk {
        digest,
        index,
        filepath,
        kind,
        start_line,
        end_line,
        content,
        token_estimate,
        heading_path,
        symbol,
        slug,
    })
}

fn chunk_kind_tag(kind: ChunkKind) -> &'static str {
    match kind {
        ChunkKind::Markdown => "markdown",
        ChunkKind::Json => "json",
        ChunkKind::Structural => "structural",
        ChunkKind::Html => "html",
        ChunkKind::Text => "text",
        ChunkKind::Image => "image",
        ChunkKind::Unknown => "unknown",
    }
}

fn chunk_kind_from_tag(tag: &str) -> ChunkKind {
    match tag {
        "markdown" => ChunkKind::Markdown,
        "json" => ChunkKind::Json,
        "structural" => ChunkKind::Structural,
        "html" => ChunkKind::Html,
        "image" => ChunkKind::Image,
        "unknown" => ChunkKind::Unknown,
        _ => ChunkKind::Text,
    }
}

fn write_u32(w: &mut impl Write, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes()).map_err(|e| chunk_store_io(format!("{e}")))
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| chunk_store_io(format!("{e}")))?;
    Ok(u32::from_le_bytes(buf))
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes()).map_err(|e| chunk_store_io(format!("{e}")))
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| chunk_store_io(format!("{e}")))?;
    String::from_utf8(buf).map_err(|e| chunk_store_io(format!("{e}")))
}
