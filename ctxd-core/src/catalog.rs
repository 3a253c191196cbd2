//! Catalog Store: a transactional tag/path/cacheKey ledger backed by a
//! `rusqlite` connection driven from async callers via
//! `tokio::task::spawn_blocking`, sha256-keyed change detection, and
//! `#[tokio::test]` integration-style coverage.

use crate::error::{Error, Result};
use crate::model::{ArtifactKind, CatalogPlan, MarkKind, PlanItem, Tag};
use crate::util::sha256_hex;
use crate::walker::FileMap;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A handle to the on-disk catalog. Acquired once at process startup and
/// shared by reference — never a global singleton.
#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::CatalogWrite {
                message: format!("failed to create {}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| Error::CatalogRead {
            message: format!("failed to open {}: {e}", path.display()),
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::CatalogWrite { message: e.to_string() })?;
        init_schema(&conn)?;
        dedupe_on_open(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::CatalogRead {
            message: e.to_string(),
        })?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("catalog connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| Error::CatalogRead {
            message: format!("catalog task panicked: {e}"),
        })?
    }

    /// The core planner. Never mutates state: repeated invocation without
    /// `mark_complete` yields identical output.
    pub async fn plan(
        &self,
        tag: Tag,
        current_files: FileMap,
        read_and_hash: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Result<CatalogPlan> {
        self.with_conn(move |conn| plan_sync(conn, &tag, &current_files, &read_and_hash))
            .await
    }

    /// Applied after a sub-indexer has durably written/removed artifacts;
    /// commits or leaves state unchanged. Idempotent: repeated calls with
    /// the same arguments are a no-op.
    pub async fn mark_complete(&self, items: Vec<PlanItem>, kind: MarkKind) -> Result<()> {
        self.with_conn(move |conn| mark_complete_sync(conn, &items, kind))
            .await
    }

    /// The set of `cacheKey`s currently tagged under `tag` — used by the
    /// Retrieval Pipeline to restrict vector/lexical candidates to content
    /// still reachable from this tag, by joining against the catalog's
    /// `(cacheKey, tag)` set.
    pub async fn cache_keys_for_tag(&self, tag: Tag) -> Result<std::collections::HashSet<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT cache_key FROM tag_catalog WHERE dir = ?1 AND branch = ?2 AND artifact_id = ?3",
                )
                .map_err(read_err)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![tag.dir, tag.branch, tag.artifact_kind.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .map_err(read_err)?;
            let mut out = std::collections::HashSet::new();
            for row in rows {
                out.insert(row.map_err(read_err)?);
            }
            Ok(out)
        })
        .await
    }

    /// Returns one `(path, lastUpdated)` currently tagged with `cache_key`
    /// under `tag`, for rendering a retrieval hit and computing its
    /// recency boost. A `cacheKey` may have several paths under one tag
    /// (hard links / duplicate content); any one is a valid representative.
    pub async fn path_for_cache_key(&self, tag: Tag, cache_key: String) -> Result<Option<(String, i64)>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT path, last_updated FROM tag_catalog
                 WHERE dir = ?1 AND branch = ?2 AND artifact_id = ?3 AND cache_key = ?4
                 LIMIT 1",
                rusqlite::params![tag.dir, tag.branch, tag.artifact_kind.as_str(), cache_key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(read_err)
        })
        .await
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT dir, branch, artifact_id FROM tag_catalog")
                .map_err(read_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let dir: String = row.get(0)?;
                    let branch: String = row.get(1)?;
                    let artifact_id: String = row.get(2)?;
                    Ok((dir, branch, artifact_id))
                })
                .map_err(read_err)?;
            let mut tags = Vec::new();
            for row in rows {
                let (dir, branch, artifact_id) = row.map_err(read_err)?;
                tags.push(Tag::new(dir, branch, parse_artifact_kind(&artifact_id)));
            }
            Ok(tags)
        })
        .await
    }
}

fn read_err(e: impl std::fmt::Display) -> Error {
    Error::CatalogRead { message: e.to_string() }
}

fn write_err(e: impl std::fmt::Display) -> Error {
    Error::CatalogWrite { message: e.to_string() }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tag_catalog (
            dir TEXT NOT NULL,
            branch TEXT NOT NULL,
            artifact_id TEXT NOT NULL,
            path TEXT NOT NULL,
            cache_key TEXT NOT NULL,
            last_updated INTEGER NOT NULL,
            UNIQUE(dir, branch, artifact_id, path, cache_key)
        );
        CREATE TABLE IF NOT EXISTS global_cache (
            cache_key TEXT NOT NULL,
            dir TEXT NOT NULL,
            branch TEXT NOT NULL,
            artifact_id TEXT NOT NULL,
            UNIQUE(cache_key, dir, branch, artifact_id)
        );
        CREATE INDEX IF NOT EXISTS idx_tag_catalog_tag_path
            ON tag_catalog(dir, branch, artifact_id, path);
        CREATE INDEX IF NOT EXISTS idx_global_cache_key
            ON global_cache(cache_key, dir, branch, artifact_id);
        ",
    )
    .map_err(write_err)
}

/// Duplicate rows from earlier corrupt states are removed on open.
fn dedupe_on_open(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        DELETE FROM tag_catalog WHERE rowid NOT IN (
            SELECT MIN(rowid) FROM tag_catalog
            GROUP BY dir, branch, artifact_id, path, cache_key
        );
        DELETE FROM global_cache WHERE rowid NOT IN (
            SELECT MIN(rowid) FROM global_cache
            GROUP BY cache_key, dir, branch, artifact_id
        );
        ",
    )
    .map_err(write_err)
}

fn parse_artifact_kind(s: &str) -> ArtifactKind {
    match s {
        "embeddings" => ArtifactKind::Embeddings,
        "lexical" => ArtifactKind::Lexical,
        "globalCache" => ArtifactKind::GlobalCache,
        _ => ArtifactKind::Chunks,
    }
}

fn plan_sync(
    conn: &Connection,
    tag: &Tag,
    current_files: &FileMap,
    read_and_hash: &(impl Fn(&str) -> Result<String> + Send + Sync),
) -> Result<CatalogPlan> {
    let mut stmt = conn
        .prepare(
            "SELECT path, cache_key, last_updated FROM tag_catalog
             WHERE dir = ?1 AND branch = ?2 AND artifact_id = ?3",
        )
        .map_err(read_err)?;
    let rows = stmt
        .query_map(
            rusqlite::params![tag.dir, tag.branch, tag.artifact_kind.as_str()],
            |row| {
                let path: String = row.get(0)?;
                let cache_key: String = row.get(1)?;
                let last_updated: i64 = row.get(2)?;
                Ok((path, cache_key, last_updated))
            },
        )
        .map_err(read_err)?;

    let mut saved = Vec::new();
    for row in rows {
        saved.push(row.map_err(read_err)?);
    }
    let saved_paths: std::collections::HashSet<&str> =
        saved.iter().map(|(p, _, _)| p.as_str()).collect();

    let mut add_new = Vec::new(); // (path, cache_key)
    let mut update_new = Vec::new(); // (path, new_cache_key)
    let mut update_old = Vec::new(); // (path, old_cache_key)
    let mut remove = Vec::new(); // (path, cache_key)
    let mut stale = Vec::new(); // (path, cache_key) unchanged, just refresh timestamp

    for (path, cache_key, last_updated) in &saved {
        match current_files.get(path.as_str()) {
            None => remove.push((path.clone(), cache_key.clone())),
            Some(&mtime_ms) => {
                // Equal timestamps are treated as "no change".
                if (*last_updated as u64) < mtime_ms {
                    let new_hash = read_and_hash(path)?;
                    if &new_hash != cache_key {
                        update_new.push((path.clone(), new_hash));
                        update_old.push((path.clone(), cache_key.clone()));
                    } else {
                        stale.push((path.clone(), cache_key.clone()));
                    }
                } else {
                    stale.push((path.clone(), cache_key.clone()));
                }
            }
        }
    }

    for path in current_files.keys() {
        if !saved_paths.contains(path.as_str()) {
            let hash = read_and_hash(path)?;
            add_new.push((path.clone(), hash));
        }
    }

    let mut compute = Vec::new();
    let mut add_tag = Vec::new();
    for (path, cache_key) in add_new.into_iter().chain(update_new) {
        if global_cache_has(conn, &cache_key, tag)? {
            add_tag.push(PlanItem { tag: tag.clone(), path, cache_key });
        } else {
            compute.push(PlanItem { tag: tag.clone(), path, cache_key });
        }
    }

    let mut remove_tag = Vec::new();
    let mut del = Vec::new();
    for (path, cache_key) in remove.into_iter().chain(update_old) {
        if global_cache_has_other_tag(conn, &cache_key, tag)? {
            remove_tag.push(PlanItem { tag: tag.clone(), path, cache_key });
        } else {
            del.push(PlanItem { tag: tag.clone(), path, cache_key });
        }
    }

    let stale = stale
        .into_iter()
        .map(|(path, cache_key)| PlanItem { tag: tag.clone(), path, cache_key })
        .collect();

    Ok(CatalogPlan {
        compute,
        del,
        add_tag,
        remove_tag,
        stale,
    })
}

/// "already appears in the global cache for this `artifactKind`" (§4.3) is
/// scoped to `artifact_id` only — any tag (any dir/branch) already holding
/// this `cacheKey` for this artifact kind means the artifact can be reused
/// via `addTag` instead of recomputed. Scoping this to the exact `tag` would
/// make `addTag` unreachable for a brand-new `(dir, branch, path)` row, since
/// that exact tag never already has a global_cache entry for content it is
/// only now adding.
fn global_cache_has(conn: &Connection, cache_key: &str, tag: &Tag) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM global_cache WHERE cache_key = ?1 AND artifact_id = ?2",
            rusqlite::params![cache_key, tag.artifact_kind.as_str()],
            |row| row.get(0),
        )
        .map_err(read_err)?;
    Ok(count > 0)
}

fn global_cache_has_other_tag(conn: &Connection, cache_key: &str, tag: &Tag) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM global_cache WHERE cache_key = ?1
             AND NOT (dir = ?2 AND branch = ?3 AND artifact_id = ?4)",
            rusqlite::params![cache_key, tag.dir, tag.branch, tag.artifact_kind.as_str()],
            |row| row.get(0),
        )
        .map_err(read_err)?;
    Ok(count > 0)
}

fn mark_complete_sync(conn: &Connection, items: &[PlanItem], kind: MarkKind) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let now = now_millis();
    let tx = conn.unchecked_transaction().map_err(write_err)?;

    for item in items {
        let artifact_id = item.tag.artifact_kind.as_str();
        match kind {
            MarkKind::Compute | MarkKind::AddTag => {
                tx.execute(
                    "INSERT OR REPLACE INTO tag_catalog (dir, branch, artifact_id, path, cache_key, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![item.tag.dir, item.tag.branch, artifact_id, item.path, item.cache_key, now],
                )
                .map_err(write_err)?;
                tx.execute(
                    "INSERT OR IGNORE INTO global_cache (cache_key, dir, branch, artifact_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![item.cache_key, item.tag.dir, item.tag.branch, artifact_id],
                )
                .map_err(write_err)?;
            }
            MarkKind::UpdateLastUpdated => {
                tx.execute(
                    "UPDATE tag_catalog SET last_updated = ?1
                     WHERE dir = ?2 AND branch = ?3 AND artifact_id = ?4 AND path = ?5 AND cache_key = ?6",
                    rusqlite::params![now, item.tag.dir, item.tag.branch, artifact_id, item.path, item.cache_key],
                )
                .map_err(write_err)?;
            }
            MarkKind::RemoveTag | MarkKind::Del => {
                tx.execute(
                    "DELETE FROM tag_catalog
                     WHERE dir = ?1 AND branch = ?2 AND artifact_id = ?3 AND path = ?4 AND cache_key = ?5",
                    rusqlite::params![item.tag.dir, item.tag.branch, artifact_id, item.path, item.cache_key],
                )
                .map_err(write_err)?;

                let remaining: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM tag_catalog
                         WHERE dir = ?1 AND branch = ?2 AND artifact_id = ?3 AND cache_key = ?4",
                        rusqlite::params![item.tag.dir, item.tag.branch, artifact_id, item.cache_key],
                        |row| row.get(0),
                    )
                    .map_err(write_err)?;
                if remaining == 0 {
                    tx.execute(
                        "DELETE FROM global_cache
                         WHERE cache_key = ?1 AND dir = ?2 AND branch = ?3 AND artifact_id = ?4",
                        rusqlite::params![item.cache_key, item.tag.dir, item.tag.branch, artifact_id],
                    )
                    .map_err(write_err)?;
                }
            }
        }
    }

    tx.commit().map_err(write_err)?;
    Ok(())
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactKind;

    fn tag(dir: &str, branch: &str) -> Tag {
        Tag::new(dir, branch, ArtifactKind::Chunks)
    }

    fn hasher(content: &str) -> impl Fn(&str) -> Result<String> + Send + Sync + 'static {
        let hash = sha256_hex(content.as_bytes());
        move |_path: &str| Ok(hash.clone())
    }

    #[tokio::test]
    async fn empty_workspace_plans_nothing() {
        let store = CatalogStore::open_in_memory().unwrap();
        let plan = store
            .plan(tag("ws", "main"), FileMap::new(), hasher(""))
            .await
            .unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn single_file_add_stages_compute() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), 1000);

        let plan = store
            .plan(tag("ws", "main"), files, hasher("hello\nworld\n"))
            .await
            .unwrap();
        assert_eq!(plan.compute.len(), 1);
        assert_eq!(plan.compute[0].path, "a.txt");
        assert!(plan.del.is_empty());
    }

    #[tokio::test]
    async fn plan_is_pure_without_mark_complete() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), 1000);

        let plan1 = store
            .plan(tag("ws", "main"), files.clone(), hasher("x"))
            .await
            .unwrap();
        let plan2 = store.plan(tag("ws", "main"), files, hasher("x")).await.unwrap();
        assert_eq!(plan1.compute.len(), plan2.compute.len());
        assert_eq!(plan1.compute[0].cache_key, plan2.compute[0].cache_key);
    }

    #[tokio::test]
    async fn rerun_after_mark_complete_is_stable() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), 1000);

        let plan = store
            .plan(tag("ws", "main"), files.clone(), hasher("x"))
            .await
            .unwrap();
        store
            .mark_complete(plan.compute.clone(), MarkKind::Compute)
            .await
            .unwrap();

        let plan2 = store.plan(tag("ws", "main"), files, hasher("x")).await.unwrap();
        assert!(plan2.compute.is_empty());
        assert!(plan2.del.is_empty());
        assert!(plan2.add_tag.is_empty());
        assert_eq!(plan2.stale.len(), 1);
    }

    #[tokio::test]
    async fn rename_without_content_change_yields_remove_and_add_tag() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), 1000);
        let t = tag("ws", "main");

        let plan = store.plan(t.clone(), files, hasher("x")).await.unwrap();
        store.mark_complete(plan.compute, MarkKind::Compute).await.unwrap();

        let mut renamed = FileMap::new();
        renamed.insert("b.txt".to_string(), 2000);
        let plan2 = store.plan(t, renamed, hasher("x")).await.unwrap();

        assert_eq!(plan2.del.len(), 1);
        assert_eq!(plan2.del[0].path, "a.txt");
        assert_eq!(plan2.compute.len(), 1);
        assert_eq!(plan2.compute[0].path, "b.txt");
    }

    #[tokio::test]
    async fn branch_switch_with_shared_content_reuses_artifact() {
        let store = CatalogStore::open_in_memory().unwrap();
        let b1 = tag("ws", "b1");
        let b2 = tag("ws", "b2");

        let mut b1_files = FileMap::new();
        b1_files.insert("a.txt".to_string(), 1000);
        let plan_b1 = store.plan(b1.clone(), b1_files, hasher("x")).await.unwrap();
        store.mark_complete(plan_b1.compute, MarkKind::Compute).await.unwrap();

        let mut b2_files = FileMap::new();
        b2_files.insert("a.txt".to_string(), 1000);
        b2_files.insert("c.txt".to_string(), 1000);
        let plan_b2 = store.plan(b2.clone(), b2_files, move |p: &str| {
            if p == "a.txt" {
                Ok(sha256_hex(b"x"))
            } else {
                Ok(sha256_hex(b"y"))
            }
        })
        .await
        .unwrap();

        assert_eq!(plan_b2.add_tag.len(), 1);
        assert_eq!(plan_b2.add_tag[0].path, "a.txt");
        assert_eq!(plan_b2.compute.len(), 1);
        assert_eq!(plan_b2.compute[0].path, "c.txt");

        store.mark_complete(plan_b2.add_tag, MarkKind::AddTag).await.unwrap();
        store.mark_complete(plan_b2.compute, MarkKind::Compute).await.unwrap();

        // Deleting b1's rows should not remove the shared artifact: b2 still references it.
        let plan_b1_empty = store.plan(b1.clone(), FileMap::new(), hasher("x")).await.unwrap();
        assert_eq!(plan_b1_empty.remove_tag.len(), 1);
        store
            .mark_complete(plan_b1_empty.remove_tag, MarkKind::RemoveTag)
            .await
            .unwrap();

        assert!(global_cache_has(&store.conn.lock().unwrap(), &sha256_hex(b"x"), &b2).unwrap());
    }

    #[tokio::test]
    async fn cache_keys_for_tag_reflects_committed_rows() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), 1000);
        let t = tag("ws", "main");
        let plan = store.plan(t.clone(), files, hasher("x")).await.unwrap();
        store.mark_complete(plan.compute, MarkKind::Compute).await.unwrap();

        let keys = store.cache_keys_for_tag(t).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&sha256_hex(b"x")));
    }

    #[tokio::test]
    async fn path_for_cache_key_finds_a_representative_path() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), 1000);
        let t = tag("ws", "main");
        let plan = store.plan(t.clone(), files, hasher("x")).await.unwrap();
        store.mark_complete(plan.compute, MarkKind::Compute).await.unwrap();

        let found = store.path_for_cache_key(t, sha256_hex(b"x")).await.unwrap();
        assert_eq!(found.unwrap().0, "a.txt");
    }

    #[tokio::test]
    async fn mark_complete_is_idempotent() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), 1000);
        let plan = store.plan(tag("ws", "main"), files, hasher("x")).await.unwrap();

        store.mark_complete(plan.compute.clone(), MarkKind::Compute).await.unwrap();
        store.mark_complete(plan.compute, MarkKind::Compute).await.unwrap();

        let tags = store.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
    }
}
