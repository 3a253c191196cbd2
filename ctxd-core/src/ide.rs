//! IDE/filesystem collaborator contract (§6). No teacher counterpart — the
//! teacher's CLI/MCP front-ends read files directly off disk with no
//! pluggable host. This trait is the seam the spec names explicitly so an
//! embedding host (editor extension, MCP client) can supply its own file
//! access and navigation instead of the crate reaching for `std::fs` and a
//! hardcoded goto-definition implementation.

use crate::error::Result;
use crate::model::{ArtifactKind, DefinitionLocation, Tag};
use async_trait::async_trait;

/// A callback invoked with the newly active file path (`None` if no file is
/// active), registered via [`IdeCollaborator::on_active_text_editor_changed`].
pub type ActiveFileCallback = Box<dyn Fn(Option<String>) + Send + Sync>;

/// Everything the core needs from its host environment (§6): file access,
/// workspace enumeration, catalog tag lookup and definition navigation.
/// A local CLI/MCP front-end implements this directly over `std::fs` and the
/// `CatalogStore`; an editor extension would implement it over its own
/// buffers and language server.
#[async_trait]
pub trait IdeCollaborator: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn read_range_in_file(&self, path: &str, start_line: usize, end_line: usize) -> Result<String>;

    fn workspace_dirs(&self) -> Vec<String>;

    async fn tags(&self, artifact_id: ArtifactKind) -> Result<Vec<Tag>>;

    /// Resolves a definition location to zero or more concrete locations
    /// (zero if the host's navigation index has no answer).
    async fn goto_definition(&self, location: &DefinitionLocation) -> Result<Vec<DefinitionLocation>>;

    fn current_file(&self) -> Option<String>;

    fn on_active_text_editor_changed(&self, callback: ActiveFileCallback);
}

/// A filesystem-backed collaborator for local CLI/MCP use: `read_file`/
/// `read_range_in_file` go straight to disk, `goto_definition` always
/// returns empty (no language server behind it), and the active-file slot is
/// a simple `Mutex`-guarded cell set by the caller.
pub struct LocalCollaborator {
    workspace_dirs: Vec<String>,
    current_file: std::sync::Mutex<Option<String>>,
}

impl LocalCollaborator {
    pub fn new(workspace_dirs: Vec<String>) -> Self {
        Self {
            workspace_dirs,
            current_file: std::sync::Mutex::new(None),
        }
    }

    pub fn set_current_file(&self, path: Option<String>) {
        *self.current_file.lock().expect("current_file mutex poisoned") = path;
    }
}

#[async_trait]
impl IdeCollaborator for LocalCollaborator {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| crate::error::Error::CatalogRead { message: format!("{path}: {e}") })
    }

    async fn read_range_in_file(&self, path: &str, start_line: usize, end_line: usize) -> Result<String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::CatalogRead { message: format!("{path}: {e}") })?;
        let lines: Vec<&str> = text.lines().collect();
        let start = start_line.saturating_sub(1).min(lines.len());
        let end = end_line.min(lines.len());
        Ok(lines[start..end].join("\n"))
    }

    fn workspace_dirs(&self) -> Vec<String> {
        self.workspace_dirs.clone()
    }

    async fn tags(&self, _artifact_id: ArtifactKind) -> Result<Vec<Tag>> {
        Ok(Vec::new())
    }

    async fn goto_definition(&self, _location: &DefinitionLocation) -> Result<Vec<DefinitionLocation>> {
        Ok(Vec::new())
    }

    fn current_file(&self) -> Option<String> {
        self.current_file.lock().expect("current_file mutex poisoned").clone()
    }

    fn on_active_text_editor_changed(&self, callback: ActiveFileCallback) {
        callback(self.current_file());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_collaborator_reads_a_line_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();
        let collaborator = LocalCollaborator::new(vec![dir.path().to_string_lossy().to_string()]);
        let range = collaborator.read_range_in_file(path.to_str().unwrap(), 2, 3).await.unwrap();
        assert_eq!(range, "two\nthree");
    }

    #[test]
    fn current_file_tracks_the_last_set_value() {
        let collaborator = LocalCollaborator::new(Vec::new());
        assert_eq!(collaborator.current_file(), None);
        collaborator.set_current_file(Some("a.rs".to_string()));
        assert_eq!(collaborator.current_file(), Some("a.rs".to_string()));
    }
}
