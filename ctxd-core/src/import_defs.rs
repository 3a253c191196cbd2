//! Import-Definitions Service (C9, §4.9). No teacher counterpart at all —
//! grounded on the teacher's `handlers/cache.rs` `DynamicCache` for the LRU
//! shape (`lru::LruCache` keyed by path, fixed capacity, strict-LRU
//! eviction) and on `chunk/structural.rs`'s extension-to-language mapping
//! for per-language import syntax. Parses a file's import statements with a
//! lightweight per-language scanner (not a full AST, since the spec only
//! asks for a `name`/`source_module` pair per import, not sibling syntax
//! tree nodes), resolves each to zero or more definitions through the
//! host-supplied [`IdeCollaborator::goto_definition`], reads the target
//! range back, and caches the result.

use crate::error::Result;
use crate::ide::IdeCollaborator;
use crate::model::{DefinitionLocation, ImportedSymbol, ResolvedImport};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const DEFAULT_CAPACITY: usize = 10;

/// Resolves and caches a file's imports against an [`IdeCollaborator`]
/// (§4.9: "Cache is an LRU of fixed capacity N (default 10) keyed by file
/// path; eviction is strict LRU").
pub struct ImportResolver<I: IdeCollaborator> {
    ide: Arc<I>,
    cache: Mutex<LruCache<String, Vec<ResolvedImport>>>,
}

impl<I: IdeCollaborator + 'static> ImportResolver<I> {
    pub fn new(ide: Arc<I>) -> Self {
        Self::with_capacity(ide, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ide: Arc<I>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            ide,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolves every import in `path`, serving from cache on a hit and
    /// refreshing LRU order either way.
    pub async fn resolve_for_file(&self, path: &str) -> Result<Vec<ResolvedImport>> {
        if let Some(hit) = self.cache.lock().expect("import cache poisoned").get(path).cloned() {
            return Ok(hit);
        }

        let bytes = self.ide.read_file(path).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let imports = parse_imports(path, &text);

        let mut resolved = Vec::with_capacity(imports.len());
        for (symbol, line) in imports {
            let import_site = DefinitionLocation { path: path.to_string(), start_line: line, end_line: line };
            let locations = self.ide.goto_definition(&import_site).await.unwrap_or_default();
            let snippet = match locations.first() {
                Some(loc) => self.ide.read_range_in_file(&loc.path, loc.start_line, loc.end_line).await.ok(),
                None => None,
            };
            resolved.push(ResolvedImport { symbol, locations, snippet });
        }

        self.cache.lock().expect("import cache poisoned").put(path.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Pre-warms the cache for `path` asynchronously (§4.9: "on active-file
    /// change, the new key is pre-warmed asynchronously"). Errors are
    /// swallowed — a failed pre-warm just means the next synchronous
    /// `resolve_for_file` call pays the cost itself.
    pub fn prewarm(self: &Arc<Self>, path: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.resolve_for_file(&path).await;
        });
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("import cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn extension(path: &str) -> Option<&str> {
    path.rsplit('/').next().unwrap_or(path).rsplit_once('.').map(|(_, ext)| ext)
}

/// Scans `text` for import statements, returning `(symbol, line_number)`
/// pairs (1-based line numbers, matching [`DefinitionLocation`]). Dispatches
/// by extension; unrecognized extensions yield no imports.
fn parse_imports(path: &str, text: &str) -> Vec<(ImportedSymbol, usize)> {
    match extension(path) {
        Some("rs") => parse_rust_imports(text),
        Some("py") => parse_python_imports(text),
        Some("js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx") => parse_js_imports(text),
        Some("go") => parse_go_imports(text),
        _ => Vec::new(),
    }
}

fn parse_rust_imports(text: &str) -> Vec<(ImportedSymbol, usize)> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("use ") else { continue };
        let path_part = rest.trim_end_matches(';').trim();
        let names = leaf_names(path_part);
        let module = path_part.rsplit_once("::").map(|(m, _)| m.to_string()).unwrap_or_else(|| path_part.to_string());
        for name in names {
            out.push((ImportedSymbol { name, source_module: module.clone() }, idx + 1));
        }
    }
    out
}

/// Extracts the leaf identifier(s) from a `use` path, expanding a trailing
/// `{a, b as c}` group into its members; `as` aliases keep the alias name.
fn leaf_names(path_part: &str) -> Vec<String> {
    let Some(brace_start) = path_part.find('{') else {
        let leaf = path_part.rsplit("::").next().unwrap_or(path_part);
        return vec![alias_or_name(leaf)];
    };
    let Some(brace_end) = path_part.rfind('}') else {
        return vec![alias_or_name(path_part.rsplit("::").next().unwrap_or(path_part))];
    };
    path_part[brace_start + 1..brace_end]
        .split(',')
        .map(|s| alias_or_name(s.trim()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn alias_or_name(segment: &str) -> String {
    segment.rsplit_once(" as ").map(|(_, alias)| alias.trim().to_string()).unwrap_or_else(|| segment.trim().to_string())
}

fn parse_python_imports(text: &str) -> Vec<(ImportedSymbol, usize)> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("from ") {
            let Some((module, names)) = rest.split_once(" import ") else { continue };
            for name in names.split(',') {
                let name = alias_or_name_py(name.trim());
                if name.is_empty() {
                    continue;
                }
                out.push((ImportedSymbol { name, source_module: module.trim().to_string() }, idx + 1));
            }
        } else if let Some(rest) = trimmed.strip_prefix("import ") {
            for module in rest.split(',') {
                let module = alias_or_name_py(module.trim());
                if module.is_empty() {
                    continue;
                }
                out.push((ImportedSymbol { name: module.clone(), source_module: module }, idx + 1));
            }
        }
    }
    out
}

fn alias_or_name_py(segment: &str) -> String {
    segment.rsplit_once(" as ").map(|(_, alias)| alias.trim().to_string()).unwrap_or_else(|| segment.trim().to_string())
}

fn parse_js_imports(text: &str) -> Vec<(ImportedSymbol, usize)> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("import ") {
            let Some((spec, module)) = rest.split_once(" from ") else { continue };
            let module = module.trim().trim_end_matches(';').trim_matches(|c| c == '\'' || c == '"').to_string();
            let spec = spec.trim();
            if let Some(inner) = spec.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                for name in inner.split(',') {
                    let name = name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    out.push((
                        ImportedSymbol { name: alias_or_js(name), source_module: module.clone() },
                        idx + 1,
                    ));
                }
            } else if !spec.is_empty() {
                out.push((ImportedSymbol { name: spec.to_string(), source_module: module }, idx + 1));
            }
        } else if trimmed.contains("require(") {
            if let Some(module_start) = trimmed.find("require(") {
                let after = &trimmed[module_start + "require(".len()..];
                if let Some(end) = after.find(')') {
                    let module = after[..end].trim().trim_matches(|c| c == '\'' || c == '"').to_string();
                    if let Some(name) = trimmed.split('=').next().map(|s| s.trim()) {
                        let name = name.trim_start_matches("const ").trim_start_matches("let ").trim_start_matches("var ");
                        out.push((ImportedSymbol { name: name.to_string(), source_module: module }, idx + 1));
                    }
                }
            }
        }
    }
    out
}

fn alias_or_js(segment: &str) -> String {
    segment.rsplit_once(" as ").map(|(_, alias)| alias.trim().to_string()).unwrap_or_else(|| segment.trim().to_string())
}

fn parse_go_imports(text: &str) -> Vec<(ImportedSymbol, usize)> {
    let mut out = Vec::new();
    let mut in_block = false;
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("import (") {
            in_block = true;
            continue;
        }
        if in_block && trimmed == ")" {
            in_block = false;
            continue;
        }
        let module = if in_block {
            trimmed.trim_matches('"')
        } else if let Some(rest) = trimmed.strip_prefix("import ") {
            rest.trim().trim_matches('"')
        } else {
            continue
        };
        if module.is_empty() {
            continue;
        }
        let name = module.rsplit('/').next().unwrap_or(module).to_string();
        out.push((ImportedSymbol { name, source_module: module.to_string() }, idx + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ide::LocalCollaborator;

    #[test]
    fn parses_simple_rust_use_statements() {
        let text = "use std::collections::BTreeMap;\nuse crate::model::{Tag, Chunk as C};\n";
        let imports = parse_rust_imports(text);
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].0.name, "BTreeMap");
        assert_eq!(imports[0].0.source_module, "std::collections");
        assert!(imports.iter().any(|(s, _)| s.name == "Tag"));
        assert!(imports.iter().any(|(s, _)| s.name == "C"));
    }

    #[test]
    fn parses_python_from_import() {
        let imports = parse_python_imports("from pkg.mod import add, sub as s\n");
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].0.name, "add");
        assert_eq!(imports[0].0.source_module, "pkg.mod");
        assert_eq!(imports[1].0.name, "s");
    }

    #[test]
    fn parses_js_named_imports() {
        let imports = parse_js_imports("import { foo, bar as baz } from './lib';\n");
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].0.source_module, "./lib");
        assert_eq!(imports[1].0.name, "baz");
    }

    #[tokio::test]
    async fn resolve_for_file_caches_results_and_reads_through_ide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "use std::collections::BTreeMap;\n").unwrap();

        let ide = Arc::new(LocalCollaborator::new(vec![dir.path().to_string_lossy().to_string()]));
        let resolver = ImportResolver::with_capacity(ide, 10);

        let path_str = path.to_str().unwrap();
        let first = resolver.resolve_for_file(path_str).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].symbol.name, "BTreeMap");
        assert!(first[0].locations.is_empty());
        assert_eq!(resolver.len(), 1);

        let second = resolver.resolve_for_file(path_str).await.unwrap();
        assert_eq!(second.len(), first.len());
    }

    #[test]
    fn capacity_evicts_strict_lru() {
        let capacity = NonZeroUsize::new(2).unwrap();
        let mut cache: LruCache<String, Vec<ResolvedImport>> = LruCache::new(capacity);
        cache.put("a".to_string(), Vec::new());
        cache.put("b".to_string(), Vec::new());
        cache.get("a");
        cache.put("c".to_string(), Vec::new());
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }
}
