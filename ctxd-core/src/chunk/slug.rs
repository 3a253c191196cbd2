//! Slug helpers for building stable, human-readable chunk identifiers.

use crate::model::ChunkKind;
use crate::util::slugify;

pub fn make_slug(
    path: &str,
    kind: ChunkKind,
    heading_path: &[String],
    symbol: &Option<String>,
    start_line: usize,
    end_line: usize,
) -> String {
    let base_name = path.rsplit('/').next().unwrap_or(path);
    let base_stem = strip_extension(base_name);
    let base_slug = truncate_slug(&slugify(base_stem), 28);

    let raw_context = heading_path
        .last()
        .map(|s| s.as_str())
        .or_else(|| symbol.as_deref());

    let context_slug = raw_context
        .map(slugify)
        .map(|ctx| strip_redundant_prefix(&ctx, &base_slug))
        .map(|ctx| truncate_slug(&ctx, 44))
        .filter(|ctx| !ctx.is_empty() && ctx != "chunk" && *ctx != base_slug);

    let mut slug = match context_slug {
        Some(ctx) => format!("{}--{}", base_slug, ctx),
        None => base_slug,
    };
    if kind == ChunkKind::Text {
        slug = format!("{}-l{}-{}", slug, start_line, end_line);
    }
    truncate_slug(&slug, 96)
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn truncate_slug(input: &str, max_len: usize) -> String {
    let mut out = if input.len() <= max_len {
        input.to_string()
    } else {
        input.chars().take(max_len).collect()
    };
    while out.ends_with('-') {
        out.pop();
    }
    while out.starts_with('-') {
        out.remove(0);
    }
    out
}

fn strip_redundant_prefix(context: &str, base: &str) -> String {
    let mut ctx = context.to_string();
    let mut changed = true;
    while changed {
        changed = false;
        if let Some(rest) = ctx.strip_prefix(base) {
            let rest = rest.trim_start_matches('-');
            ctx = rest.to_string();
            changed = true;
        }
    }
    ctx
}
