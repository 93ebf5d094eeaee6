use std::{
    io,
    path::{Component, Path, PathBuf},
};

use super::VaultError;

/// Characters Obsidian refuses in note names or that break `[[wikilinks]]`.
const FORBIDDEN_STEM_CHARS: &[char] = &['*', '"', '\\', '/', '<', '>', ':', '|', '?', '#', '^', '[', ']'];

/// Longest stem (in characters) a note file gets.
pub const MAX_STEM_CHARS: usize = 120;

/// Resolve a vault-relative path against the canonical vault root.
///
/// `canonical_root` must already be canonical (see
/// [`VaultConfig::validate_vault`](crate::config::VaultConfig::validate_vault)).
/// Null bytes and `..` components are rejected before joining. Paths that
/// already exist are canonicalized and must stay under the root, which
/// catches symlinks pointing outside the vault.
pub async fn resolve_in_vault(canonical_root: &Path, rel: &str) -> Result<PathBuf, VaultError> {
    if rel.contains('\0') {
        return Err(VaultError::PathTraversal(
            "Path contains null bytes".to_string(),
        ));
    }

    let relative = Path::new(rel.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(VaultError::PathTraversal(format!(
            "Path traversal detected: {rel}"
        )));
    }

    let target = canonical_root.join(relative);
    match tokio::fs::canonicalize(&target).await {
        Ok(resolved) if resolved.starts_with(canonical_root) => Ok(resolved),
        Ok(_) => Err(VaultError::PathTraversal(format!(
            "Path escapes vault root: {rel}"
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(target),
        Err(e) => Err(VaultError::io(target.display(), e)),
    }
}

/// Turn a concept title into a note file stem.
///
/// Forbidden characters become spaces, whitespace is collapsed, and leading
/// dots are dropped so the note is never hidden. The stem doubles as the
/// wikilink target, so two notes link to each other through this function
/// alone. Returns `None` when nothing usable is left.
pub fn sanitize_file_stem(title: &str) -> Option<String> {
    let replaced: String = title
        .chars()
        .map(|c| {
            if FORBIDDEN_STEM_CHARS.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_start_matches('.').trim();
    if trimmed.is_empty() {
        return None;
    }

    let stem: String = trimmed.chars().take(MAX_STEM_CHARS).collect();
    Some(stem.trim_end().to_string())
}
