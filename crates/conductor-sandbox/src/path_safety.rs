// conductor-sandbox/src/path_safety.rs
// ============================================================================
// Module: Path Safety
// Description: Worktree-boundary and symlink-escape resolution (§4.7
//              "WorktreeBoundary", "SymlinkEscape").
// Purpose: Reject any tool-call path that would read or write outside the
//          run's worktree, including paths that do not exist yet and paths
//          that only escape via a symlinked ancestor directory.
// Dependencies: conductor-core
// ============================================================================

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::errors::SandboxError;

/// Resolves `requested` (relative or absolute, as supplied by an agent tool
/// call) against `worktree_root`, returning the real, absolute path if and
/// only if it stays inside the worktree.
///
/// Three checks run in order, matching the policy pre-check's ordering
/// (§4.7): a lexical `..`/absolute-path rejection first (cheap, catches the
/// common case without touching the filesystem), then symlink-escape
/// resolution against the deepest existing ancestor (a write target may not
/// exist yet, so we cannot simply `canonicalize` the full path), then a
/// final containment check on the resolved real path.
///
/// # Errors
/// Returns [`SandboxError::PathEscape`] if the path is absolute, contains a
/// lexical `..` component, or resolves (through a symlink) outside
/// `worktree_root`.
pub fn resolve_in_worktree(worktree_root: &Path, requested: &str) -> Result<PathBuf, SandboxError> {
    let requested_path = Path::new(requested);

    if requested_path.is_absolute() {
        return Err(SandboxError::PathEscape { path: requested.to_string() });
    }
    if requested_path.components().any(|component| matches!(component, Component::ParentDir)) {
        return Err(SandboxError::PathEscape { path: requested.to_string() });
    }

    let joined = worktree_root.join(requested_path);
    let (deepest_existing, remaining_suffix) = split_at_deepest_existing_ancestor(&joined);

    let resolved_ancestor = deepest_existing
        .canonicalize()
        .map_err(|_| SandboxError::PathEscape { path: requested.to_string() })?;
    let resolved_root = worktree_root
        .canonicalize()
        .map_err(|_| SandboxError::PathEscape { path: requested.to_string() })?;

    if !resolved_ancestor.starts_with(&resolved_root) {
        return Err(SandboxError::PathEscape { path: requested.to_string() });
    }

    let resolved = match remaining_suffix {
        Some(suffix) => resolved_ancestor.join(suffix),
        None => resolved_ancestor,
    };

    if !resolved.starts_with(&resolved_root) {
        return Err(SandboxError::PathEscape { path: requested.to_string() });
    }
    Ok(resolved)
}

/// Walks `path` upward until it finds an ancestor that exists on disk,
/// returning that ancestor and the (possibly multi-component) suffix that
/// does not exist yet. A brand-new `write_file` target has no real path of
/// its own, so symlink resolution has to anchor on whatever ancestor
/// directory does exist.
fn split_at_deepest_existing_ancestor(path: &Path) -> (PathBuf, Option<PathBuf>) {
    let mut suffix_components: Vec<Component<'_>> = Vec::new();
    let mut current = path.to_path_buf();

    loop {
        if current.exists() {
            let suffix = if suffix_components.is_empty() {
                None
            } else {
                suffix_components.reverse();
                Some(suffix_components.into_iter().collect())
            };
            return (current, suffix);
        }
        let Some(parent) = current.parent() else {
            return (path.to_path_buf(), None);
        };
        if let Some(name) = current.file_name() {
            suffix_components.push(Component::Normal(name));
        }
        current = parent.to_path_buf();
    }
}
