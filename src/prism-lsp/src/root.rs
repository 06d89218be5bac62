//! Workspace root detection.
//!
//! The root for a file is found by walking from its directory toward the
//! filesystem root and recording every directory that holds a marker.
//! Language-specific markers select the innermost match, so a package
//! nested inside a monorepo gets its own server; the generic default
//! list selects the outermost match, so unrelated tools agree on the
//! repository top. `PRISM_WORKSPACE_ROOT` overrides the search entirely
//! when it points at an existing directory.

use crate::markers::{dir_has_marker, DEFAULT_MARKERS};
use crate::uri::normalize_path;
use std::path::{Path, PathBuf};

/// Environment override consulted before any marker walk.
pub const WORKSPACE_ROOT_ENV: &str = "PRISM_WORKSPACE_ROOT";

/// Resolve the workspace root for `file`.
///
/// `markers` is the server config's ordered marker list; pass `None` to
/// use the generic defaults. An explicit `override_root` (from CLI or
/// settings) wins over the environment variable, which wins over the walk.
pub fn resolve_workspace_root(
    file: &Path,
    markers: Option<&[String]>,
    override_root: Option<&Path>,
) -> PathBuf {
    if let Some(root) = override_root {
        if root.is_dir() {
            return normalize_path(root);
        }
    }
    if let Ok(env_root) = std::env::var(WORKSPACE_ROOT_ENV) {
        let env_root = PathBuf::from(env_root);
        if env_root.is_dir() {
            return normalize_path(&env_root);
        }
    }

    let file = normalize_path(file);
    let start = if file.is_dir() {
        file.clone()
    } else {
        file.parent().map(Path::to_path_buf).unwrap_or_else(|| file.clone())
    };

    let matched: Vec<PathBuf> = match markers {
        Some(markers) if !markers.is_empty() => {
            collect_marked_ancestors(&start, markers)
        }
        _ => collect_marked_ancestors(&start, DEFAULT_MARKERS),
    };

    match markers {
        // Language markers: innermost match, closest to the file.
        Some(m) if !m.is_empty() => matched.first().cloned().unwrap_or(start),
        // Default markers: outermost match, the repository top.
        _ => matched.last().cloned().unwrap_or(start),
    }
}

/// Every ancestor of `start` (inclusive) containing a marker, ordered
/// innermost first.
fn collect_marked_ancestors<S: AsRef<str>>(start: &Path, markers: &[S]) -> Vec<PathBuf> {
    let mut matched = Vec::new();
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir_has_marker(dir, markers) {
            matched.push(dir.to_path_buf());
        }
        current = dir.parent();
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn language_markers_pick_innermost() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("Cargo.toml"), "[workspace]").unwrap();
        fs::create_dir_all(root.join("crates/inner/src")).unwrap();
        fs::write(root.join("crates/inner/Cargo.toml"), "[package]").unwrap();

        let file = root.join("crates/inner/src/lib.rs");
        let found =
            resolve_workspace_root(&file, Some(&strings(&["Cargo.toml", ".git"])), None);
        assert_eq!(found, root.join("crates/inner"));
    }

    #[test]
    fn default_markers_pick_outermost() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("pkg/sub")).unwrap();
        fs::write(root.join("pkg/package.json"), "{}").unwrap();

        let file = root.join("pkg/sub/index.md");
        let found = resolve_workspace_root(&file, None, None);
        assert_eq!(found, root);
    }

    #[test]
    fn glob_marker_walks_up() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("App.sln"), "").unwrap();
        fs::create_dir_all(root.join("src/Model")).unwrap();

        let file = root.join("src/Model/User.cs");
        let found = resolve_workspace_root(&file, Some(&strings(&["*.sln", ".git"])), None);
        assert_eq!(found, root);
    }

    #[test]
    fn no_marker_falls_back_to_containing_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("scratch")).unwrap();

        let file = root.join("scratch/notes.xyz");
        let found = resolve_workspace_root(&file, Some(&strings(&["flake.nix"])), None);
        assert_eq!(found, root.join("scratch"));
    }

    #[test]
    fn explicit_override_short_circuits() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("elsewhere")).unwrap();
        fs::write(root.join("Cargo.toml"), "").unwrap();

        let file = root.join("main.rs");
        let found = resolve_workspace_root(
            &file,
            Some(&strings(&["Cargo.toml"])),
            Some(&root.join("elsewhere")),
        );
        assert_eq!(found, root.join("elsewhere"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("go.mod"), "module m").unwrap();
        fs::create_dir_all(root.join("internal")).unwrap();

        let file = root.join("internal/handler.go");
        let markers = strings(&["go.mod", ".git"]);
        let first = resolve_workspace_root(&file, Some(&markers), None);
        for _ in 0..5 {
            assert_eq!(resolve_workspace_root(&file, Some(&markers), None), first);
        }
    }
}
