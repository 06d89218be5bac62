//! Project marker matching for workspace root detection.
//!
//! A marker is a filename that identifies a project root, for example
//! `Cargo.toml` or `.git`. A marker starting with `*` matches any entry
//! whose name ends with the remainder, which covers project files with
//! variable stems such as `*.sln` or `*.csproj`.

use std::path::Path;

/// Marker names used when a server config carries none of its own. The
/// generic list favors repository tops, so monorepos collapse to one root.
pub const DEFAULT_MARKERS: &[&str] = &[
    ".git",
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "pom.xml",
    "build.gradle",
    "Makefile",
    "CMakeLists.txt",
];

/// Check a single directory entry name against one marker pattern.
pub fn marker_matches(marker: &str, name: &str) -> bool {
    match marker.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => marker == name,
    }
}

/// True if `dir` directly contains an entry matching any of `markers`.
pub fn dir_has_marker<S: AsRef<str>>(dir: &Path, markers: &[S]) -> bool {
    let exact: Vec<&str> = markers.iter().map(|m| m.as_ref()).filter(|m| !m.starts_with('*')).collect();
    let globs: Vec<&str> = markers.iter().map(|m| m.as_ref()).filter(|m| m.starts_with('*')).collect();

    // Exact names are cheap stat calls; only glob markers need a listing.
    if exact.iter().any(|m| dir.join(m).exists()) {
        return true;
    }
    if globs.is_empty() {
        return false;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if globs.iter().any(|m| marker_matches(m, &name)) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn exact_and_glob_patterns() {
        assert!(marker_matches("Cargo.toml", "Cargo.toml"));
        assert!(!marker_matches("Cargo.toml", "Cargo.lock"));
        assert!(marker_matches("*.sln", "App.sln"));
        assert!(marker_matches("*.csproj", "Web.csproj"));
        assert!(!marker_matches("*.sln", "App.slnx"));
    }

    #[test]
    fn directory_scan_honors_globs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Thing.sln"), "").unwrap();

        assert!(dir_has_marker(dir.path(), &["*.sln"]));
        assert!(!dir_has_marker(dir.path(), &["*.csproj"]));
        assert!(!dir_has_marker(dir.path(), &["Cargo.toml"]));
    }

    #[test]
    fn exact_marker_found_without_listing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module x").unwrap();
        assert!(dir_has_marker(dir.path(), &["go.mod"]));
    }
}
