//! Path and file-URI handling, plus the gates applied before a file is
//! handed to a language server.

use crate::{LspError, Result};
use lsp_types::Url;
use std::path::{Component, Path, PathBuf};

/// Largest file prism will open for a server.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// How much of the file head is sniffed for NUL bytes.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Extensions never worth sending to a language server.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tar", "xz", "bz2",
    "7z", "rar", "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "war", "wasm", "pyc",
    "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "avi", "mov", "mkv", "sqlite", "db",
];

/// Resolve a path to its canonical absolute form. Symlinks are resolved
/// when the file exists; otherwise the path is absolutized against the
/// current directory with lexical `.`/`..` cleanup.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Convert an absolute path to a `file://` URI.
pub fn path_to_uri(path: &Path) -> Result<Url> {
    Url::from_file_path(normalize_path(path))
        .map_err(|_| LspError::FileNotReadable(format!("not an absolute path: {}", path.display())))
}

/// Convert a `file://` URI back to a filesystem path.
pub fn uri_to_path(uri: &Url) -> Result<PathBuf> {
    uri.to_file_path()
        .map_err(|_| LspError::InvalidResponse(format!("not a file URI: {uri}")))
}

fn extension_is_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            BINARY_EXTENSIONS.iter().any(|b| *b == ext)
        })
        .unwrap_or(false)
}

/// Read a document for a `didOpen`, enforcing the gates: the file must
/// exist, be a regular file, stay under [`MAX_FILE_SIZE`], and not look
/// binary (known binary extension, or a NUL byte in the first 8 KiB).
pub async fn read_document(path: &Path) -> Result<String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| LspError::FileNotFound(path.to_path_buf()))?;
    if metadata.is_dir() {
        return Err(LspError::FileNotReadable(format!("{} is a directory", path.display())));
    }
    if metadata.len() > MAX_FILE_SIZE {
        return Err(LspError::FileNotReadable(format!(
            "{} is {} bytes, over the {} byte limit",
            path.display(),
            metadata.len(),
            MAX_FILE_SIZE
        )));
    }
    if extension_is_binary(path) {
        return Err(LspError::FileNotReadable(format!("{} is a binary file", path.display())));
    }

    let bytes = tokio::fs::read(path).await?;
    if bytes.iter().take(BINARY_SNIFF_LEN).any(|b| *b == 0) {
        return Err(LspError::FileNotReadable(format!("{} is a binary file", path.display())));
    }
    String::from_utf8(bytes)
        .map_err(|_| LspError::FileNotReadable(format!("{} is not valid UTF-8", path.display())))
}

/// Reject paths that escape the owning client's workspace root. Applied
/// before any server-proposed edit touches disk.
pub fn ensure_within_root(path: &Path, root: &Path) -> Result<()> {
    let path = normalize_path(path);
    let root = normalize_path(root);
    if path.starts_with(&root) {
        Ok(())
    } else {
        Err(LspError::FileNotReadable(format!(
            "{} resolves outside the workspace root {}",
            path.display(),
            root.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn uri_round_trip_on_existing_path() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("main.rs");
        fs::write(&file, "fn main() {}").unwrap();

        let uri = path_to_uri(&file).unwrap();
        assert!(uri.as_str().starts_with("file://"));
        let back = uri_to_path(&uri).unwrap();
        assert_eq!(back, file.canonicalize().unwrap());
        assert_eq!(path_to_uri(&back).unwrap(), uri);
    }

    #[test]
    fn uri_percent_encodes_segments() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a b.rs");
        fs::write(&file, "").unwrap();

        let uri = path_to_uri(&file).unwrap();
        assert!(uri.as_str().contains("a%20b.rs"));
        assert_eq!(uri_to_path(&uri).unwrap(), file.canonicalize().unwrap());
    }

    #[test]
    fn normalize_cleans_dot_segments_for_missing_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let messy = root.join("a").join("..").join("b").join(".").join("c.rs");
        assert_eq!(normalize_path(&messy), root.join("b").join("c.rs"));
    }

    #[tokio::test]
    async fn read_document_rejects_missing_and_directories() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.rs");
        assert!(matches!(read_document(&missing).await, Err(LspError::FileNotFound(_))));
        assert!(matches!(read_document(dir.path()).await, Err(LspError::FileNotReadable(_))));
    }

    #[tokio::test]
    async fn read_document_rejects_binaries() {
        let dir = tempdir().unwrap();
        let by_ext = dir.path().join("img.png");
        fs::write(&by_ext, "harmless").unwrap();
        assert!(matches!(read_document(&by_ext).await, Err(LspError::FileNotReadable(_))));

        let by_content = dir.path().join("data.txt");
        fs::write(&by_content, b"ab\0cd").unwrap();
        assert!(matches!(read_document(&by_content).await, Err(LspError::FileNotReadable(_))));
    }

    #[tokio::test]
    async fn read_document_accepts_text() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ok.rs");
        fs::write(&file, "fn main() {}").unwrap();
        assert_eq!(read_document(&file).await.unwrap(), "fn main() {}");
    }

    #[test]
    fn write_safety_rejects_escapes() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert!(ensure_within_root(&root.join("src/lib.rs"), &root).is_ok());
        assert!(ensure_within_root(&root.join("../outside.rs"), &root).is_err());
        assert!(ensure_within_root(Path::new("/etc/passwd"), &root).is_err());
    }
}
