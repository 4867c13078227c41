use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};

const MAX_FILES: usize = 50_000;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
}

/// Walk a repository applying the shared inclusion policy: text code and doc
/// extensions only, generated/dependency directories skipped, oversized and
/// binary files dropped. Output is sorted by relative path.
pub fn walk_repository(root: &Path, max_file_size: u64) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    walk_dir(root, root, max_file_size, &mut entries);
    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

pub fn hash_content(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn walk_dir(root: &Path, dir: &Path, max_file_size: u64, out: &mut Vec<FileEntry>) {
    if out.len() >= MAX_FILES || !dir.is_dir() {
        return;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        if out.len() >= MAX_FILES {
            return;
        }
        let path = entry.path();
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        if path.is_dir() {
            if is_excluded_dir(&name_str) {
                continue;
            }
            walk_dir(root, &path, max_file_size, out);
        } else if path.is_file() {
            if !is_included_ext(&path) {
                continue;
            }
            let meta = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.len() > max_file_size {
                continue;
            }

            // NUL bytes in the head mean a mislabeled binary.
            if let Ok(head) = read_head(&path, 512) {
                if head.contains(&0) {
                    continue;
                }
            } else {
                continue;
            }

            let rel = match path.strip_prefix(root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            out.push(FileEntry {
                rel_path: rel,
                abs_path: path,
                size: meta.len(),
            });
        }
    }
}

fn read_head(path: &Path, n: usize) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; n];
    let read = file.read(&mut buf)?;
    buf.truncate(read);
    Ok(buf)
}

pub fn is_excluded_dir(name: &str) -> bool {
    matches!(
        name,
        ".git"
            | "node_modules"
            | "venv"
            | ".venv"
            | "__pycache__"
            | "build"
            | "dist"
            | "target"
            | "vendor"
    )
}

pub fn is_included_ext(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    matches!(
        ext.as_str(),
        "py" | "js"
            | "ts"
            | "tsx"
            | "jsx"
            | "java"
            | "cpp"
            | "c"
            | "h"
            | "cs"
            | "go"
            | "rb"
            | "php"
            | "swift"
            | "kt"
            | "rs"
            | "html"
            | "css"
            | "md"
            | "rst"
            | "txt"
            | "json"
            | "yaml"
            | "yml"
            | "toml"
            | "xml"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_deterministic() {
        let h1 = hash_content(b"no hardcoded credentials");
        let h2 = hash_content(b"no hardcoded credentials");
        assert_eq!(h1, h2);
    }

    #[test]
    fn excluded_dirs() {
        assert!(is_excluded_dir("node_modules"));
        assert!(is_excluded_dir(".git"));
        assert!(is_excluded_dir("target"));
        assert!(is_excluded_dir("__pycache__"));
        assert!(!is_excluded_dir("src"));
    }

    #[test]
    fn included_extensions() {
        assert!(is_included_ext(Path::new("app.py")));
        assert!(is_included_ext(Path::new("index.tsx")));
        assert!(is_included_ext(Path::new("README.md")));
        assert!(!is_included_ext(Path::new("logo.png")));
        assert!(!is_included_ext(Path::new("data.bin")));
        assert!(!is_included_ext(Path::new("noext")));
    }

    #[test]
    fn walk_applies_policy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("src/app.py"), "API_KEY = \"abc\"\n").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "ignored\n").unwrap();
        std::fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(root.join("binary.txt"), [0u8; 600]).unwrap();

        let entries = walk_repository(root, DEFAULT_MAX_FILE_SIZE).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.py"]);
    }

    #[test]
    fn walk_respects_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("big.md"), "x".repeat(2048)).unwrap();
        std::fs::write(root.join("small.md"), "fine").unwrap();

        let entries = walk_repository(root, 1024).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["small.md"]);
    }
}
