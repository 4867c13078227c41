use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

use crate::error::GuardianError;

/// A cloned repository in a `guardian_`-prefixed temp directory. The
/// directory is owned exclusively by this value and removed when it is
/// dropped or explicitly closed.
#[derive(Debug)]
pub struct RepoCheckout {
    pub url: String,
    path: PathBuf,
    temp: Option<TempDir>,
}

impl RepoCheckout {
    /// Shallow-clone `url`. Failures of the `git` subprocess surface as
    /// ingest errors so the orchestrator can report the repository as
    /// unreachable.
    pub async fn clone(url: &str) -> Result<Self> {
        let temp = TempDir::with_prefix("guardian_")
            .map_err(|e| GuardianError::Ingest(format!("temp dir creation failed: {e}")))?;
        let path = temp.path().join("repo");

        let output = tokio::process::Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--quiet")
            .arg(url)
            .arg(&path)
            .output()
            .await
            .map_err(|e| GuardianError::Ingest(format!("failed to spawn git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GuardianError::Ingest(format!(
                "git clone of {url} failed: {}",
                stderr.trim()
            ))
            .into());
        }

        Ok(Self {
            url: url.to_string(),
            path,
            temp: Some(temp),
        })
    }

    /// Wrap an existing directory for tests and local audits. Cleanup stays
    /// with the caller.
    pub fn local(url: &str, path: &Path) -> Self {
        Self {
            url: url.to_string(),
            path: path.to_path_buf(),
            temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the checkout now instead of at drop time.
    pub fn close(mut self) {
        if let Some(temp) = self.temp.take() {
            remove_robust(temp);
        }
    }
}

impl Drop for RepoCheckout {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            remove_robust(temp);
        }
    }
}

/// `git` marks object files read-only, which blocks deletion on
/// Windows-like filesystems. Clear the bit and retry once before giving up.
fn remove_robust(temp: TempDir) {
    let path = temp.path().to_path_buf();
    if let Err(first) = temp.close() {
        tracing::debug!("temp dir removal failed, clearing read-only bits: {first}");
        clear_readonly(&path);
        if let Err(second) = std::fs::remove_dir_all(&path) {
            if path.exists() {
                tracing::warn!("could not remove temp dir {}: {second}", path.display());
            }
        }
    }
}

fn clear_readonly(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = std::fs::set_permissions(&path, perms);
            }
        }
        if path.is_dir() {
            clear_readonly(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clone_of_unreachable_repo_is_ingest_error() {
        let err = RepoCheckout::clone("https://invalid.invalid/nope/nope")
            .await
            .unwrap_err();
        let guardian = err.downcast_ref::<GuardianError>().unwrap();
        assert_eq!(guardian.kind(), "ingest");
    }

    #[tokio::test]
    async fn local_checkout_does_not_own_the_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        {
            let checkout = RepoCheckout::local("https://example.test/demo", dir.path());
            assert!(checkout.path().join("a.py").exists());
        }
        assert!(dir.path().join("a.py").exists());
    }

    #[tokio::test]
    async fn close_removes_owned_temp_dir() {
        // Simulate an owned checkout without the network: build the temp
        // layout by hand.
        let temp = TempDir::with_prefix("guardian_").unwrap();
        let repo_path = temp.path().join("repo");
        std::fs::create_dir_all(&repo_path).unwrap();
        std::fs::write(repo_path.join("f.txt"), "data").unwrap();
        let observed = temp.path().to_path_buf();

        let checkout = RepoCheckout {
            url: "https://example.test/demo".into(),
            path: repo_path,
            temp: Some(temp),
        };
        checkout.close();
        assert!(!observed.exists());
    }
}
