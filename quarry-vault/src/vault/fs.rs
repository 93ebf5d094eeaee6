use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;

use super::{path::resolve_in_vault, VaultError};

/// Sandboxed view of the vault directory.
///
/// Every method takes a vault-relative path and resolves it with
/// [`resolve_in_vault`] before touching the filesystem. `root` must be the
/// canonical vault path.
#[derive(Debug, Clone)]
pub struct VaultFs {
    root: PathBuf,
    max_file_size: usize,
}

impl VaultFs {
    pub fn new(root: PathBuf, max_file_size: usize) -> Self {
        Self {
            root,
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn resolve(&self, rel: &str) -> Result<PathBuf, VaultError> {
        resolve_in_vault(&self.root, rel).await
    }

    /// Returns (exists, is_dir) without following a missing path into an error.
    async fn classify(path: &Path, rel: &str) -> Result<(bool, bool), VaultError> {
        match fs::metadata(path).await {
            Ok(meta) => Ok((true, meta.is_dir())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok((false, false)),
            Err(e) => Err(VaultError::io(rel, e)),
        }
    }

    /// Read a note as UTF-8, refusing files over the size limit.
    pub async fn read_file(&self, rel: &str) -> Result<String, VaultError> {
        let path = self.resolve(rel).await?;
        match Self::classify(&path, rel).await? {
            (false, _) => return Err(VaultError::NotFound(rel.to_string())),
            (true, true) => return Err(VaultError::NotAFile(rel.to_string())),
            (true, false) => {}
        }

        let size = fs::metadata(&path)
            .await
            .map_err(|e| VaultError::io(rel, e))?
            .len() as usize;
        if size > self.max_file_size {
            return Err(VaultError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let bytes = fs::read(&path).await.map_err(|e| VaultError::io(rel, e))?;
        String::from_utf8(bytes).map_err(|_| VaultError::NotUtf8(rel.to_string()))
    }

    /// Replace a note's content atomically.
    ///
    /// Content goes to a hidden sibling first and is renamed over the target,
    /// so a reader never sees a half-written note. Parent directories are
    /// created as needed.
    pub async fn write_file(&self, rel: &str, content: &str) -> Result<(), VaultError> {
        if content.len() > self.max_file_size {
            return Err(VaultError::FileTooLarge {
                size: content.len(),
                max: self.max_file_size,
            });
        }

        let path = self.resolve(rel).await?;
        if Self::classify(&path, rel).await?.1 {
            return Err(VaultError::NotAFile(rel.to_string()));
        }

        let parent = path
            .parent()
            .ok_or_else(|| VaultError::NotAFile(rel.to_string()))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| VaultError::io(rel, e))?;

        let file_name = path
            .file_name()
            .ok_or_else(|| VaultError::NotAFile(rel.to_string()))?
            .to_string_lossy();
        let tmp = parent.join(format!(".{file_name}.tmp"));

        fs::write(&tmp, content.as_bytes())
            .await
            .map_err(|e| VaultError::io(rel, e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(VaultError::io(rel, e));
        }
        Ok(())
    }

    /// Whether a regular file exists at `rel`.
    pub async fn is_file(&self, rel: &str) -> Result<bool, VaultError> {
        let path = self.resolve(rel).await?;
        Ok(matches!(Self::classify(&path, rel).await?, (true, false)))
    }

    /// Sorted names of the entries directly under `rel`, hidden entries
    /// excluded. A missing directory lists as empty.
    pub async fn list_dir(&self, rel: &str) -> Result<Vec<String>, VaultError> {
        let path = self.resolve(rel).await?;
        match Self::classify(&path, rel).await? {
            (false, _) => return Ok(Vec::new()),
            (true, false) => return Err(VaultError::NotADirectory(rel.to_string())),
            (true, true) => {}
        }

        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| VaultError::io(rel, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| VaultError::io(rel, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn make_vault(dir: &TempDir, max_file_size: usize) -> VaultFs {
        let canonical = tokio::fs::canonicalize(dir.path())
            .await
            .expect("canonicalize temp dir");
        VaultFs::new(canonical, max_file_size)
    }

    #[tokio::test]
    async fn write_creates_parents_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let vault = make_vault(&dir, 1024).await;

        vault.write_file("Concepts/Virtue.md", "first").await.unwrap();
        vault.write_file("Concepts/Virtue.md", "second").await.unwrap();

        assert_eq!(vault.read_file("Concepts/Virtue.md").await.unwrap(), "second");
        assert_eq!(vault.list_dir("Concepts").await.unwrap(), vec!["Virtue.md"]);
    }

    #[tokio::test]
    async fn read_missing_note_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vault = make_vault(&dir, 1024).await;
        assert!(matches!(
            vault.read_file("Concepts/Missing.md").await.unwrap_err(),
            VaultError::NotFound(_)
        ));
        assert!(!vault.is_file("Concepts/Missing.md").await.unwrap());
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = make_vault(&dir, 8).await;

        let err = vault.write_file("big.md", "more than eight").await.unwrap_err();
        assert!(matches!(err, VaultError::FileTooLarge { max: 8, .. }));

        std::fs::write(dir.path().join("big.md"), "more than eight").unwrap();
        let err = vault.read_file("big.md").await.unwrap_err();
        assert!(matches!(err, VaultError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn writing_over_a_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Concepts/Virtue.md")).unwrap();
        let vault = make_vault(&dir, 1024).await;

        let err = vault.write_file("Concepts/Virtue.md", "x").await.unwrap_err();
        assert!(matches!(err, VaultError::NotAFile(_)));
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vault = make_vault(&dir, 1024).await;
        assert!(vault.list_dir("Concepts").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let vault = make_vault(&dir, 1024).await;
        assert!(matches!(
            vault.write_file("../escape.md", "x").await.unwrap_err(),
            VaultError::PathTraversal(_)
        ));
    }
}
