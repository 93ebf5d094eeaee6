use std::path::{Component, Path, PathBuf};

/// Vault mirror configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Path to the Obsidian vault directory. Env: `VAULT_PATH`, default `/vault`.
    pub vault_path: PathBuf,
    /// Vault-relative folder holding concept notes. Env: `VAULT_CONCEPT_DIR`, default `Concepts`.
    pub concept_dir: String,
    /// Largest note read or written, in bytes. Env: `MAX_FILE_SIZE`, default 10 MB.
    pub max_file_size: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::from("/vault"),
            concept_dir: "Concepts".to_string(),
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

impl VaultConfig {
    /// Load configuration from environment variables, applying defaults.
    ///
    /// # Errors
    /// Returns an error if `MAX_FILE_SIZE` cannot be parsed or
    /// `VAULT_CONCEPT_DIR` is not a plain relative folder.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let vault_path = std::env::var("VAULT_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.vault_path);
        let concept_dir = std::env::var("VAULT_CONCEPT_DIR").unwrap_or(defaults.concept_dir);
        let max_file_size = parse_env_usize("MAX_FILE_SIZE", defaults.max_file_size)?;

        let config = VaultConfig {
            vault_path,
            concept_dir,
            max_file_size,
        };
        config.check_concept_dir()?;
        Ok(config)
    }

    /// Validate that the vault path exists and is a directory, then
    /// canonicalize it.
    ///
    /// Path checks in [`crate::vault::path`] compare against this canonical
    /// root, so call it once before building a
    /// [`VaultFs`](crate::vault::VaultFs).
    pub async fn validate_vault(&mut self) -> anyhow::Result<()> {
        let meta = tokio::fs::metadata(&self.vault_path).await.map_err(|e| {
            anyhow::anyhow!(
                "Cannot access vault path '{}': {}",
                self.vault_path.display(),
                e
            )
        })?;

        if !meta.is_dir() {
            anyhow::bail!(
                "Vault path is not a directory: {}",
                self.vault_path.display()
            );
        }

        self.vault_path = tokio::fs::canonicalize(&self.vault_path)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Cannot canonicalize vault path '{}': {}",
                    self.vault_path.display(),
                    e
                )
            })?;

        Ok(())
    }

    fn check_concept_dir(&self) -> anyhow::Result<()> {
        let dir = Path::new(&self.concept_dir);
        let plain = dir
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if self.concept_dir.trim().is_empty() || !plain {
            anyhow::bail!(
                "VAULT_CONCEPT_DIR must be a relative folder inside the vault, got '{}'",
                self.concept_dir
            );
        }
        Ok(())
    }
}

fn parse_env_usize(name: &str, default: usize) -> anyhow::Result<usize> {
    match std::env::var(name) {
        Ok(val) => val
            .parse::<usize>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}
