//! [`MirrorWriter`] backed by an Obsidian vault.

use tracing::{debug, warn};

use quarry_rs::errors::MirrorError;
use quarry_rs::mirror::{ConceptMirror, MirrorReceipt, MirrorWriter};

use crate::config::VaultConfig;
use crate::note::{note_stem, parse_note_id, render_note};
use crate::vault::{VaultError, VaultFs};

/// Writes one markdown note per committed concept into the concept folder.
///
/// Notes are keyed by title. Rewriting a note that carries the same id is a
/// plain overwrite, so replaying a commit is harmless. A note under the same
/// name that belongs to another concept, or that carries no concept id at
/// all, is left alone and the write fails.
#[derive(Debug, Clone)]
pub struct VaultMirror {
    fs: VaultFs,
    concept_dir: String,
}

impl VaultMirror {
    pub fn new(fs: VaultFs, concept_dir: impl Into<String>) -> Self {
        Self {
            fs,
            concept_dir: concept_dir.into().trim_matches('/').to_string(),
        }
    }

    /// Validate the vault from `config` and build a mirror over it.
    pub async fn from_config(mut config: VaultConfig) -> anyhow::Result<Self> {
        config.validate_vault().await?;
        let fs = VaultFs::new(config.vault_path, config.max_file_size);
        Ok(Self::new(fs, config.concept_dir))
    }

    pub fn vault(&self) -> &VaultFs {
        &self.fs
    }

    /// Vault-relative path of the note with the given stem.
    pub fn note_path(&self, stem: &str) -> String {
        format!("{}/{stem}.md", self.concept_dir)
    }

    /// Notes currently in the concept folder.
    pub async fn list_notes(&self) -> Result<Vec<String>, VaultError> {
        let names = self.fs.list_dir(&self.concept_dir).await?;
        Ok(names
            .into_iter()
            .filter(|name| name.ends_with(".md"))
            .collect())
    }

    async fn write_note(&self, concept: &ConceptMirror<'_>) -> Result<String, VaultError> {
        let node = concept.node;
        let path = self.note_path(&note_stem(node.id, &node.title));

        if self.fs.is_file(&path).await? {
            let existing = self.fs.read_file(&path).await?;
            match parse_note_id(&existing) {
                Some(id) if id == node.id => {
                    debug!(node_id = %node.id, path = %path, "Overwriting mirrored note");
                }
                Some(id) => {
                    return Err(VaultError::NoteConflict {
                        path,
                        existing: id,
                    })
                }
                None => return Err(VaultError::UnmanagedNote(path)),
            }
        }

        self.fs.write_file(&path, &render_note(concept)).await?;
        Ok(path)
    }
}

impl MirrorWriter for VaultMirror {
    async fn write_concept(&self, concept: &ConceptMirror<'_>) -> Result<MirrorReceipt, MirrorError> {
        let node_id = concept.node.id;
        match self.write_note(concept).await {
            Ok(location) => {
                debug!(node_id = %node_id, location = %location, "Mirrored concept");
                Ok(MirrorReceipt { node_id, location })
            }
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Mirror write failed");
                Err(MirrorError::new(node_id, e.to_string()))
            }
        }
    }
}
