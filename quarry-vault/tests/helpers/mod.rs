#![allow(dead_code)]

use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use quarry_rs::nodes::ConceptNode;
use quarry_vault::{VaultConfig, VaultFs, VaultMirror};

pub const CONCEPT_DIR: &str = "Concepts";

/// Temporary vault directory with helpers for building integration tests.
pub struct TempVault {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TempVault {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp vault dir");
        let path = std::fs::canonicalize(dir.path()).expect("canonicalize temp vault");
        Self { dir, path }
    }

    /// Write a file relative to the vault root.
    pub fn write(&self, rel: &str, content: &str) -> &Self {
        let full = self.path.join(rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&full, content).expect("write test file");
        self
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path.join(rel)).expect("read vault file")
    }

    pub fn config(&self) -> VaultConfig {
        VaultConfig {
            vault_path: self.path.clone(),
            concept_dir: CONCEPT_DIR.to_string(),
            max_file_size: 1024 * 1024,
        }
    }

    pub fn mirror(&self) -> VaultMirror {
        VaultMirror::new(VaultFs::new(self.path.clone(), 1024 * 1024), CONCEPT_DIR)
    }
}

pub fn concept(title: &str) -> ConceptNode {
    ConceptNode {
        id: Uuid::new_v4(),
        title: title.to_string(),
        short_summary: format!("{title}, briefly."),
        long_summary: format!("{title}, briefly. At length as well."),
        embedding: vec![],
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        run_id: Some(Uuid::new_v4()),
    }
}
