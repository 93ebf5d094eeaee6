//! # quarry-vault
//!
//! Mirrors concepts committed by `quarry-rs` into an Obsidian vault: one
//! markdown note per concept with front matter, summaries, a wikilink per
//! relation and the quotations that support it.

pub mod config;
pub mod mirror;
pub mod note;
pub mod vault;

pub use config::VaultConfig;
pub use mirror::VaultMirror;
pub use vault::{VaultError, VaultFs};
