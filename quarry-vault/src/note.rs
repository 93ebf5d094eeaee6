//! Markdown rendering of a committed concept.
//!
//! A note is YAML front matter followed by the title, both summaries, one
//! `[[wikilink]]` per relation and the supporting quotations. Front matter
//! strings are written as JSON strings, which YAML reads unchanged.

use std::fmt::Write as _;

use uuid::Uuid;

use quarry_rs::mirror::{ConceptMirror, MirrorLink};

use crate::vault::sanitize_file_stem;

/// Tag put on every concept note.
pub const CONCEPT_TAG: &str = "concept";

/// File stem of the note for a concept, falling back to the id when the
/// title has no usable characters.
pub fn note_stem(id: Uuid, title: &str) -> String {
    sanitize_file_stem(title).unwrap_or_else(|| id.to_string())
}

/// Render the full note for one concept.
pub fn render_note(concept: &ConceptMirror<'_>) -> String {
    let node = concept.node;
    let mut out = String::new();

    out.push_str("---\n");
    let _ = writeln!(out, "id: {}", node.id);
    let _ = writeln!(out, "title: {}", yaml_string(&node.title));
    let _ = writeln!(out, "created_at: {}", node.created_at.to_rfc3339());
    if let Some(run_id) = node.run_id {
        let _ = writeln!(out, "run_id: {run_id}");
    }
    let _ = writeln!(out, "tags: [{CONCEPT_TAG}]");
    out.push_str("---\n\n");

    let _ = writeln!(out, "# {}\n", node.title);
    if !node.short_summary.is_empty() {
        let _ = writeln!(out, "> {}\n", node.short_summary);
    }
    if !node.long_summary.is_empty() {
        let _ = writeln!(out, "{}\n", node.long_summary.trim());
    }

    if !concept.outgoing.is_empty() {
        out.push_str("## Relations\n\n");
        for link in sorted(&concept.outgoing) {
            let _ = writeln!(out, "- **{}** {}", link.kind, wikilink(concept, link.node_id));
        }
        out.push('\n');
    }

    if !concept.incoming.is_empty() {
        out.push_str("## Referenced by\n\n");
        for link in sorted(&concept.incoming) {
            let _ = writeln!(out, "- {} **{}**", wikilink(concept, link.node_id), link.kind);
        }
        out.push('\n');
    }

    if !concept.evidence.is_empty() {
        out.push_str("## Evidence\n\n");
        for unit in &concept.evidence {
            for line in unit.text.trim().lines() {
                let _ = writeln!(out, "> {line}");
            }
            match &unit.attribution {
                Some(who) => {
                    let _ = writeln!(out, "> (by {who}, `{}`)", unit.id);
                }
                None => {
                    let _ = writeln!(out, "> (`{}`)", unit.id);
                }
            }
            out.push('\n');
        }
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push('\n');
    out
}

/// Read the concept id out of a note's front matter.
pub fn parse_note_id(content: &str) -> Option<Uuid> {
    let mut lines = content.lines();
    if lines.next()?.trim() != "---" {
        return None;
    }
    lines
        .take_while(|line| line.trim() != "---")
        .find_map(|line| line.strip_prefix("id:"))
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
}

fn wikilink(concept: &ConceptMirror<'_>, id: Uuid) -> String {
    match concept.titles.resolve(id) {
        Some(title) => {
            let stem = note_stem(id, title);
            if stem == title {
                format!("[[{stem}]]")
            } else {
                format!("[[{stem}|{}]]", title.replace(['[', ']', '|'], ""))
            }
        }
        None => format!("[[{id}]]"),
    }
}

fn sorted(links: &[MirrorLink]) -> Vec<&MirrorLink> {
    let mut links: Vec<&MirrorLink> = links.iter().collect();
    links.sort();
    links.dedup();
    links
}

fn yaml_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
