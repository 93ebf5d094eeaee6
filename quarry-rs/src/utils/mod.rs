//! Shared utilities: text normalization, vector similarity, and graph
//! timestamp formatting.

pub mod datetime;
pub mod similarity;
pub mod text;

pub use datetime::{format_graph_datetime, parse_graph_datetime};
pub use similarity::{cosine_similarity, normalize_l2, similarity_score};
pub use text::{excerpt, extract_json_from_response, normalize_whitespace, truncate_with_ellipsis};
