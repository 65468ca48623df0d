//! Term-overlap scoring shared by keyword search and graph entity matching.

use std::collections::HashSet;

/// Lower-cased alphanumeric terms of `text`.
pub fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Share of `query_terms` present in `text`, in `[0, 1]`.
pub fn coverage(query_terms: &HashSet<String>, text: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = terms(text);
    let hits = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
    hits as f64 / query_terms.len() as f64
}
