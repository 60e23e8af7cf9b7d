// src/text_index.rs
// Inverted index for full-text search with TF-IDF ranking

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::document::DocumentId;
use crate::index::IndexDefinition;
use crate::value_utils::get_nested_value;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\w+").unwrap();
}

/// Split text into lowercase terms, dropping single-character words.
///
/// ```
/// use docvault_core::text_index::tokenize;
///
/// assert_eq!(tokenize("Rust is a Systems language!"), vec!["rust", "is", "systems", "language"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|word| word.chars().count() > 1)
        .collect()
}

/// Whether a document must contain every query term or just one of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    All,
    Any,
}

/// A search hit with its relevance score (higher = more relevant)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub doc_id: DocumentId,
    pub score: f64,
    pub document: Value,
}

/// Term -> documents posting lists over the configured string fields
#[derive(Debug, Clone)]
pub struct TextIndex {
    definition: IndexDefinition,
    postings: AHashMap<String, BTreeSet<DocumentId>>,
}

impl TextIndex {
    pub fn new(definition: IndexDefinition) -> Self {
        TextIndex {
            definition,
            postings: AHashMap::new(),
        }
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn fields(&self) -> &[String] {
        &self.definition.fields
    }

    /// All terms of the indexed fields of `doc`, in field order
    pub fn document_terms(&self, doc: &Value) -> Vec<String> {
        let mut terms = Vec::new();
        for field in &self.definition.fields {
            if let Some(Value::String(text)) = get_nested_value(doc, field) {
                terms.extend(tokenize(text));
            }
        }
        terms
    }

    pub fn insert(&mut self, doc_id: &DocumentId, doc: &Value) {
        for term in self.document_terms(doc) {
            self.postings.entry(term).or_default().insert(doc_id.clone());
        }
    }

    /// Documents that ever contained at least one of `terms`
    pub fn candidates(&self, terms: &[String]) -> BTreeSet<DocumentId> {
        terms
            .iter()
            .filter_map(|term| self.postings.get(term))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.postings.clear();
    }

    pub fn entry_count(&self) -> usize {
        self.postings.values().map(BTreeSet::len).sum()
    }

    /// Score visible documents against the query terms.
    ///
    /// `docs` must hold every visible document containing any query term;
    /// `total_docs` is the visible collection size. IDF is smoothed as
    /// `ln(1 + N / df)` so terms present in every document still count.
    pub fn rank(
        &self,
        terms: &[String],
        docs: Vec<(DocumentId, Arc<Value>)>,
        total_docs: usize,
        mode: MatchMode,
    ) -> Vec<SearchResult> {
        let query: BTreeSet<&str> = terms.iter().map(String::as_str).collect();
        if query.is_empty() {
            return Vec::new();
        }

        let mut frequencies = Vec::with_capacity(docs.len());
        let mut doc_freq: AHashMap<&str, usize> = AHashMap::new();

        for (id, doc) in docs {
            let doc_terms = self.document_terms(&doc);
            let total = doc_terms.len();
            let mut counts: AHashMap<&str, usize> = AHashMap::new();
            for term in &doc_terms {
                if let Some(q) = query.get(term.as_str()) {
                    *counts.entry(*q).or_insert(0) += 1;
                }
            }
            if counts.is_empty() {
                continue;
            }
            for term in counts.keys() {
                *doc_freq.entry(*term).or_insert(0) += 1;
            }
            let tf: Vec<(&str, f64)> = counts
                .into_iter()
                .map(|(term, count)| (term, count as f64 / total as f64))
                .collect();
            frequencies.push((id, doc, tf));
        }

        let total_docs = total_docs.max(frequencies.len()).max(1) as f64;
        let mut results: Vec<SearchResult> = frequencies
            .into_iter()
            .filter(|(_, _, tf)| mode == MatchMode::Any || tf.len() == query.len())
            .map(|(doc_id, doc, tf)| {
                let score = tf
                    .iter()
                    .map(|(term, tf)| {
                        let df = doc_freq.get(term).copied().unwrap_or(1) as f64;
                        tf * (1.0 + total_docs / df).ln()
                    })
                    .sum();
                SearchResult {
                    doc_id,
                    score,
                    document: doc.as_ref().clone(),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> TextIndex {
        TextIndex::new(IndexDefinition::text(
            "content",
            vec!["title".to_string(), "body".to_string()],
        ))
    }

    fn docs() -> Vec<(DocumentId, Arc<Value>)> {
        vec![
            (
                DocumentId::Int(1),
                Arc::new(json!({"title": "Rust storage", "body": "rust rust engine"})),
            ),
            (
                DocumentId::Int(2),
                Arc::new(json!({"title": "Storage engines", "body": "written in C"})),
            ),
            (
                DocumentId::Int(3),
                Arc::new(json!({"title": "Gardening", "body": 42})),
            ),
        ]
    }

    #[test]
    fn test_tokenize_lowercases_and_filters() {
        assert_eq!(tokenize("A Quick-Fox, jumps"), vec!["quick", "fox", "jumps"]);
        assert!(tokenize("a b c").is_empty());
        assert_eq!(tokenize("Ærlig TALE"), vec!["ærlig", "tale"]);
    }

    #[test]
    fn test_postings_cover_all_fields() {
        let mut idx = index();
        for (id, doc) in docs() {
            idx.insert(&id, &doc);
        }
        let hits = idx.candidates(&["storage".to_string()]);
        assert_eq!(hits.len(), 2);
        assert!(idx.candidates(&["42".to_string()]).is_empty());
    }

    #[test]
    fn test_rank_all_vs_any() {
        let idx = index();
        let terms = tokenize("rust storage");

        let all = idx.rank(&terms, docs(), 3, MatchMode::All);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].doc_id, DocumentId::Int(1));

        let any = idx.rank(&terms, docs(), 3, MatchMode::Any);
        assert_eq!(any.len(), 2);
        assert_eq!(any[0].doc_id, DocumentId::Int(1));
        assert!(any[0].score > any[1].score);
    }
}
