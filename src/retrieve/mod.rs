//! Relevance retrieval over the test case corpus.
//!
//! Two interchangeable backends behind one trait: a lexical TF-IDF
//! vectorizer with cosine similarity, and a hashed bag-of-words embedding
//! with an exact inner-product scan. Both are selected by configuration so
//! the orchestrator never branches on the backend.
//!
//! # Limitation
//!
//! Neither backend supports incremental updates: `fit` replaces the entire
//! index, and callers re-fit on the current corpus at the start of each
//! run.

mod hashed;
mod tfidf;

pub use hashed::HashedRetriever;
pub use tfidf::TfidfRetriever;

use crate::error::RetrieverError;
use crate::schema::TestCase;

/// A corpus document paired with its similarity to the query. Scores are
/// in descending order; higher means more similar.
pub type ScoredCase = (TestCase, f32);

pub trait Retriever: Send {
    /// Build the index over the corpus, replacing any previous index.
    fn fit(&mut self, corpus: &[TestCase]);

    /// Top-`k` documents by similarity to `query`, excluding non-positive
    /// scores. The result may be shorter than `k`, including empty.
    /// Equal scores tie-break by original corpus order, so the ranking is
    /// reproducible for a fixed corpus and query.
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredCase>, RetrieverError>;
}

/// Backend selection, parsed from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieverBackend {
    Tfidf,
    Hashed,
}

impl RetrieverBackend {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "tfidf" => Some(Self::Tfidf),
            "hashed" => Some(Self::Hashed),
            _ => None,
        }
    }

    pub fn build(self) -> Box<dyn Retriever> {
        match self {
            Self::Tfidf => Box::new(TfidfRetriever::new()),
            Self::Hashed => Box::new(HashedRetriever::new()),
        }
    }
}

/// Concatenated text representation of a test case used by both backends:
/// title, kind, preconditions, and every step action and expected outcome.
pub(crate) fn document_text(case: &TestCase) -> String {
    let mut parts: Vec<&str> = vec![&case.title, case.kind.as_str()];
    if let Some(pre) = &case.preconditions {
        parts.push(pre);
    }
    for step in &case.steps {
        parts.push(&step.action);
        parts.push(&step.expected_outcome);
    }
    parts.join(" ")
}

/// Rank scores descending with index-order tie-break, keep positive scores,
/// truncate to `k`, and map back to owned cases.
pub(crate) fn rank_top_k(corpus: &[TestCase], scores: &[f32], k: usize) -> Vec<ScoredCase> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
        .into_iter()
        .filter(|&i| scores[i] > 0.0)
        .take(k)
        .map(|i| (corpus[i].clone(), scores[i]))
        .collect()
}
