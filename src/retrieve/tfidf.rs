//! Lexical TF-IDF retriever with cosine similarity.
//!
//! Unigrams plus bigrams, English stop words removed, vocabulary capped at
//! 1000 terms by document frequency. Vectors are L2 normalized at fit
//! time, so cosine similarity reduces to a dot product at query time.

use super::{document_text, rank_top_k, Retriever, ScoredCase};
use crate::error::RetrieverError;
use crate::schema::TestCase;
use std::collections::HashMap;

const MAX_FEATURES: usize = 1000;

/// Small English stop word list, matching the lexical filter the corpus
/// text is cleaned with before n-gram extraction.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "all", "also", "among", "an", "and", "any", "are", "as", "at",
    "be", "been", "before", "being", "below", "between", "but", "by", "can", "could", "did", "do",
    "does", "during", "each", "every", "for", "from", "had", "has", "have", "here", "how", "if",
    "in", "into", "is", "it", "its", "just", "may", "might", "must", "no", "not", "now", "of",
    "on", "only", "or", "should", "so", "some", "such", "than", "that", "the", "then", "there",
    "these", "this", "those", "through", "to", "up", "was", "were", "what", "when", "where",
    "which", "who", "whom", "whose", "why", "will", "with", "would",
];

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Lowercased alphanumeric unigrams (length >= 2, stop words removed) plus
/// bigrams over the surviving adjacent unigrams.
fn ngrams(text: &str) -> Vec<String> {
    let unigrams: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2 && !is_stop_word(w))
        .map(str::to_string)
        .collect();

    let mut terms = Vec::with_capacity(unigrams.len() * 2);
    for pair in unigrams.windows(2) {
        terms.push(format!("{} {}", pair[0], pair[1]));
    }
    terms.extend(unigrams);
    terms
}

pub struct TfidfRetriever {
    corpus: Vec<TestCase>,
    /// term -> (column, idf weight)
    vocabulary: HashMap<String, (usize, f32)>,
    /// One L2-normalized sparse vector (column -> weight) per document.
    vectors: Vec<HashMap<usize, f32>>,
    fitted: bool,
}

impl TfidfRetriever {
    pub fn new() -> Self {
        Self {
            corpus: Vec::new(),
            vocabulary: HashMap::new(),
            vectors: Vec::new(),
            fitted: false,
        }
    }

    fn embed(&self, text: &str) -> HashMap<usize, f32> {
        let mut counts: HashMap<usize, f32> = HashMap::new();
        for term in ngrams(text) {
            if let Some(&(column, idf)) = self.vocabulary.get(&term) {
                *counts.entry(column).or_insert(0.0) += idf;
            }
        }
        l2_normalize(&mut counts);
        counts
    }
}

impl Default for TfidfRetriever {
    fn default() -> Self {
        Self::new()
    }
}

impl Retriever for TfidfRetriever {
    fn fit(&mut self, corpus: &[TestCase]) {
        self.corpus = corpus.to_vec();
        self.vocabulary.clear();
        self.vectors.clear();

        let docs: Vec<Vec<String>> = corpus
            .iter()
            .map(|c| ngrams(&document_text(c)))
            .collect();

        // Document frequency per term.
        let mut df: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        // Cap the vocabulary at the most frequent terms. Ties break
        // alphabetically so the selection is deterministic.
        let mut terms: Vec<(&str, usize)> = df.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        terms.truncate(MAX_FEATURES);

        let n_docs = docs.len() as f32;
        for (column, (term, doc_freq)) in terms.into_iter().enumerate() {
            // Smoothed idf, always positive.
            let idf = ((1.0 + n_docs) / (1.0 + doc_freq as f32)).ln() + 1.0;
            self.vocabulary.insert(term.to_string(), (column, idf));
        }

        for doc in &docs {
            let mut vector: HashMap<usize, f32> = HashMap::new();
            for term in doc {
                if let Some(&(column, idf)) = self.vocabulary.get(term) {
                    *vector.entry(column).or_insert(0.0) += idf;
                }
            }
            l2_normalize(&mut vector);
            self.vectors.push(vector);
        }

        self.fitted = true;
    }

    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredCase>, RetrieverError> {
        if !self.fitted {
            return Err(RetrieverError::NotFitted);
        }
        let query_vector = self.embed(query);
        let scores: Vec<f32> = self
            .vectors
            .iter()
            .map(|doc| sparse_dot(&query_vector, doc))
            .collect();
        Ok(rank_top_k(&self.corpus, &scores, k))
    }
}

fn l2_normalize(vector: &mut HashMap<usize, f32>) {
    let norm = vector.values().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.values_mut() {
            *value /= norm;
        }
    }
}

fn sparse_dot(a: &HashMap<usize, f32>, b: &HashMap<usize, f32>) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(column, v)| large.get(column).map(|w| v * w))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::testutil::case;

    fn corpus() -> Vec<TestCase> {
        vec![
            case("tc_001", "Worker clocks in for a shift", "Tap the clock-in button"),
            case("tc_002", "Business posts a new shift", "Fill the shift posting form"),
            case("tc_003", "Payment processed after shift ends", "Complete the shift and wait"),
        ]
    }

    #[test]
    fn retrieve_before_fit_is_an_error() {
        let retriever = TfidfRetriever::new();
        assert!(matches!(
            retriever.retrieve("anything", 3),
            Err(RetrieverError::NotFitted)
        ));
    }

    #[test]
    fn most_relevant_document_ranks_first() {
        let mut retriever = TfidfRetriever::new();
        retriever.fit(&corpus());
        let results = retriever.retrieve("change clock-in flow for workers", 3).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0.id, "tc_001");
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn consecutive_retrievals_are_identical() {
        let mut retriever = TfidfRetriever::new();
        retriever.fit(&corpus());
        let first = retriever.retrieve("shift payment update", 3).unwrap();
        let second = retriever.retrieve("shift payment update", 3).unwrap();
        let ids = |r: &[ScoredCase]| r.iter().map(|(c, _)| c.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.1, b.1);
        }
    }

    #[test]
    fn orthogonal_query_returns_empty_result() {
        let mut retriever = TfidfRetriever::new();
        retriever.fit(&corpus());
        let results = retriever.retrieve("zebra quantum xylophone", 3).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn result_never_exceeds_k() {
        let mut retriever = TfidfRetriever::new();
        retriever.fit(&corpus());
        let results = retriever.retrieve("shift", 1).unwrap();
        assert!(results.len() <= 1);
    }

    #[test]
    fn refit_replaces_the_index() {
        let mut retriever = TfidfRetriever::new();
        retriever.fit(&corpus());
        retriever.fit(&[case("tc_009", "Totally unrelated corpus", "Press some other button")]);
        let results = retriever.retrieve("clock-in shift worker", 5).unwrap();
        assert!(results.iter().all(|(c, _)| c.id == "tc_009"));
    }

    #[test]
    fn stop_word_list_is_sorted_for_binary_search() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }
}
