//! Hashed bag-of-words retriever.
//!
//! Tokens are hashed into a fixed-width dense vector (384 dims), weighted
//! by term frequency and L2 normalized, then searched with an exact flat
//! inner-product scan. With normalized vectors, inner product equals
//! cosine similarity. Hashing uses FNV-1a with a fixed offset basis, not
//! the standard library's randomized hasher, so rankings are reproducible
//! across processes.

use super::{document_text, rank_top_k, Retriever, ScoredCase};
use crate::error::RetrieverError;
use crate::schema::TestCase;

pub const EMBEDDING_DIM: usize = 384;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Embed text into a normalized dense vector. Tokens are lowercased,
/// stripped to alphanumerics, and dropped when shorter than 3 chars.
pub(crate) fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for word in text.to_lowercase().split_whitespace() {
        let token: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if token.chars().count() > 2 {
            let dim = (fnv1a(&token) % EMBEDDING_DIM as u64) as usize;
            vector[dim] += 1.0;
        }
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

pub struct HashedRetriever {
    corpus: Vec<TestCase>,
    vectors: Vec<Vec<f32>>,
    fitted: bool,
}

impl HashedRetriever {
    pub fn new() -> Self {
        Self {
            corpus: Vec::new(),
            vectors: Vec::new(),
            fitted: false,
        }
    }
}

impl Default for HashedRetriever {
    fn default() -> Self {
        Self::new()
    }
}

impl Retriever for HashedRetriever {
    fn fit(&mut self, corpus: &[TestCase]) {
        self.corpus = corpus.to_vec();
        self.vectors = corpus
            .iter()
            .map(|case| embed(&document_text(case)))
            .collect();
        self.fitted = true;
    }

    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredCase>, RetrieverError> {
        if !self.fitted {
            return Err(RetrieverError::NotFitted);
        }
        let query_vector = embed(query);
        let scores: Vec<f32> = self
            .vectors
            .iter()
            .map(|doc| doc.iter().zip(&query_vector).map(|(a, b)| a * b).sum())
            .collect();
        Ok(rank_top_k(&self.corpus, &scores, k))
    }
}
