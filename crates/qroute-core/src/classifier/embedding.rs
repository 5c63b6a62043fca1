//! SimHash-based local text encoder.
//!
//! Produces deterministic, fixed-dimension embeddings by hashing word tokens
//! and character bigrams with [`std::hash::DefaultHasher`] and spreading the
//! hash bits across a float vector, one signed contribution per dimension.
//! The result is normalized to unit length.
//!
//! Character bigrams let Hangul text without whitespace-separated morphemes
//! (e.g. "작성해줘" vs "작성해") still share features.

use std::hash::{DefaultHasher, Hash, Hasher};

use super::keywords::tokenize;

/// Default embedding dimension
pub const DEFAULT_DIMENSION: usize = 256;

const WORD_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic SimHash encoder
#[derive(Debug, Clone)]
pub struct HashEncoder {
    dimension: usize,
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode `text`. Empty input yields the zero vector.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(&text.to_lowercase());

        for token in &tokens {
            self.accumulate(&mut vector, token, WORD_WEIGHT);

            let chars: Vec<char> = token.chars().collect();
            for pair in chars.windows(2) {
                self.accumulate(&mut vector, pair, BIGRAM_WEIGHT);
            }
        }

        normalize(&mut vector);
        vector
    }

    fn accumulate<T: Hash + ?Sized>(&self, vector: &mut [f32], feature: &T, weight: f32) {
        // one fresh 64-bit hash per 64 dimensions keeps the bits independent
        for (chunk, dims) in vector.chunks_mut(64).enumerate() {
            let mut hasher = DefaultHasher::new();
            chunk.hash(&mut hasher);
            feature.hash(&mut hasher);
            let hash = hasher.finish();

            for (bit, val) in dims.iter_mut().enumerate() {
                if (hash >> bit) & 1 == 1 {
                    *val += weight;
                } else {
                    *val -= weight;
                }
            }
        }
    }
}

/// Scale `vector` to unit L2 norm, leaving a zero vector unchanged
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

/// Cosine similarity. Zero when either vector has no magnitude.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Unit-normalized mean of the encodings of `examples`
pub fn centroid(encoder: &HashEncoder, examples: &[&str]) -> Vec<f32> {
    let mut sum = vec![0.0f32; encoder.dimension()];
    for example in examples {
        for (acc, v) in sum.iter_mut().zip(encoder.encode(example)) {
            *acc += v;
        }
    }
    normalize(&mut sum);
    sum
}
