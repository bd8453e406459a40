// crates/core/src/captions.rs
//! Caption generation capability.
//!
//! The session ticker only needs "give me the next caption"; how the text is
//! produced is up to the implementation injected into the server state.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::GenerateError;

/// Produces caption text on demand.
#[async_trait]
pub trait CaptionGenerator: Send + Sync {
    async fn generate(&self) -> Result<String, GenerateError>;
}

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "ad", "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi",
    "aliquip", "ex", "ea", "commodo", "consequat", "duis", "aute", "irure", "in", "reprehenderit",
    "voluptate", "velit", "esse", "cillum", "fugiat", "nulla", "pariatur", "excepteur", "sint",
    "occaecat", "cupidatat", "non", "proident", "sunt", "culpa", "qui", "officia", "deserunt",
    "mollit", "anim", "id", "est", "laborum",
];

/// Placeholder captions: one random lorem-ipsum sentence per call.
#[derive(Debug, Clone, Copy)]
pub struct LoremCaptions {
    min_words: usize,
    max_words: usize,
}

impl LoremCaptions {
    pub fn new() -> Self {
        Self {
            min_words: 4,
            max_words: 10,
        }
    }

    fn sentence<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let count = rng.gen_range(self.min_words..=self.max_words);
        let words: Vec<&str> = (0..count)
            .filter_map(|_| WORDS.choose(&mut *rng).copied())
            .collect();

        let mut sentence = words.join(" ");
        if let Some(first) = sentence.get(0..1) {
            let upper = first.to_ascii_uppercase();
            sentence.replace_range(0..1, &upper);
        }
        sentence.push('.');
        sentence
    }
}

impl Default for LoremCaptions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptionGenerator for LoremCaptions {
    async fn generate(&self) -> Result<String, GenerateError> {
        let sentence = self.sentence(&mut rand::thread_rng());
        Ok(sentence)
    }
}

/// Always returns the same text. Counts calls so tests can assert on them.
#[derive(Debug)]
pub struct FixedCaptions {
    text: String,
    calls: AtomicUsize,
}

impl FixedCaptions {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptionGenerator for FixedCaptions {
    async fn generate(&self) -> Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}
