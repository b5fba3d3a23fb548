//! Near-duplicate detection for extracted learnings.
//!
//! Two learnings are duplicates when their titles are equal (case-insensitive,
//! trimmed) or when the Jaccard overlap of their significant words reaches the
//! threshold. Stop words are dropped before comparing.

use std::collections::HashSet;

use crate::memory::types::Learning;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
    "during", "before", "after", "above", "below", "this", "that", "these", "those", "it",
    "its",
];

/// Lowercased significant words of `text`.
pub fn significant_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity of two word sets; 0.0 when either is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Word-overlap similarity of two texts.
pub fn similarity(a: &str, b: &str) -> f64 {
    jaccard(&significant_words(a), &significant_words(b))
}

fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Outcome of checking one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupMatch {
    Unique,
    /// Duplicates a stored learning with this id.
    Existing(String),
    /// Duplicates an earlier candidate from the same batch.
    Batch,
}

struct Entry {
    id: Option<String>,
    title: String,
    words: HashSet<String>,
}

/// Stored learnings plus accepted candidates, checked in insertion order.
pub struct DedupIndex {
    entries: Vec<Entry>,
    threshold: f64,
}

impl DedupIndex {
    pub fn new(threshold: f64) -> Self {
        Self {
            entries: Vec::new(),
            threshold,
        }
    }

    /// Index stored learnings by title, content and category.
    pub fn from_existing(existing: &[Learning], threshold: f64) -> Self {
        let mut index = Self::new(threshold);
        for learning in existing {
            let text = format!(
                "{} {} {}",
                learning.title,
                learning.content,
                learning.category.as_deref().unwrap_or_default()
            );
            index.entries.push(Entry {
                id: Some(learning.id.clone()),
                title: title_key(&learning.title),
                words: significant_words(&text),
            });
        }
        index
    }

    /// Check a candidate against everything indexed so far.
    pub fn check(&self, title: &str, text: &str) -> DedupMatch {
        let key = title_key(title);
        let words = significant_words(text);
        let hit = self
            .entries
            .iter()
            .find(|e| e.title == key || jaccard(&e.words, &words) >= self.threshold);
        match hit {
            None => DedupMatch::Unique,
            Some(Entry { id: Some(id), .. }) => DedupMatch::Existing(id.clone()),
            Some(Entry { id: None, .. }) => DedupMatch::Batch,
        }
    }

    /// Record an accepted candidate so later candidates are checked against it.
    pub fn insert(&mut self, title: &str, text: &str) {
        self.entries.push(Entry {
            id: None,
            title: title_key(title),
            words: significant_words(text),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
