//! Proper-name heuristics for queries and for index-time entity tagging.
//!
//! [`NameExtractor`] pulls candidate name terms out of a query: quoted names
//! first, then every capitalised token outside the quotes that is not on the
//! stop list. Adjacent capitalised tokens are not merged, so
//! `John Smith` yields `John` and `Smith`.
//!
//! [`HeuristicEntityClassifier`] is the index-time counterpart. It does merge
//! multi-word names and tags everything it finds as `person:<Name>`.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use vaultrag_models::{EntityClassifier, typed_entity};

static NAME_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*)"|'([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*)'"#)
        .expect("quoted name pattern is valid")
});
static NAME_MULTI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").expect("multi-word name pattern is valid")
});
static NAME_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]{2,})\b").expect("single name pattern is valid"));
static QUERY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-zA-Z]{2,}\b").expect("query token pattern is valid"));

/// Capitalised words that are almost never names.
pub const STOP_WORDS: &[&str] = &[
    // question words, articles, prepositions, conjunctions
    "What", "When", "Where", "Which", "Who", "Why", "How", "The", "In", "On", "For", "And", "Or",
    "Of", "Last", "Past", "Previous", "Most", "Recent", "Latest",
    // pronouns and possessives
    "I", "We", "Us", "Me", "My", "Our", "Ours", "You", "Your", "Yours", "He", "She", "They", "Them",
    "His", "Her", "Their",
    // common title words
    "Notes", "Note", "Quick", "Catch", "Up", "Catch-up", "Todo", "To", "Do", "Tasks", "Task",
    "Meeting", "Meet", "Journal", "Daily", "Weights", "Ideas", "Agent", "Talk", "Talked", "About",
    "From", "With", "At",
    // sentence openers
    "Did", "Does", "Tell", "Show", "Find", "List", "Any", "Anything", "Can", "Could", "Please",
    "Summarize", "Summarise", "This", "That", "Today", "Yesterday", "Tomorrow",
    // days
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    // months
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December", "Jan", "Feb", "Mar", "Apr", "Jun", "Jul", "Aug", "Sep",
    "Sept", "Oct", "Nov", "Dec",
];

fn quoted_names(text: &str) -> impl Iterator<Item = regex::Match<'_>> {
    NAME_QUOTED
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
}

/// Query-time name term extraction.
#[derive(Debug, Clone)]
pub struct NameExtractor {
    stop_words: HashSet<String>,
}

impl Default for NameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl NameExtractor {
    pub fn new() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    pub fn with_extra_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_words.extend(words.into_iter().map(Into::into));
        self
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    /// Name terms in `text`: quoted names in order of appearance, then
    /// capitalised tokens outside the quotes in order of appearance.
    /// Exact duplicates are dropped.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        let mut quoted_spans = Vec::new();

        for m in quoted_names(text) {
            // Include the surrounding quotes in the masked span.
            quoted_spans.push(m.start().saturating_sub(1)..m.end() + 1);
            push_unique(&mut terms, m.as_str().trim());
        }

        for m in QUERY_TOKEN.find_iter(text) {
            if quoted_spans.iter().any(|span| span.contains(&m.start())) {
                continue;
            }
            if !self.is_stop_word(m.as_str()) {
                push_unique(&mut terms, m.as_str());
            }
        }

        terms
    }
}

fn push_unique(terms: &mut Vec<String>, term: &str) {
    if !term.is_empty() && !terms.iter().any(|t| t == term) {
        terms.push(term.to_string());
    }
}

/// Tags capitalised names as `person:<Name>` without any model.
#[derive(Debug, Clone, Default)]
pub struct HeuristicEntityClassifier {
    names: NameExtractor,
}

impl HeuristicEntityClassifier {
    pub fn new(names: NameExtractor) -> Self {
        Self { names }
    }

    /// Quoted names, multi-word capitalised sequences and single capitalised
    /// tokens, deduplicated without regard to case.
    pub fn people(&self, text: &str) -> Vec<String> {
        let mut found: Vec<&str> = quoted_names(text).map(|m| m.as_str()).collect();
        found.extend(NAME_MULTI.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str()));
        found.extend(
            NAME_SINGLE
                .captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str())
                .filter(|t| !self.names.is_stop_word(t)),
        );

        let mut seen = HashSet::new();
        found
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty() && seen.insert(p.to_lowercase()))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl EntityClassifier for HeuristicEntityClassifier {
    async fn extract(&self, text: &str) -> vaultrag_models::Result<Vec<String>> {
        Ok(self
            .people(text)
            .iter()
            .filter_map(|name| typed_entity("PERSON", name))
            .collect())
    }

    fn classifier_name(&self) -> &str {
        "heuristic"
    }
}
