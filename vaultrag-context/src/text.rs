//! Turns one note into the ordered chunks that get embedded and stored.
//!
//! A note passes through four stages, each working on the output of the one
//! before it:
//!
//! 1. **Date headings.** Lines such as `## 2025-10-11` or `**11/10/2025:**`
//!    open a new dated section and are consumed. Text before the first such
//!    line forms an undated section.
//! 2. **Markdown headers.** Inside each dated section, `#`, `##` and `###`
//!    lines open a new sub-section. The header line stays at the top of its
//!    sub-section so it is embedded along with the body.
//! 3. **Sentence packing.** Sentences are packed greedily until the next one
//!    would push the chunk past `chunk_size` characters.
//! 4. **Character fallback.** A packed chunk longer than 1.5 × `chunk_size`
//!    (one enormous sentence, a table, a pasted log) is cut on character
//!    boundaries.
//!
//! Finally, chunks shorter than `min_chunk_chars` are dropped, except the last
//! chunk of each sub-section, and `chunk_index` is assigned in emission order.
//!
//! # Passage format
//!
//! What gets embedded is not the bare chunk text but [`TextChunk::build`]:
//!
//! ```text
//! passage: {"title":"Weekly review","source":"journal/2025.md","entry_date":"2025-03-10","entities":["person:Alice"]}
//!
//! Caught up with Alice about the roadmap.
//! ```
//!
//! # Usage
//!
//! ```
//! use chrono::NaiveDate;
//! use vaultrag_context::text::{ChunkingConfig, NoteChunker};
//!
//! let note = "Intro line that has no date at all.\n\
//!             ## 2025-03-10\n\
//!             Met Alice for coffee. We talked about the garden.\n";
//! let chunker = NoteChunker::new("journal.md", "journal", ChunkingConfig::default())
//!     .with_fallback_date(NaiveDate::from_ymd_opt(2025, 3, 1));
//! let chunks = chunker.get_chunks(note);
//!
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].entry_date, NaiveDate::from_ymd_opt(2025, 3, 1));
//! assert_eq!(chunks[1].entry_date, NaiveDate::from_ymd_opt(2025, 3, 10));
//! assert_eq!(chunks[1].chunk_index, 1);
//! ```

use crate::dates::{date_to_timestamp, heading_date};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;

static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,3}\s+\S").expect("header pattern is valid"));
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](\s+)").expect("sentence pattern is valid"));

/// Size limits for chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks. Any non-zero value also
    /// carries the last sentence of a chunk into the next one.
    pub chunk_overlap: usize,
    /// Chunks shorter than this are dropped unless they end their section.
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 900,
            chunk_overlap: 150,
            min_chunk_chars: 40,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_min_chunk_chars(mut self, min_chunk_chars: usize) -> Self {
        self.min_chunk_chars = min_chunk_chars;
        self
    }

    /// Length above which a packed chunk is force-split by characters.
    fn oversize_limit(&self) -> usize {
        self.chunk_size + self.chunk_size / 2
    }
}

/// A span of a note scoped to one date heading (or to none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateSection<'a> {
    pub entry_date: Option<NaiveDate>,
    pub text: &'a str,
}

/// One retrievable piece of a note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    /// Vault-relative path of the note.
    pub source: String,
    pub title: String,
    /// Zero-based position among the note's chunks.
    pub chunk_index: usize,
    /// The section's heading date, or the note's fallback date.
    pub entry_date: Option<NaiveDate>,
    /// Typed entity strings such as `person:Alice`.
    pub entities: Vec<String>,
    pub text: String,
}

/// Chunks one note. Holds the note-level metadata every chunk inherits.
#[derive(Debug, Clone)]
pub struct NoteChunker {
    source: String,
    title: String,
    fallback_date: Option<NaiveDate>,
    config: ChunkingConfig,
}

impl NoteChunker {
    pub fn new(source: impl Into<String>, title: impl Into<String>, config: ChunkingConfig) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            fallback_date: None,
            config,
        }
    }

    /// Date used for sections that carry no date heading, normally the
    /// note's modification day.
    pub fn with_fallback_date(mut self, date: Option<NaiveDate>) -> Self {
        self.fallback_date = date;
        self
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Runs the whole pipeline over `content`.
    ///
    /// The output is deterministic for a given input and configuration, and
    /// `chunk_index` runs `0..n` without gaps.
    pub fn get_chunks(&self, content: &str) -> Vec<TextChunk> {
        let mut chunks = Vec::new();

        for section in split_by_date_headings(content) {
            let entry_date = section.entry_date.or(self.fallback_date);

            for sub_section in split_by_headers(section.text) {
                let pieces = self.pack_section(sub_section);
                let last = pieces.len().saturating_sub(1);

                for (i, text) in pieces.into_iter().enumerate() {
                    if i != last && text.chars().count() < self.config.min_chunk_chars {
                        continue;
                    }
                    chunks.push(TextChunk {
                        source: self.source.clone(),
                        title: self.title.clone(),
                        chunk_index: chunks.len(),
                        entry_date,
                        entities: Vec::new(),
                        text,
                    });
                }
            }
        }

        chunks
    }

    fn pack_section(&self, text: &str) -> Vec<String> {
        let packed = sentence_chunks(text, self.config.chunk_size, self.config.chunk_overlap);
        let mut out = Vec::with_capacity(packed.len());
        for chunk in packed {
            if chunk.chars().count() > self.config.oversize_limit() {
                out.extend(char_split(
                    &chunk,
                    self.config.chunk_size,
                    self.config.chunk_overlap,
                ));
            } else {
                out.push(chunk);
            }
        }
        out
    }
}

/// Splits a note into sections keyed by date-heading lines.
///
/// Heading lines are consumed. Sections that are empty after trimming are
/// dropped, and a note with no date headings at all comes back as a single
/// undated section holding the whole text.
pub fn split_by_date_headings(text: &str) -> Vec<DateSection<'_>> {
    let mut sections = Vec::new();
    let mut section_start = 0;
    let mut section_date = None;
    let mut pos = 0;

    for line in text.split_inclusive('\n') {
        if let Some(date) = heading_date(line) {
            if pos > section_start {
                sections.push(DateSection {
                    entry_date: section_date,
                    text: text[section_start..pos].trim(),
                });
            }
            section_date = Some(date);
            section_start = pos + line.len();
        }
        pos += line.len();
    }
    if section_start < text.len() {
        sections.push(DateSection {
            entry_date: section_date,
            text: text[section_start..].trim(),
        });
    }

    sections.retain(|s| !s.text.is_empty());
    if sections.is_empty() {
        sections.push(DateSection {
            entry_date: None,
            text,
        });
    }
    sections
}

/// Splits on `#`, `##` and `###` header lines, keeping each header at the top
/// of the section it opens. Lines inside fenced code blocks never split.
pub fn split_by_headers(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut section_start = 0;
    let mut pos = 0;
    let mut in_fence = false;

    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence && HEADER_LINE.is_match(line) && pos > section_start {
            sections.push(&text[section_start..pos]);
            section_start = pos;
        }
        pos += line.len();
    }
    sections.push(&text[section_start..]);

    sections
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Splits after `.`, `!` or `?` when followed by whitespace.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for caps in SENTENCE_END.captures_iter(text) {
        let Some(gap) = caps.get(1) else { continue };
        out.push(&text[start..gap.start()]);
        start = gap.end();
    }
    out.push(&text[start..]);
    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Greedily packs sentences into chunks of roughly `target_size` characters.
///
/// A sentence longer than the target still becomes its own chunk; callers cut
/// those down with [`char_split`]. With a non-zero `overlap`, the last sentence
/// of each flushed chunk opens the next one.
pub fn sentence_chunks(text: &str, target_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for sentence in sentences(text.trim()) {
        let len = sentence.chars().count();
        if current_len + len > target_size && !current.is_empty() {
            chunks.push(current.join(" "));
            let carried = if overlap > 0 { current.last().copied() } else { None };
            current.clear();
            current_len = 0;
            if let Some(carried) = carried {
                current.push(carried);
                current_len = carried.chars().count();
            }
        }
        current.push(sentence);
        current_len += len + 1;
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Cuts `text` into pieces of at most `size` characters, each starting
/// `overlap` characters before the previous one ended.
///
/// When there is whitespace in the last quarter of a window the cut is moved
/// back to it so words stay whole. Offsets are counted in characters, so
/// multi-byte text is never split inside a code point.
pub fn char_split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let total = bounds.len() - 1;

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < total {
        if total - start <= size {
            pieces.push(text[bounds[start]..].trim().to_string());
            break;
        }
        let hard_end = start + size;
        let soft_floor = start + size - size / 4;
        let end = (soft_floor..hard_end)
            .rev()
            .find(|&i| text[bounds[i]..].starts_with(char::is_whitespace))
            .filter(|&i| i > start)
            .unwrap_or(hard_end);
        pieces.push(text[bounds[start]..bounds[end]].trim().to_string());
        start = end.saturating_sub(overlap).max(start + 1);
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Case-insensitive de-duplication that keeps the first spelling seen.
pub fn dedupe_entities<I, S>(entities: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entity in entities {
        let entity: String = entity.into();
        let entity = entity.trim().to_string();
        if entity.is_empty() {
            continue;
        }
        if seen.insert(entity.to_lowercase()) {
            out.push(entity);
        }
    }
    out
}

#[derive(Serialize)]
struct PassageHeader<'a> {
    title: &'a str,
    source: &'a str,
    entry_date: Option<String>,
    entities: &'a [String],
}

impl TextChunk {
    /// `entry_date` as seconds since the epoch at midnight UTC.
    pub fn entry_date_ts(&self) -> Option<i64> {
        self.entry_date.map(date_to_timestamp)
    }

    /// Adds entities, skipping any already present in another letter case.
    pub fn merge_entities<I, S>(&mut self, entities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let existing = std::mem::take(&mut self.entities);
        self.entities = dedupe_entities(
            existing
                .into_iter()
                .chain(entities.into_iter().map(Into::into)),
        );
    }

    /// The text that is actually embedded: a JSON header carrying title,
    /// source, date and entities, a blank line, then the chunk text.
    ///
    /// ```
    /// use vaultrag_context::text::TextChunk;
    ///
    /// let chunk = TextChunk {
    ///     source: "people/alice.md".to_string(),
    ///     title: "alice".to_string(),
    ///     chunk_index: 0,
    ///     entry_date: None,
    ///     entities: vec!["person:Alice".to_string()],
    ///     text: "Alice likes tea.".to_string(),
    /// };
    /// assert_eq!(
    ///     chunk.build(),
    ///     "passage: {\"title\":\"alice\",\"source\":\"people/alice.md\",\"entry_date\":null,\"entities\":[\"person:Alice\"]}\n\nAlice likes tea."
    /// );
    /// ```
    pub fn build(&self) -> String {
        let header = PassageHeader {
            title: &self.title,
            source: &self.source,
            entry_date: self.entry_date.map(|d| d.format("%Y-%m-%d").to_string()),
            entities: &self.entities,
        };
        let header = serde_json::to_string(&header).unwrap_or_default();
        format!("passage: {header}\n\n{}", self.text)
    }
}
