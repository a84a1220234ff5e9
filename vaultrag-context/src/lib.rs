pub mod dates;
pub mod text;

// Re-export the chunking entry points for external use
pub use dates::{first_date_in, heading_date, normalize_date_token};
pub use text::{ChunkingConfig, DateSection, NoteChunker, TextChunk, split_by_date_headings};
