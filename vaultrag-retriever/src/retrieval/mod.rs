pub mod chunking_strategy;
pub mod date_parser;
pub mod directory_watcher;
pub mod document_loader;
pub mod index_state;
pub mod indexing_engine;
pub mod indexing_mode;
pub mod name_extractor;
pub mod path_locks;
pub mod retrieval_engine;
