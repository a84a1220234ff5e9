//! End-to-end runs of the service against a temporary vault and a SQLite
//! index on disk, with the deterministic test embedder standing in for a
//! model server.

use anyhow::Result;
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use vaultrag_models::NoopClassifier;
use vaultrag_retriever::{
    config::RagConfig,
    retrieval::name_extractor::HeuristicEntityClassifier,
    service::RagService,
    storage::open_pool,
    testing::HashEmbedder,
};

fn write_note(vault: &Path, relative: &str, content: &str) -> Result<()> {
    let path = vault.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Rewrites a note and pushes its mtime forward so a scan sees the change.
fn touch_note(vault: &Path, relative: &str, content: &str) -> Result<()> {
    write_note(vault, relative, content)?;
    let file = std::fs::File::options().write(true).open(vault.join(relative))?;
    file.set_modified(SystemTime::now() + Duration::from_secs(60))?;
    Ok(())
}

async fn open_service(vault: &TempDir, index: &TempDir, entities: bool) -> Result<RagService> {
    let mut config = RagConfig::default();
    config.vault.path = vault.path().to_path_buf();
    config.index.dir = index.path().to_path_buf();
    config.date_parser.llm_fallback = false;

    let pool = open_pool(&config.database_path()).await?;
    let service = if entities {
        RagService::with_models(
            config,
            pool,
            Arc::new(HashEmbedder::default()),
            Arc::new(HeuristicEntityClassifier::default()),
            None,
        )
        .await?
    } else {
        RagService::with_models(
            config,
            pool,
            Arc::new(HashEmbedder::default()),
            Arc::new(NoopClassifier),
            None,
        )
        .await?
    };
    Ok(service)
}

fn tracked(entries: &[vaultrag_retriever::retrieval::index_state::IndexStateEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.path.as_str()).collect()
}

#[tokio::test]
async fn test_full_scan_and_partial_indexing() -> Result<()> {
    let vault = TempDir::new()?;
    let index = TempDir::new()?;
    write_note(vault.path(), "a.md", "## 2024-03-01\nPlanning the spring garden beds.")?;
    write_note(vault.path(), "journal/b.md", "Reading notes on soil chemistry.")?;
    write_note(vault.path(), ".obsidian/workspace.md", "editor state")?;
    write_note(vault.path(), "image.png", "not a note")?;

    let service = open_service(&vault, &index, false).await?;

    let report = service.reindex_full().await?;
    assert_eq!(report.files_indexed, 2);
    assert!(report.is_clean());
    assert!(report.chunks_written >= 2);

    let entries = service.state_entries().await?;
    assert_eq!(tracked(&entries), vec!["a.md", "journal/b.md"]);
    assert!(entries.iter().all(|e| !e.is_dirty() && e.chunk_count > 0));

    // Nothing changed on disk.
    let report = service.reindex_scan().await?;
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.files_removed, 0);

    touch_note(vault.path(), "a.md", "## 2024-03-02\nMoved the beds to the south fence.")?;
    std::fs::remove_file(vault.path().join("journal/b.md"))?;
    let report = service.reindex_scan().await?;
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_removed, 1);
    assert_eq!(tracked(&service.state_entries().await?), vec!["a.md"]);

    write_note(vault.path(), "c.md", "A brand new note about compost.")?;
    let report = service
        .reindex_files(&["c.md", "image.png", "c.md", "gone.md"])
        .await?;
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_removed, 0);
    assert_eq!(tracked(&service.state_entries().await?), vec!["a.md", "c.md"]);

    let last = service.last_report().await.unwrap();
    assert_eq!(last.mode, report.mode);
    assert_eq!(last.files_indexed, 1);
    Ok(())
}

#[tokio::test]
async fn test_index_survives_reopen() -> Result<()> {
    let vault = TempDir::new()?;
    let index = TempDir::new()?;
    write_note(vault.path(), "a.md", "Notes about the compost heap.")?;

    {
        let service = open_service(&vault, &index, false).await?;
        service.reindex_scan().await?;
    }

    let service = open_service(&vault, &index, false).await?;
    let report = service.reindex_scan().await?;
    assert_eq!(report.files_indexed, 0);

    let hits = service.retrieve("compost heap", 3).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source(), "a.md");
    Ok(())
}

#[tokio::test]
async fn test_malformed_note_is_reported_not_fatal() -> Result<()> {
    let vault = TempDir::new()?;
    let index = TempDir::new()?;
    write_note(vault.path(), "good.md", "A perfectly ordinary note.")?;
    std::fs::write(vault.path().join("bad.md"), [0xff, 0xfe, 0x00, 0x41])?;

    let service = open_service(&vault, &index, false).await?;
    let report = service.reindex_full().await?;

    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.failures[0].path, "bad.md");
    assert_eq!(tracked(&service.state_entries().await?), vec!["good.md"]);
    Ok(())
}

async fn journal_service(vault: &TempDir, index: &TempDir) -> Result<RagService> {
    write_note(
        vault.path(),
        "jan.md",
        "## 2024-01-05\nLunch with Maria at the harbour cafe. We talked about the garden project.",
    )?;
    write_note(
        vault.path(),
        "jun.md",
        "## 2024-06-20\nMaria and I planted tomatoes for the garden project.",
    )?;
    write_note(
        vault.path(),
        "budget.md",
        "## 2024-03-01\nBudget review for the garden project with Tomas.",
    )?;
    let service = open_service(vault, index, true).await?;
    service.reindex_full().await?;
    Ok(service)
}

#[tokio::test]
async fn test_retrieval_filters_on_names() -> Result<()> {
    let vault = TempDir::new()?;
    let index = TempDir::new()?;
    let service = journal_service(&vault, &index).await?;
    let today = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();

    let hits = service
        .retrieve_at("garden project with Maria", 5, today)
        .await?;
    let mut sources: Vec<&str> = hits.iter().map(|h| h.source()).collect();
    sources.sort();
    assert_eq!(sources, vec!["jan.md", "jun.md"]);
    assert!(hits.iter().all(|h| h.mentions("maria")));
    Ok(())
}

#[tokio::test]
async fn test_retrieval_recency_and_date_range() -> Result<()> {
    let vault = TempDir::new()?;
    let index = TempDir::new()?;
    let service = journal_service(&vault, &index).await?;
    let today = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();

    let hits = service
        .retrieve_at("latest on the garden project", 3, today)
        .await?;
    let sources: Vec<&str> = hits.iter().map(|h| h.source()).collect();
    assert_eq!(sources, vec!["jun.md", "budget.md", "jan.md"]);

    let hits = service
        .retrieve_at("what did Maria do last month", 5, today)
        .await?;
    let sources: Vec<&str> = hits.iter().map(|h| h.source()).collect();
    assert_eq!(sources, vec!["jun.md"]);
    assert_eq!(hits[0].entry_date(), NaiveDate::from_ymd_opt(2024, 6, 20));
    Ok(())
}

#[tokio::test]
async fn test_date_helpers() -> Result<()> {
    let vault = TempDir::new()?;
    let index = TempDir::new()?;
    let service = open_service(&vault, &index, false).await?;
    let today = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();

    let range = service
        .parse_date_query_at("notes from last week", today, false)
        .await
        .unwrap();
    assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 7, 8));
    assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 7, 14));

    let sections = service.split_by_date("## 2024-07-01\nOne\n## 2024-07-02\nTwo");
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[1].text, "Two");
    Ok(())
}
