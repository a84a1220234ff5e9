use anyhow::Result;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Runs the CLI against a scratch vault and index directory. Only offline
/// commands are exercised here.
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_vaultrag"))
        .arg("--vault")
        .arg(temp_dir.path().join("vault"))
        .arg("--index-dir")
        .arg(temp_dir.path().join("index"))
        .args(args)
        .env("RUST_LOG", "error")
        .env_remove("VAULT_PATH")
        .env_remove("INDEX_PATH")
        .output()?;
    Ok(output)
}

#[test]
fn test_parse_date_relative_month() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(
        &temp_dir,
        &[
            "parse-date",
            "what happened last month",
            "--today",
            "2024-07-15",
            "--no-fallback",
        ],
    )?;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let range: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(range["start"], "2024-06-01");
    assert_eq!(range["end"], "2024-06-30");
    Ok(())
}

#[test]
fn test_parse_date_without_match_prints_null() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(
        &temp_dir,
        &["parse-date", "the usual", "--today", "2024-07-15", "--no-fallback"],
    )?;
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "null");
    Ok(())
}

#[test]
fn test_split_by_date() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let note = temp_dir.path().join("journal.md");
    std::fs::write(
        &note,
        "Preamble\n## 2024-05-01\nPlanted beans.\n**May 3, 2024**\nWatered them.\n",
    )?;

    let output = run_cli(&temp_dir, &["split-by-date", note.to_str().unwrap()])?;
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let sections: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let sections = sections.as_array().unwrap();
    assert_eq!(sections.len(), 3);
    assert!(sections[0]["entry_date"].is_null());
    assert_eq!(sections[1]["entry_date"], "2024-05-01");
    assert_eq!(sections[1]["text"], "Planted beans.");
    assert_eq!(sections[2]["entry_date"], "2024-05-03");
    Ok(())
}

#[test]
fn test_invalid_mode_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["index", "--mode", "sometimes"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid index mode"));
    Ok(())
}

#[test]
fn test_missing_split_file_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["split-by-date", "does-not-exist.md"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error:"));
    Ok(())
}
