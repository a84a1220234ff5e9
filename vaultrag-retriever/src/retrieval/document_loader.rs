//! Loading Markdown notes from a vault directory.
//!
//! A [`Document`] is rebuilt from disk on every index pass and never
//! persisted. The loader strips front matter, expands `[[wikilinks]]` to plain
//! text and reports each file's modification time so the index-state tracker
//! can diff without reading contents.

use crate::error::{Result, RetrieverError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;

static WIKILINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\]|#]+)(?:#[^\]]*)?(?:\|([^\]]+))?\]\]").expect("wikilink pattern is valid")
});

/// One note as read from the vault.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Vault-relative path with `/` separators.
    pub path: String,
    pub title: String,
    /// Body without front matter, wikilinks expanded.
    pub text: String,
    /// Raw front-matter values, `title` included when present.
    pub front_matter: BTreeMap<String, Value>,
    /// Wikilink targets in order of appearance.
    pub links: Vec<String>,
    /// Modification time in milliseconds since the epoch.
    pub modified_ms: i64,
}

impl Document {
    /// Calendar day of the modification time in `timezone`.
    pub fn modified_date(&self, timezone: Tz) -> Option<NaiveDate> {
        DateTime::from_timestamp_millis(self.modified_ms)
            .map(|dt| dt.with_timezone(&timezone).date_naive())
    }
}

/// Source of vault documents.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    fn root(&self) -> &Path;

    /// Every indexable note, keyed by vault-relative path, with its
    /// modification time in milliseconds.
    async fn list_files(&self) -> Result<BTreeMap<String, i64>>;

    /// Reads one note. Unreadable or malformed files are reported as
    /// [`RetrieverError::MalformedDocument`].
    async fn load_one(&self, relative_path: &str) -> Result<Document>;

    /// Reads every listed note. A bad note does not stop the others.
    async fn load_all(&self) -> Result<Vec<Result<Document>>> {
        let files = self.list_files().await?;
        let mut docs = Vec::with_capacity(files.len());
        for path in files.keys() {
            docs.push(self.load_one(path).await);
        }
        Ok(docs)
    }

    /// Maps an absolute or vault-relative path to the key used everywhere
    /// else. Paths outside the vault give `None`.
    fn relative_path(&self, path: &Path) -> Option<String> {
        relative_key(self.root(), path)
    }

    /// True when `relative` names a note this loader would list.
    fn is_indexable(&self, relative: &str) -> bool {
        is_markdown(Path::new(relative))
    }
}

/// Loads `*.md` files under a root directory.
#[derive(Debug, Clone)]
pub struct MarkdownVaultLoader {
    root: PathBuf,
    exclude_dirs: Vec<String>,
}

impl MarkdownVaultLoader {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            exclude_dirs: vec![".obsidian".to_string()],
        }
    }

    /// Directory names skipped at any depth.
    pub fn with_exclude_dirs(mut self, exclude_dirs: Vec<String>) -> Self {
        self.exclude_dirs = exclude_dirs;
        self
    }

    fn walk(&self) -> BTreeMap<String, i64> {
        let mut files = BTreeMap::new();
        let exclude = self.exclude_dirs.clone();
        let walker = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && exclude.iter().any(|e| entry.file_name() == e.as_str()))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable vault entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) || !is_markdown(entry.path()) {
                continue;
            }
            let Some(relative) = relative_key(&self.root, entry.path()) else {
                continue;
            };
            match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(modified) => {
                    files.insert(relative, system_time_ms(modified));
                }
                None => tracing::debug!("No modification time for {relative}, skipping"),
            }
        }
        files
    }
}

#[async_trait]
impl DocumentLoader for MarkdownVaultLoader {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_indexable(&self, relative: &str) -> bool {
        is_markdown(Path::new(relative))
            && !relative
                .split('/')
                .rev()
                .skip(1)
                .any(|dir| dir.starts_with('.') || self.exclude_dirs.iter().any(|e| e == dir))
    }

    async fn list_files(&self) -> Result<BTreeMap<String, i64>> {
        if !self.root.is_dir() {
            return Err(RetrieverError::configuration(format!(
                "vault path {} is not a directory",
                self.root.display()
            )));
        }
        let loader = self.clone();
        tokio::task::spawn_blocking(move || loader.walk())
            .await
            .map_err(|e| RetrieverError::Io(std::io::Error::other(e)))
    }

    async fn load_one(&self, relative_path: &str) -> Result<Document> {
        let full = self.root.join(relative_path);
        let bytes = tokio::fs::read(&full)
            .await
            .map_err(|e| RetrieverError::malformed(relative_path, format!("unreadable: {e}")))?;
        let modified_ms = tokio::fs::metadata(&full)
            .await
            .and_then(|m| m.modified())
            .map(system_time_ms)
            .map_err(|e| RetrieverError::malformed(relative_path, format!("unreadable: {e}")))?;
        let content = String::from_utf8(bytes)
            .map_err(|_| RetrieverError::malformed(relative_path, "content is not valid UTF-8"))?;

        parse_document(relative_path, &content, modified_ms)
    }
}

/// Builds a [`Document`] from raw file content.
pub fn parse_document(relative_path: &str, content: &str, modified_ms: i64) -> Result<Document> {
    let (front_matter, body) = split_front_matter(content)
        .map_err(|reason| RetrieverError::malformed(relative_path, reason))?;

    let title = front_matter
        .get("title")
        .and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| title_from_path(relative_path));

    Ok(Document {
        path: relative_path.to_string(),
        title,
        text: expand_wikilinks(body),
        front_matter,
        links: wikilink_targets(body),
        modified_ms,
    })
}

/// `[[Target]]` becomes `Target`, `[[Target|Alias]]` becomes `Alias`, and
/// `-`/`_` in the replacement turn into spaces. An anchor swallows the rest of
/// the link, so `[[Note#Heading|Alias]]` gives `Note`.
pub fn expand_wikilinks(text: &str) -> String {
    WIKILINK
        .replace_all(text, |caps: &regex::Captures| {
            let replacement = caps
                .get(2)
                .or_else(|| caps.get(1))
                .map(|m| m.as_str())
                .unwrap_or_default();
            replacement.replace(['-', '_'], " ")
        })
        .into_owned()
}

fn wikilink_targets(text: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for caps in WIKILINK.captures_iter(text) {
        if let Some(target) = caps.get(1) {
            let target = target.as_str().trim().to_string();
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }
    targets
}

fn title_from_path(relative_path: &str) -> String {
    Path::new(relative_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(relative_path)
        .replace('-', " ")
}

/// Splits `---` fenced front matter from the body.
fn split_front_matter(
    content: &str,
) -> std::result::Result<(BTreeMap<String, Value>, &str), String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim_end() == "---" => {}
        _ => return Ok((BTreeMap::new(), content)),
    }

    let mut offset = content.find('\n').map(|i| i + 1).unwrap_or(content.len());
    let header_start = offset;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let header = &content[header_start..offset];
            let body = &content[offset + line.len()..];
            return Ok((parse_front_matter(header)?, body));
        }
        offset += line.len();
    }
    Err("unterminated front matter".to_string())
}

/// Parses the YAML header into top-level fields. Nested values are kept as
/// JSON; flattening to store metadata happens later.
fn parse_front_matter(header: &str) -> std::result::Result<BTreeMap<String, Value>, String> {
    if header.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(header).map_err(|e| format!("invalid front matter: {e}"))?;
    let mapping = match yaml {
        serde_yaml::Value::Null => return Ok(BTreeMap::new()),
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => return Err("front matter is not a mapping".to_string()),
    };

    let mut fields = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = yaml_key(&key) else {
            tracing::debug!("Skipping front matter entry with a non-scalar key");
            continue;
        };
        let value = serde_json::to_value(value)
            .map_err(|e| format!("front matter field `{key}`: {e}"))?;
        fields.insert(key, value);
    }
    Ok(fields)
}

fn yaml_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

fn system_time_ms(time: std::time::SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Vault-relative key for `path`, `/`-separated, without `.` or `..` parts.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path.strip_prefix(root).unwrap_or(path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_expand_wikilinks() {
        let cases = [
            ("[[Note]]", "Note"),
            ("[[My-Note]]", "My Note"),
            ("[[My_Note]]", "My Note"),
            ("[[Note|Alias]]", "Alias"),
            ("[[Note#Heading]]", "Note"),
            ("[[Note#Heading|Alias]]", "Note"),
            ("text [[A]] and [[B|C]] end", "text A and C end"),
            ("[[Deep/Path/Note]]", "Deep/Path/Note"),
            ("no wikilinks here", "no wikilinks here"),
        ];
        for (input, expected) in cases {
            assert_eq!(expand_wikilinks(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_front_matter_forms() {
        let content = "---\ntitle: \"My Note\"\ntags: [work, people]\naliases:\n  - first\n  - second\nproject:\n  name: apollo\n  phase: 2\ndraft: false\nempty:\n---\nBody [[Jane-Doe]] here.\n";
        let doc = parse_document("notes/my-note.md", content, 0).unwrap();

        assert_eq!(doc.title, "My Note");
        assert_eq!(doc.text, "Body Jane Doe here.\n");
        assert_eq!(doc.links, vec!["Jane-Doe"]);
        assert_eq!(doc.front_matter["tags"], serde_json::json!(["work", "people"]));
        assert_eq!(doc.front_matter["aliases"], serde_json::json!(["first", "second"]));
        assert_eq!(
            doc.front_matter["project"],
            serde_json::json!({"name": "apollo", "phase": 2})
        );
        assert_eq!(doc.front_matter["draft"], Value::Bool(false));
        assert_eq!(doc.front_matter["empty"], Value::Null);
    }

    #[test]
    fn test_front_matter_block_scalars_and_quoting() {
        let content = "---\ntitle: Trip\nsummary: |\n  Went to the coast.\n  Rained.\nfolded: >\n  one\n  two\ntags: [\"a, b\", c]\nwho: 'O''Brien'\n---\nBody\n";
        let doc = parse_document("trip.md", content, 0).unwrap();

        assert_eq!(doc.title, "Trip");
        assert_eq!(doc.text, "Body\n");
        assert_eq!(doc.front_matter["summary"], json!("Went to the coast.\nRained.\n"));
        assert_eq!(doc.front_matter["folded"], json!("one two\n"));
        assert_eq!(doc.front_matter["tags"], json!(["a, b", "c"]));
        assert_eq!(doc.front_matter["who"], json!("O'Brien"));
    }

    #[test]
    fn test_front_matter_nested_maps() {
        let content = "---\nproject:\n  name: apollo\n  team:\n    lead: Ana\n    members: [Bo, Cy]\n2024: numeric key\n---\nBody";
        let doc = parse_document("p.md", content, 0).unwrap();

        assert_eq!(
            doc.front_matter["project"],
            json!({"name": "apollo", "team": {"lead": "Ana", "members": ["Bo", "Cy"]}})
        );
        assert_eq!(doc.front_matter["2024"], json!("numeric key"));
    }

    #[test]
    fn test_empty_and_comment_only_front_matter() {
        let doc = parse_document("e.md", "---\n---\nBody", 0).unwrap();
        assert!(doc.front_matter.is_empty());
        assert_eq!(doc.text, "Body");

        let doc = parse_document("c.md", "---\n# just a comment\n---\nBody", 0).unwrap();
        assert!(doc.front_matter.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_malformed() {
        for content in ["---\ntags: [open\n---\nBody", "---\n- a\n- b\n---\nBody"] {
            let err = parse_document("bad.md", content, 0).unwrap_err();
            assert!(
                matches!(err, RetrieverError::MalformedDocument { .. }),
                "content: {content:?}"
            );
        }
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let doc = parse_document("daily/team-sync.md", "# Heading\n\nSome content", 0).unwrap();
        assert_eq!(doc.title, "team sync");
        assert!(doc.front_matter.is_empty());
        assert_eq!(doc.text, "# Heading\n\nSome content");
    }

    #[test]
    fn test_unterminated_front_matter_is_malformed() {
        let err = parse_document("bad.md", "---\ntitle: oops\nno closing fence\n", 0).unwrap_err();
        assert!(matches!(err, RetrieverError::MalformedDocument { .. }));
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/vault");
        assert_eq!(
            relative_key(root, Path::new("/vault/daily/a.md")),
            Some("daily/a.md".to_string())
        );
        assert_eq!(
            relative_key(root, Path::new("daily/./b.md")),
            Some("daily/b.md".to_string())
        );
        assert_eq!(relative_key(root, Path::new("/elsewhere/a.md")), None);
        assert_eq!(relative_key(root, Path::new("../escape.md")), None);
    }

    #[tokio::test]
    async fn test_list_files_skips_excluded_and_hidden_dirs() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path();
        std::fs::create_dir_all(root.join("daily"))?;
        std::fs::create_dir_all(root.join(".obsidian"))?;
        std::fs::create_dir_all(root.join("templates"))?;
        std::fs::write(root.join("daily/2025-01-01.md"), "hello")?;
        std::fs::write(root.join("top.md"), "top")?;
        std::fs::write(root.join("image.png"), [0u8, 1, 2])?;
        std::fs::write(root.join(".obsidian/workspace.md"), "skip")?;
        std::fs::write(root.join("templates/t.md"), "skip")?;

        let loader = MarkdownVaultLoader::new(root)
            .with_exclude_dirs(vec![".obsidian".to_string(), "templates".to_string()]);
        let files = loader.list_files().await?;
        let keys: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["daily/2025-01-01.md", "top.md"]);
        assert!(files.values().all(|&ms| ms > 0));

        assert!(loader.is_indexable("daily/x.md"));
        assert!(!loader.is_indexable("templates/x.md"));
        assert!(!loader.is_indexable(".obsidian/x.md"));
        assert!(!loader.is_indexable("x.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_load_all_reports_bad_notes_individually() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("good.md"), "---\ntitle: Good\n---\nFine.")?;
        std::fs::write(dir.path().join("bad.md"), [0xffu8, 0xfe, 0x00])?;

        let loader = MarkdownVaultLoader::new(dir.path());
        let docs = loader.load_all().await?;
        assert_eq!(docs.len(), 2);
        assert!(matches!(
            &docs[0],
            Err(RetrieverError::MalformedDocument { path, .. }) if path == Path::new("bad.md")
        ));
        let good = docs[1].as_ref().unwrap();
        assert_eq!(good.title, "Good");
        assert_eq!(good.text, "Fine.");
        Ok(())
    }
}
