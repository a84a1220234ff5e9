use serde::{Deserialize, Serialize};

/// Which notes an indexing pass processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Re-index every note regardless of stored state, then purge notes
    /// that no longer exist
    Full,

    /// Re-index only new and modified notes, purge deleted ones
    Scan,

    /// Re-index exactly the given notes, e.g. from a file-watch batch
    Files,
}

impl IndexMode {
    /// Whether this mode consults the stored state to pick notes
    pub fn uses_diff(&self) -> bool {
        matches!(self, IndexMode::Scan)
    }

    /// Whether this mode walks the whole vault
    pub fn walks_vault(&self) -> bool {
        matches!(self, IndexMode::Full | IndexMode::Scan)
    }
}

impl Default for IndexMode {
    fn default() -> Self {
        Self::Scan
    }
}

impl std::fmt::Display for IndexMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexMode::Full => write!(f, "full"),
            IndexMode::Scan => write!(f, "scan"),
            IndexMode::Files => write!(f, "files"),
        }
    }
}

impl std::str::FromStr for IndexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" | "full-reindex" | "rebuild" => Ok(IndexMode::Full),
            "scan" | "incremental" => Ok(IndexMode::Scan),
            "files" | "partial" => Ok(IndexMode::Files),
            _ => Err(format!(
                "Invalid index mode: '{s}'. Valid values are: full, scan, files"
            )),
        }
    }
}
