//! Index-time named-entity classification.
//!
//! A classifier turns a passage into typed entity strings such as
//! `person:Alice` or `org:Acme`. Named-entity recognisers label spans with
//! tags like `PERSON` or `GPE`; [`typed_entity`] maps those tags onto the
//! prefixes stored with every chunk.

use crate::error::Result;
use async_trait::async_trait;

/// Extracts typed entity strings from text.
#[async_trait]
pub trait EntityClassifier: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<String>>;

    fn classifier_name(&self) -> &str;
}

/// Stored prefix for a recogniser label. Labels outside the set the
/// retriever filters on map to `None` and are discarded.
pub fn label_prefix(label: &str) -> Option<&'static str> {
    match label {
        "PERSON" => Some("person"),
        "ORG" => Some("org"),
        "GPE" => Some("place"),
        "WORK_OF_ART" => Some("work"),
        _ => None,
    }
}

/// `PERSON` + `Ada Lovelace` becomes `person:Ada Lovelace`.
pub fn typed_entity(label: &str, text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    label_prefix(label).map(|prefix| format!("{prefix}:{text}"))
}

/// A classifier that never finds anything, for vaults indexed without
/// entity metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClassifier;

#[async_trait]
impl EntityClassifier for NoopClassifier {
    async fn extract(&self, _text: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn classifier_name(&self) -> &str {
        "noop"
    }
}
