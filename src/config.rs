// Load configuration - knobs for the one-shot staging load
//
// Every field has a default matching the published accident export, so
// `LoadConfig::default()` is what the CLI uses unless flags override it.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};

// ============================================================================
// SOURCE ENCODING
// ============================================================================

/// Character encoding of the raw export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceEncoding {
    /// ISO-8859-1 as published (decoded through the windows-1252 superset)
    Latin1,

    /// UTF-8, used by re-exported or hand-made files
    Utf8,
}

impl SourceEncoding {
    pub fn encoding(&self) -> &'static Encoding {
        match self {
            SourceEncoding::Latin1 => WINDOWS_1252,
            SourceEncoding::Utf8 => UTF_8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceEncoding::Latin1 => "latin1",
            SourceEncoding::Utf8 => "utf8",
        }
    }
}

// ============================================================================
// LOAD CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Rows buffered before each multi-row insert (default: 1000)
    pub batch_size: usize,

    /// Encoding used to decode every field of the raw file
    pub encoding: SourceEncoding,

    /// Field delimiter (default: ';')
    pub delimiter: u8,

    /// Youngest plausible victim age, inclusive
    pub min_age: i64,

    /// Oldest plausible victim age, inclusive (oldest living person on record)
    pub max_age: i64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            batch_size: 1000,
            encoding: SourceEncoding::Latin1,
            delimiter: b';',
            min_age: 0,
            max_age: 116,
        }
    }
}

impl LoadConfig {
    /// Batch size clamped to at least one row
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn with_encoding(mut self, encoding: SourceEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_export() {
        let config = LoadConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.delimiter, b';');
        assert_eq!(config.encoding, SourceEncoding::Latin1);
        assert_eq!(config.max_age, 116);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let config = LoadConfig::default().with_batch_size(0);
        assert_eq!(config.effective_batch_size(), 1);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: LoadConfig = serde_json::from_str(r#"{"encoding": "utf8"}"#).unwrap();
        assert_eq!(config.encoding, SourceEncoding::Utf8);
        assert_eq!(config.batch_size, 1000);
    }
}
