//! Case-insensitive shell-glob matching for attachment filenames.

use glob::{MatchOptions, Pattern};

use crate::error::{RelayError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled filename filter such as `*.zip` or `report-??.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilenamePattern {
    source: String,
    compiled: Pattern,
}

impl FilenamePattern {
    /// Compile a glob (`*`, `?`, `[...]`); both sides are lowercased before matching.
    pub fn new(pattern: &str) -> Result<Self> {
        let source = pattern.trim().to_string();
        let compiled = Pattern::new(&source.to_lowercase()).map_err(|e| {
            RelayError::Config(format!("invalid attachment pattern '{source}': {e}"))
        })?;
        Ok(Self { source, compiled })
    }

    pub fn matches(&self, filename: &str) -> bool {
        self.compiled
            .matches_with(&filename.to_lowercase(), MATCH_OPTIONS)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl serde::Serialize for FilenamePattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl std::fmt::Display for FilenamePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
