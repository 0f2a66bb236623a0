//! Test-pattern (PLS) code → minimum required margin.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One row of the target table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    #[serde(alias = "plscode")]
    pub code: u32,
    #[serde(alias = "min_esno")]
    pub minimum_margin: f64,
}

/// Lookup from PLS code to the margin a test must be calibrated to.
#[derive(Debug, Clone, Default)]
pub struct TargetTable {
    entries: HashMap<u32, f64>,
}

impl TargetTable {
    /// Build from entries; a repeated code keeps its first value.
    pub fn new(entries: impl IntoIterator<Item = TargetEntry>) -> Self {
        let mut map = HashMap::new();
        for e in entries {
            map.entry(e.code).or_insert(e.minimum_margin);
        }
        Self { entries: map }
    }

    /// Parse a JSON array of `{code, minimum_margin}` records.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let entries: Vec<TargetEntry> = serde_json::from_str(input)?;
        Ok(Self::new(entries))
    }

    pub fn from_json_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Minimum margin for `code`. Unknown codes are an error: a test with
    /// no target is not runnable.
    pub fn minimum_margin(&self, code: u32) -> Result<f64, ConfigError> {
        self.entries
            .get(&code)
            .copied()
            .ok_or(ConfigError::UnknownPlsCode(code))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reference_field_names() {
        let t = TargetTable::from_json_str(
            r#"[{"plscode": 101, "min_esno": 6.2}, {"plscode": 61, "min_esno": 2.5}]"#,
        )
        .unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.minimum_margin(101).unwrap(), 6.2);
        assert_eq!(t.minimum_margin(61).unwrap(), 2.5);
    }

    #[test]
    fn parse_canonical_field_names() {
        let t = TargetTable::from_json_str(r#"[{"code": 7, "minimum_margin": -1.5}]"#).unwrap();
        assert_eq!(t.minimum_margin(7).unwrap(), -1.5);
    }

    #[test]
    fn unknown_code_fails_loudly() {
        let t = TargetTable::from_json_str(r#"[{"code": 7, "minimum_margin": 1.0}]"#).unwrap();
        assert!(matches!(
            t.minimum_margin(8),
            Err(ConfigError::UnknownPlsCode(8))
        ));
    }

    #[test]
    fn first_entry_wins_on_repeat() {
        let t = TargetTable::new(vec![
            TargetEntry {
                code: 1,
                minimum_margin: 3.0,
            },
            TargetEntry {
                code: 1,
                minimum_margin: 9.0,
            },
        ]);
        assert_eq!(t.minimum_margin(1).unwrap(), 3.0);
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            TargetTable::from_json_str("{not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
