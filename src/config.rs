//! Editor configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes. The CLI layers its flags over whatever the file provides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::disasm::BackendKind;
use crate::error::{PatchError, Result};

/// Settings for opening and editing one binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Alignment applied to loadable segments.
    pub page_size: u64,
    /// Force a disassembler backend; `None` picks per architecture.
    pub backend: Option<BackendKind>,
    /// Pad instruction patches shorter than the original with NOPs.
    pub pad_with_nops: bool,
    /// Show demangled names next to decoded instructions.
    pub demangle_symbols: bool,
    /// Instructions per CLI listing.
    pub listing_count: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            page_size: 0x1000,
            backend: None,
            pad_with_nops: true,
            demangle_symbols: false,
            listing_count: 32,
        }
    }
}

impl EditorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EditorConfig = serde_json::from_str(&text).map_err(|e| {
            PatchError::InvalidInput(format!("config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(PatchError::InvalidInput(format!(
                "page_size {:#x} must be a power of two",
                self.page_size
            )));
        }
        if self.listing_count == 0 {
            return Err(PatchError::InvalidInput(
                "listing_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EditorConfig::default();
        assert_eq!(config.page_size, 0x1000);
        assert!(config.pad_with_nops);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EditorConfig =
            serde_json::from_str(r#"{"backend": "capstone", "listing_count": 8}"#).unwrap();
        assert_eq!(config.backend, Some(BackendKind::Capstone));
        assert_eq!(config.listing_count, 8);
        assert_eq!(config.page_size, 0x1000);
    }

    #[test]
    fn bad_page_size_rejected() {
        let config = EditorConfig {
            page_size: 0x1800,
            ..EditorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PatchError::InvalidInput(_))
        ));
    }

    #[test]
    fn from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"demangle_symbols": true}}"#).unwrap();
        let config = EditorConfig::from_file(file.path()).unwrap();
        assert!(config.demangle_symbols);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "not json").unwrap();
        assert!(EditorConfig::from_file(bad.path()).is_err());
    }
}
