//! TOML configuration file loading
//!
//! Supports `~/.config/casefile/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CasefileConfigFile {
    /// Live service configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Audio pipeline configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Live service configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// API key for the live service
    pub api_key: Option<String>,

    /// WebSocket endpoint
    pub endpoint: Option<String>,

    /// Model identifier (e.g. "models/gemini-2.5-flash-native-audio-preview-12-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Fenrir")
    pub voice: Option<String>,

    /// Behavioral instruction sent with the session setup
    pub system_instruction: Option<String>,

    /// Seconds to wait for the connection to open
    pub handshake_timeout_secs: Option<u64>,
}

/// Audio pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Samples per captured block
    pub block_size: Option<usize>,

    /// Blocks held while the connection is still opening
    pub pending_capacity: Option<usize>,

    /// Milliseconds between amplitude updates
    pub visual_interval_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CasefileConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CasefileConfigFile {
    let Some(path) = config_file_path() else {
        return CasefileConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_config_file_from(path: &Path) -> CasefileConfigFile {
    if !path.exists() {
        return CasefileConfigFile::default();
    }

    match read_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            CasefileConfigFile::default()
        }
    }
}

/// Read and parse a TOML config file
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read, `Error::Toml` if it is
/// not a valid config file
pub fn read_config_file(path: &Path) -> Result<CasefileConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/casefile/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("casefile").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_leaves_other_sections_empty() {
        let parsed: CasefileConfigFile = toml::from_str(
            r#"
            [live]
            voice = "Puck"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.live.voice.as_deref(), Some("Puck"));
        assert!(parsed.live.model.is_none());
        assert!(parsed.audio.block_size.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let parsed = load_config_file_from(Path::new("/nonexistent/casefile/config.toml"));
        assert!(parsed.live.api_key.is_none());
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        let result = read_config_file(Path::new("/nonexistent/casefile/config.toml"));
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }

    #[test]
    fn malformed_file_is_a_toml_error_and_falls_back() {
        let path = std::env::temp_dir().join(format!("casefile-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[live\nvoice = ").unwrap();

        let result = read_config_file(&path);
        let fallback = load_config_file_from(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(crate::Error::Toml(_))));
        assert!(fallback.live.voice.is_none());
    }
}
