//! Configuration management for the live session client

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::voice::{BLOCK_SIZE, CAPTURE_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::{Error, Result};
use file::CasefileConfigFile;

/// Default live service endpoint (bidirectional generate-content stream)
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Fenrir";

/// Persona instruction for the interrogation
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Kaleb Gates. Dark, witty, cynical, analytical. You are talking to someone reviewing your case file. Keep it brief, conversational, and intense.";

/// Client configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Live service configuration
    pub live: LiveConfig,

    /// Audio pipeline configuration
    pub audio: AudioConfig,
}

/// Live service configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// WebSocket endpoint of the live service
    pub endpoint: String,

    /// API key (from `GEMINI_API_KEY` env)
    pub api_key: Option<SecretString>,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// Behavioral instruction sent with the setup message
    pub system_instruction: String,

    /// Time allowed for the connection to open
    pub handshake_timeout: Duration,
}

/// Audio pipeline configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone sample rate
    pub capture_sample_rate: u32,

    /// Speaker sample rate (inbound audio rate)
    pub output_sample_rate: u32,

    /// Samples per captured block
    pub block_size: usize,

    /// Blocks held while the connection is still opening
    pub pending_capacity: usize,

    /// Amplitude republish cadence
    pub visual_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            handshake_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            block_size: BLOCK_SIZE,
            pending_capacity: 256,
            visual_interval: Duration::from_millis(16),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed config file with an environment lookup
    pub fn from_sources(fc: CasefileConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let live = LiveConfig {
            endpoint: env("CASEFILE_LIVE_ENDPOINT")
                .or(fc.live.endpoint)
                .unwrap_or(defaults.live.endpoint),
            api_key: env("GEMINI_API_KEY")
                .or(fc.live.api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            model: env("CASEFILE_LIVE_MODEL")
                .or(fc.live.model)
                .unwrap_or(defaults.live.model),
            voice: env("CASEFILE_LIVE_VOICE")
                .or(fc.live.voice)
                .unwrap_or(defaults.live.voice),
            system_instruction: fc
                .live
                .system_instruction
                .unwrap_or(defaults.live.system_instruction),
            handshake_timeout: env("CASEFILE_HANDSHAKE_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.live.handshake_timeout_secs)
                .map_or(defaults.live.handshake_timeout, Duration::from_secs),
        };

        let audio = AudioConfig {
            block_size: fc.audio.block_size.unwrap_or(defaults.audio.block_size),
            pending_capacity: fc
                .audio
                .pending_capacity
                .unwrap_or(defaults.audio.pending_capacity),
            visual_interval: fc
                .audio
                .visual_interval_ms
                .map_or(defaults.audio.visual_interval, Duration::from_millis),
            ..defaults.audio
        };

        Self { live, audio }
    }

    /// Check that sizes and intervals are usable
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.audio.block_size == 0 {
            return Err(Error::Config("audio.block_size must be non-zero".to_string()));
        }
        if self.audio.pending_capacity == 0 {
            return Err(Error::Config(
                "audio.pending_capacity must be non-zero".to_string(),
            ));
        }
        if self.audio.visual_interval.is_zero() {
            return Err(Error::Config(
                "audio.visual_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.live.handshake_timeout.is_zero() {
            return Err(Error::Config(
                "live.handshake_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::config::file::{AudioFileConfig, LiveFileConfig};

    #[test]
    fn defaults_target_the_live_model() {
        let config = Config::default();
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.audio.block_size, 4096);
        assert_eq!(config.live.voice, "Fenrir");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_file() {
        let fc = CasefileConfigFile {
            live: LiveFileConfig {
                api_key: Some("from-file".to_string()),
                voice: Some("Puck".to_string()),
                ..LiveFileConfig::default()
            },
            audio: AudioFileConfig::default(),
        };

        let config = Config::from_sources(fc, |key| match key {
            "GEMINI_API_KEY" => Some("from-env".to_string()),
            _ => None,
        });

        assert_eq!(
            config.live.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("from-env".to_string())
        );
        assert_eq!(config.live.voice, "Puck");
    }

    #[test]
    fn empty_api_key_is_treated_as_missing() {
        let config = Config::from_sources(CasefileConfigFile::default(), |key| {
            (key == "GEMINI_API_KEY").then(String::new)
        });
        assert!(config.live.api_key.is_none());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let fc = CasefileConfigFile {
            audio: AudioFileConfig {
                block_size: Some(0),
                ..AudioFileConfig::default()
            },
            ..CasefileConfigFile::default()
        };
        let config = Config::from_sources(fc, |_| None);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
