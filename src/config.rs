use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::player::PlaybackSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub owner_user_id: Option<u64>,

    // Fuentes
    pub youtube_api_key: Option<String>,
    pub ytdlp_path: String,

    // Orquestación
    pub max_concurrent_operations: usize,
    pub connect_timeout_secs: u64,
    pub backoff_unit_ms: u64,
    pub backoff_cap: u32,
    pub max_reconnect_attempts: u32,

    // Cola
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    pub queue_display_limit: usize,

    // Audio
    pub default_volume: f32,
}

impl Config {
    /// Loads the configuration.
    ///
    /// Sources, lowest priority first:
    ///
    /// 1. Built-in defaults ([`Config::default`])
    /// 2. `config.json` in the working directory (optional)
    /// 3. Environment variables (`DISCORD_TOKEN`, `MAX_QUEUE_SIZE`, ...), with
    ///    a `.env` file loaded into the environment beforehand
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config.json").required(false))
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let config: Config = settings.try_deserialize()?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Token and application id must be present
    /// - Volume must be between 0.0 and 2.0
    /// - Capacities, timeouts and the reconnect ceiling must be > 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN es obligatorio");
        }

        if self.application_id == 0 {
            anyhow::bail!("APPLICATION_ID es obligatorio");
        }

        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_concurrent_operations == 0 {
            anyhow::bail!("Max concurrent operations must be greater than 0");
        }

        if self.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        if self.backoff_unit_ms == 0 || self.backoff_cap == 0 {
            anyhow::bail!("Backoff unit and cap must be greater than 0");
        }

        if self.max_reconnect_attempts == 0 {
            anyhow::bail!("Max reconnect attempts must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 || self.queue_display_limit == 0 {
            anyhow::bail!("Playlist size and queue display limit must be greater than 0");
        }

        Ok(())
    }

    /// Orchestration knobs with typed durations, handed to the player.
    pub fn playback(&self) -> PlaybackSettings {
        PlaybackSettings {
            max_concurrent_operations: self.max_concurrent_operations,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            backoff_cap: self.backoff_cap,
            max_reconnect_attempts: self.max_reconnect_attempts,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token and the API key.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Sources: yt-dlp='{}', YouTube API={}\n  \
            Orchestration: {} ops, {}s connect timeout, backoff {}ms x2^n (cap {}), {} attempts\n  \
            Queue: {} max, {} per playlist, {} shown",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.ytdlp_path,
            if self.youtube_api_key.is_some() { "on" } else { "off" },
            self.max_concurrent_operations,
            self.connect_timeout_secs,
            self.backoff_unit_ms,
            self.backoff_cap,
            self.max_reconnect_attempts,
            self.max_queue_size,
            self.max_playlist_size,
            self.queue_display_limit,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when neither `config.json` nor the environment
/// provide a value.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            owner_user_id: None,

            youtube_api_key: None,
            ytdlp_path: "yt-dlp".to_string(),

            max_concurrent_operations: 100,
            connect_timeout_secs: 120,
            backoff_unit_ms: 1000, // 1 unidad = 1 segundo
            backoff_cap: 60,
            max_reconnect_attempts: 8,

            max_queue_size: 1000,
            max_playlist_size: 50, // maxResults de la API de YouTube
            queue_display_limit: 24,

            default_volume: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> Config {
        Config {
            discord_token: "token".to_string(),
            application_id: 42,
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_once_credentials_are_set() {
        assert!(valid().validate().is_ok());
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_rejects_zero_reconnect_ceiling() {
        let config = Config {
            max_reconnect_attempts: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_playback_projection() {
        let settings = valid().playback();
        assert_eq!(settings.connect_timeout, Duration::from_secs(120));
        assert_eq!(settings.backoff_unit, Duration::from_secs(1));
        assert_eq!(settings.backoff_cap, 60);
        assert_eq!(settings.max_concurrent_operations, 100);
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            youtube_api_key: Some("api-secret".to_string()),
            ..valid()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(!summary.contains("api-secret"));
    }
}
