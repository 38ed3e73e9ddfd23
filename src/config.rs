use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{limiter::GuildLimits, player::MAX_VOLUME, registry::RegistrySettings};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,

    // Nodo de audio
    pub lavalink_host: String,
    pub lavalink_port: u16,
    pub lavalink_password: String,

    // Audio
    pub default_volume: f32,
    pub volume_supported: bool,
    pub announce_tracks: bool,

    // Límites por defecto de cada servidor
    pub max_queue_size: Option<usize>,
    pub max_user_tracks: Option<usize>,
    pub max_song_duration: Option<u64>, // En segundos
    pub allow_playlists: bool,

    // Paths
    pub data_dir: PathBuf,

    // Tiempos (segundos)
    pub shutdown_save_timeout: u64,
    pub status_push_interval: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,

            // Nodo de audio
            lavalink_host: std::env::var("LAVALINK_HOST").unwrap_or_else(|_| "localhost".to_string()),
            lavalink_port: env_or("LAVALINK_PORT", 2333)?,
            lavalink_password: std::env::var("LAVALINK_PASSWORD").unwrap_or_else(|_| "youshallnotpass".to_string()),

            // Audio
            default_volume: env_or("DEFAULT_VOLUME", 1.0)?,
            volume_supported: env_or("VOLUME_SUPPORTED", true)?,
            announce_tracks: env_or("ANNOUNCE_TRACKS", true)?,

            // Límites (sin variable = sin límite)
            max_queue_size: env_opt("MAX_QUEUE_SIZE")?,
            max_user_tracks: env_opt("MAX_USER_TRACKS")?,
            max_song_duration: env_opt("MAX_SONG_DURATION")?,
            allow_playlists: env_or("ALLOW_PLAYLISTS", true)?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "/app/data".to_string())
                .into(),

            // Tiempos
            shutdown_save_timeout: env_or("SHUTDOWN_SAVE_TIMEOUT", 120)?,
            status_push_interval: env_or("STATUS_PUSH_INTERVAL", 5)?,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Volume must be between 0.0 and 1.5
    /// - Limits, when present, must be greater than 0
    /// - Intervals must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=MAX_VOLUME).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and {}, got: {}", MAX_VOLUME, self.default_volume);
        }

        if self.max_queue_size == Some(0) {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_user_tracks == Some(0) {
            anyhow::bail!("Max user tracks must be greater than 0");
        }

        if self.max_song_duration == Some(0) {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.status_push_interval == 0 {
            anyhow::bail!("Status push interval must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token and the audio node password.
    pub fn summary(&self) -> String {
        let limit = |value: Option<String>| value.unwrap_or_else(|| "∞".to_string());
        format!(
            "Config Summary:\n  \
            Audio node: {}:{}\n  \
            Audio: {}% vol, volume restore={}, announce={}\n  \
            Limits: {} queue, {} per user, {}s max duration, playlists={}\n  \
            Data: {}\n  \
            Timers: {}s shutdown save, {}s status push",
            self.lavalink_host,
            self.lavalink_port,
            (self.default_volume * 100.0) as u32,
            self.volume_supported,
            self.announce_tracks,
            limit(self.max_queue_size.map(|n| n.to_string())),
            limit(self.max_user_tracks.map(|n| n.to_string())),
            limit(self.max_song_duration.map(|n| n.to_string())),
            self.allow_playlists,
            self.data_dir.display(),
            self.shutdown_save_timeout,
            self.status_push_interval,
        )
    }

    /// Límites de un servidor que no tiene configuración propia
    pub fn default_limits(&self) -> GuildLimits {
        GuildLimits {
            playlist_allowed: self.allow_playlists,
            user_max_tracks: self.max_user_tracks,
            max_tracks: self.max_queue_size,
            max_track_length_millis: self.max_song_duration.map(|secs| secs * 1000),
        }
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            default_volume: self.default_volume,
            volume_supported: self.volume_supported,
            shutdown_timeout: Duration::from_secs(self.shutdown_save_timeout),
        }
    }

    pub fn status_push_interval(&self) -> Duration {
        Duration::from_secs(self.status_push_interval)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),

            lavalink_host: "localhost".to_string(),
            lavalink_port: 2333,
            lavalink_password: "youshallnotpass".to_string(),

            default_volume: 1.0,
            volume_supported: true,
            announce_tracks: true,

            max_queue_size: None,
            max_user_tracks: None,
            max_song_duration: None,
            allow_playlists: true,

            data_dir: "/app/data".into(),

            shutdown_save_timeout: 120,
            status_push_interval: 5,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().parse()?),
        _ => Ok(default),
    }
}

fn env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(Some(val.trim().parse()?)),
        _ => Ok(None),
    }
}
