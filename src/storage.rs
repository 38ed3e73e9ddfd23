use anyhow::{Context as _, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::audio::{
    limiter::{GuildLimits, GuildLimitsSource},
    snapshot::{PlayerSnapshot, PlayerStore},
};

/// Configuración de servidor almacenada en JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub guild_id: u64,
    pub allow_playlists: bool,
    pub max_queue_size: Option<usize>,
    pub max_user_tracks: Option<usize>,
    pub max_song_duration: Option<u64>, // seconds
    pub announcement_channel_id: Option<u64>,
}

impl ServerConfig {
    /// Configuración inicial de un servidor a partir de los límites globales
    pub fn with_defaults(guild_id: u64, defaults: &GuildLimits) -> Self {
        Self {
            guild_id,
            allow_playlists: defaults.playlist_allowed,
            max_queue_size: defaults.max_tracks,
            max_user_tracks: defaults.user_max_tracks,
            max_song_duration: defaults.max_track_length_millis.map(|ms| ms / 1000),
            announcement_channel_id: None,
        }
    }

    pub fn limits(&self) -> GuildLimits {
        GuildLimits {
            playlist_allowed: self.allow_playlists,
            user_max_tracks: self.max_user_tracks,
            max_tracks: self.max_queue_size,
            max_track_length_millis: self.max_song_duration.map(|secs| secs * 1000),
        }
    }
}

/// Manager de almacenamiento basado en archivos JSON.
///
/// `servers/guild_<id>.json` guarda la configuración de cada servidor y
/// `players/guild_<id>.json` el último snapshot de su player.
pub struct JsonStorage {
    data_dir: PathBuf,
    defaults: GuildLimits,
    servers_cache: DashMap<u64, ServerConfig>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, defaults: GuildLimits) -> Result<Self> {
        fs::create_dir_all(data_dir.join("servers")).await?;
        fs::create_dir_all(data_dir.join("players")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let storage = Self {
            data_dir,
            defaults,
            servers_cache: DashMap::new(),
        };

        // Cargar configuraciones existentes
        storage.load_all_servers().await?;

        Ok(storage)
    }

    /// Obtiene la configuración de un servidor
    pub async fn get_server_config(&self, guild_id: u64) -> Result<ServerConfig> {
        // Verificar cache primero
        if let Some(config) = self.servers_cache.get(&guild_id) {
            return Ok(config.clone());
        }

        // Cargar desde archivo
        match self.load_server_config(guild_id).await {
            Ok(config) => {
                self.servers_cache.insert(guild_id, config.clone());
                Ok(config)
            }
            Err(e) => {
                debug!("Sin configuración para guild {}: {}", guild_id, e);
                let config = ServerConfig::with_defaults(guild_id, &self.defaults);

                self.save_server_config(&config).await?;
                self.servers_cache.insert(guild_id, config.clone());

                info!("📝 Configuración por defecto creada para guild {}", guild_id);
                Ok(config)
            }
        }
    }

    /// Actualiza la configuración de un servidor
    pub async fn update_server_config(&self, config: ServerConfig) -> Result<()> {
        let guild_id = config.guild_id;

        self.save_server_config(&config).await?;
        self.servers_cache.insert(guild_id, config);

        info!("💾 Configuración actualizada para guild {}", guild_id);
        Ok(())
    }

    /// Actualiza el canal de anuncios de un servidor
    pub async fn set_announcement_channel(&self, guild_id: u64, channel_id: Option<u64>) -> Result<()> {
        let mut config = self.get_server_config(guild_id).await?;
        config.announcement_channel_id = channel_id;
        self.update_server_config(config).await
    }

    /// Lista todas las configuraciones de servidores
    pub fn list_servers(&self) -> Vec<u64> {
        self.servers_cache.iter().map(|entry| *entry.key()).collect()
    }

    /// Servidores con un snapshot guardado
    pub async fn list_snapshot_guilds(&self) -> Result<Vec<GuildId>> {
        let guilds = guild_files(&self.data_dir.join("players"))
            .await?
            .into_iter()
            .filter(|id| *id != 0)
            .map(GuildId::new)
            .collect();
        Ok(guilds)
    }

    /// Obtiene estadísticas de almacenamiento
    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let server_configs = guild_files(&self.data_dir.join("servers")).await?.len();
        let player_snapshots = guild_files(&self.data_dir.join("players")).await?.len();

        Ok(StorageStats {
            server_configs,
            player_snapshots,
            cached_configs: self.servers_cache.len(),
            data_dir: self.data_dir.clone(),
        })
    }

    // Métodos privados

    async fn load_server_config(&self, guild_id: u64) -> Result<ServerConfig> {
        let file_path = self.get_server_file_path(guild_id);
        let content = fs::read_to_string(&file_path).await?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    async fn save_server_config(&self, config: &ServerConfig) -> Result<()> {
        let file_path = self.get_server_file_path(config.guild_id);
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&file_path, content).await?;
        Ok(())
    }

    async fn load_all_servers(&self) -> Result<()> {
        let mut loaded_count = 0;

        for guild_id in guild_files(&self.data_dir.join("servers")).await? {
            match self.load_server_config(guild_id).await {
                Ok(config) => {
                    self.servers_cache.insert(guild_id, config);
                    loaded_count += 1;
                }
                Err(e) => {
                    warn!("Error cargando configuración para guild {}: {}", guild_id, e);
                }
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargadas {} configuraciones de servidor", loaded_count);
        }

        Ok(())
    }

    fn get_server_file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir.join("servers").join(format!("guild_{}.json", guild_id))
    }

    fn get_player_file_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir.join("players").join(format!("guild_{}.json", guild_id.get()))
    }
}

#[async_trait]
impl PlayerStore for JsonStorage {
    async fn load_snapshot(&self, guild_id: GuildId) -> Result<Option<PlayerSnapshot>> {
        let file_path = self.get_player_file_path(guild_id);
        let content = match fs::read_to_string(&file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Error leyendo {}", file_path.display())),
        };

        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Snapshot inválido en {}", file_path.display()))?;
        Ok(Some(snapshot))
    }

    /// Un snapshot sin pistas borra el archivo: no hay nada que reanudar
    async fn save_snapshot(&self, guild_id: GuildId, snapshot: &PlayerSnapshot) -> Result<()> {
        let file_path = self.get_player_file_path(guild_id);

        if snapshot.tracks.is_empty() {
            match fs::remove_file(&file_path).await {
                Ok(()) => debug!("🗑️ Snapshot vacío eliminado para guild {}", guild_id),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }

        // Escribir aparte y renombrar para no dejar un archivo a medias
        let tmp_path = file_path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &file_path).await?;

        debug!("💾 Snapshot guardado para guild {} ({} pistas)", guild_id, snapshot.tracks.len());
        Ok(())
    }
}

#[async_trait]
impl GuildLimitsSource for JsonStorage {
    async fn fetch_guild_limits(&self, guild_id: GuildId) -> Result<GuildLimits> {
        Ok(self.get_server_config(guild_id.get()).await?.limits())
    }
}

/// Ids de los archivos `guild_<id>.json` de un directorio
async fn guild_files(dir: &Path) -> Result<Vec<u64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = fs::read_dir(dir).await?;
    let mut ids = Vec::new();

    while let Some(entry) = files.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            if let Some(guild_id) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            {
                ids.push(guild_id);
            }
        }
    }

    Ok(ids)
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub server_configs: usize,
    pub player_snapshots: usize,
    pub cached_configs: usize,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage Stats:\n\
             📁 Data Directory: {}\n\
             📝 Server Configs: {} files\n\
             🎶 Player Snapshots: {} files\n\
             💾 Cached Configs: {} in memory",
            self.data_dir.display(),
            self.server_configs,
            self.player_snapshots,
            self.cached_configs,
        )
    }
}
