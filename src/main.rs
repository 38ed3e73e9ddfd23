use anyhow::Result;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use open_music_engine::{
    audio::{
        lavalink_simple::LavalinkManager,
        limiter::QueueLimiter,
        player::PlayerServices,
        registry::PlayerRegistry,
    },
    bot::announce::DiscordAnnouncer,
    config::Config,
    monitoring::Metrics,
    storage::JsonStorage,
};

/// Actualizaciones de estado que un observador lento puede perder
const STATUS_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_engine=debug".parse()?)
                .add_directive("serenity=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Engine v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Inicializar almacenamiento JSON
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone(), config.default_limits()).await?);
    info!("{}", storage.get_storage_stats().await?);

    let metrics = Arc::new(Metrics::new());

    // Anuncios por el canal registrado de cada servidor
    let http = Arc::new(Http::new(&config.discord_token));
    let announcer = Arc::new(DiscordAnnouncer::new(http));
    for guild_id in storage.list_servers().into_iter().filter(|id| *id != 0) {
        let server = storage.get_server_config(guild_id).await?;
        if let Some(channel_id) = server.announcement_channel_id.filter(|id| *id != 0) {
            announcer.set_channel(GuildId::new(guild_id), ChannelId::new(channel_id));
        }
    }

    let (status, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
    let services = PlayerServices {
        limiter: Arc::new(QueueLimiter::new(storage.clone(), metrics.clone())),
        announcer,
        metrics: metrics.clone(),
        status,
        announce_tracks: config.announce_tracks,
    };

    // Inicializar Lavalink
    info!("🎼 Inicializando Lavalink...");
    let lavalink = Arc::new(LavalinkManager::new(&config));

    let registry = PlayerRegistry::new(lavalink, storage.clone(), services, config.registry_settings());

    // Reanudar los players que quedaron guardados
    for guild_id in storage.list_snapshot_guilds().await? {
        if let Err(e) = registry.get_or_create(guild_id).await {
            warn!("⚠️ No se pudo restaurar guild {}: {:#}", guild_id, e);
        }
    }
    info!(
        "♻️ {} players restaurados, {} reproduciendo",
        registry.total_count(),
        registry.playing_count()
    );

    // Los fines de pista del nodo entran por registry.dispatch_track_end
    let token = CancellationToken::new();
    let pusher = registry.spawn_status_pusher(config.status_push_interval(), token.clone());

    info!("🚀 Engine iniciado exitosamente");

    // Manejar shutdown graceful
    tokio::signal::ctrl_c().await?;
    info!("⚠️ Señal de shutdown recibida, cerrando...");

    token.cancel();
    if let Err(e) = pusher.await {
        warn!("⚠️ Status pusher terminó con error: {:?}", e);
    }

    let saved = registry.shutdown().await;
    info!(
        "👋 {} players guardados | {} pistas iniciadas | {} fallos de carga | {} oyentes hoy",
        saved,
        metrics.tracks_started(),
        metrics.load_failures(),
        metrics.listeners_today()
    );

    Ok(())
}
