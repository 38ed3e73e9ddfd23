use anyhow::{anyhow, Context as _, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt, StreamExt,
};
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backend::{BackendFactory, TrackEndReason},
    player::{GuildPlayer, PlayerServices},
    snapshot::PlayerStore,
    status::PlayerUpdate,
};
use crate::error::PlayerError;

/// Construcción en curso, compartida por todos los que la esperan
type Construction = Shared<BoxFuture<'static, Result<Arc<GuildPlayer>, Arc<anyhow::Error>>>>;

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub default_volume: f32,
    /// Si es `false` el volumen guardado no se restaura
    pub volume_supported: bool,
    /// Cuánto espera el guardado de apagado antes de rendirse
    pub shutdown_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_volume: 1.0,
            volume_supported: true,
            shutdown_timeout: Duration::from_secs(120),
        }
    }
}

struct RegistryInner {
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    pending: DashMap<GuildId, Construction>,
    /// La iteración de DashMap no es consistente; altas, bajas y recorridos
    /// completos pasan por este lock
    iteration_lock: Mutex<()>,
    backends: Arc<dyn BackendFactory>,
    store: Arc<dyn PlayerStore>,
    services: PlayerServices,
    settings: RegistrySettings,
}

/// Un player por servidor, creado a lo sumo una vez aunque lo pidan varios a
/// la vez.
#[derive(Clone)]
pub struct PlayerRegistry {
    inner: Arc<RegistryInner>,
}

impl PlayerRegistry {
    pub fn new(
        backends: Arc<dyn BackendFactory>,
        store: Arc<dyn PlayerStore>,
        services: PlayerServices,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                players: DashMap::new(),
                pending: DashMap::new(),
                iteration_lock: Mutex::new(()),
                backends,
                store,
                services,
                settings,
            }),
        }
    }

    /// Devuelve el player del servidor, creándolo (y restaurando su snapshot)
    /// si no existe. Las llamadas concurrentes esperan la misma construcción.
    pub async fn get_or_create(&self, guild_id: GuildId) -> Result<Arc<GuildPlayer>> {
        if let Some(player) = self.get_existing(guild_id) {
            return Ok(player);
        }

        let construction = match self.inner.pending.entry(guild_id) {
            Entry::Occupied(entry) => {
                debug!("⏳ Esperando construcción en curso para guild {}", guild_id);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // Una construcción pudo terminar entre la consulta y el entry
                if let Some(player) = self.get_existing(guild_id) {
                    return Ok(player);
                }
                let construction = self.spawn_construction(guild_id);
                entry.insert(construction.clone());
                construction
            }
        };

        construction
            .await
            .map_err(|e| anyhow!("No se pudo crear el player de guild {}: {:#}", guild_id, e))
    }

    /// Solo consulta; nunca construye
    pub fn get_existing(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.inner.players.get(&guild_id).map(|p| p.clone())
    }

    /// Quita el player del registro y lo destruye. Si no existe no hace nada.
    pub async fn destroy_player(&self, guild_id: GuildId) {
        let removed = {
            let _guard = self.inner.iteration_lock.lock();
            self.inner.players.remove(&guild_id)
        };

        match removed {
            Some((_, player)) => player.destroy().await,
            None => debug!("No hay player que destruir en guild {}", guild_id),
        }
    }

    pub fn playing_players(&self) -> Vec<Arc<GuildPlayer>> {
        let _guard = self.inner.iteration_lock.lock();
        self.inner
            .players
            .iter()
            .filter(|entry| entry.value().is_playing())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn playing_count(&self) -> usize {
        let _guard = self.inner.iteration_lock.lock();
        self.inner
            .players
            .iter()
            .filter(|entry| entry.value().is_playing())
            .count()
    }

    pub fn total_count(&self) -> usize {
        let _guard = self.inner.iteration_lock.lock();
        self.inner.players.len()
    }

    /// Suscripción al canal de estado en vivo
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerUpdate> {
        self.inner.services.status.subscribe()
    }

    /// Entrega el aviso de fin de pista del nodo al player del servidor.
    ///
    /// Lo llama el cliente que recibe los eventos del nodo de audio;
    /// [`LavalinkLink`](super::lavalink_simple::LavalinkLink) todavía no los
    /// produce, así que sin ese cliente cada servidor se queda en su primera
    /// pista.
    pub async fn dispatch_track_end(&self, guild_id: GuildId, reason: TrackEndReason) -> Result<(), PlayerError> {
        match self.get_existing(guild_id) {
            Some(player) => player.on_track_end(reason).await,
            None => {
                debug!("Fin de pista para guild {} sin player", guild_id);
                Ok(())
            }
        }
    }

    /// Guarda el snapshot de cada player. Espera como mucho
    /// `shutdown_timeout`; un guardado fallido no frena a los demás.
    /// Devuelve cuántos se guardaron.
    pub async fn shutdown(&self) -> usize {
        let players: Vec<(GuildId, Arc<GuildPlayer>)> = {
            let _guard = self.inner.iteration_lock.lock();
            self.inner
                .players
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect()
        };
        info!("💾 Guardando {} players antes de salir", players.len());

        let mut saves: futures::stream::FuturesUnordered<_> = players
            .into_iter()
            .map(|(guild_id, player)| {
                let store = self.inner.store.clone();
                async move {
                    let snapshot = player.to_snapshot();
                    (guild_id, store.save_snapshot(guild_id, &snapshot).await)
                }
            })
            .collect();

        let deadline = tokio::time::sleep(self.inner.settings.shutdown_timeout);
        tokio::pin!(deadline);

        let mut saved = 0;
        loop {
            tokio::select! {
                next = saves.next() => match next {
                    Some((_, Ok(()))) => saved += 1,
                    Some((guild_id, Err(e))) => error!("❌ No se pudo guardar guild {}: {:?}", guild_id, e),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!("⏱️ Tiempo de guardado agotado, {} players sin guardar", saves.len());
                    break;
                }
            }
        }

        info!("✅ {} players guardados", saved);
        saved
    }

    /// Publica periódicamente el estado de los players que suenan
    pub fn spawn_status_pusher(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for player in registry.playing_players() {
                            player.publish();
                        }
                    }
                }
            }
            debug!("Status pusher detenido");
        })
    }

    // Funciones privadas

    fn spawn_construction(&self, guild_id: GuildId) -> Construction {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let pending = PendingGuard {
                inner: inner.clone(),
                guild_id,
            };

            let result = construct(&inner, guild_id).await;
            if let Ok(player) = &result {
                let _guard = inner.iteration_lock.lock();
                inner.players.insert(guild_id, player.clone());
            }
            // El player ya está registrado cuando desaparece la marca
            drop(pending);

            result.map_err(Arc::new)
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(anyhow!("La construcción del player de guild {} abortó: {}", guild_id, e))),
            }
        }
        .boxed()
        .shared()
    }
}

/// Quita la marca de construcción aunque la tarea termine con pánico
struct PendingGuard {
    inner: Arc<RegistryInner>,
    guild_id: GuildId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.guild_id);
    }
}

async fn construct(inner: &RegistryInner, guild_id: GuildId) -> Result<Arc<GuildPlayer>> {
    let link = inner.backends.create_link(guild_id);
    let player = Arc::new(GuildPlayer::new(
        guild_id,
        link,
        inner.services.clone(),
        inner.settings.default_volume,
    ));

    let snapshot = match inner.store.load_snapshot(guild_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            player.destroy().await;
            return Err(e).with_context(|| format!("Error leyendo el snapshot de guild {}", guild_id));
        }
    };

    match snapshot {
        Some(snapshot) => {
            player.restore(snapshot, inner.settings.volume_supported).await;
        }
        None => debug!("Sin snapshot para guild {}", guild_id),
    }

    info!("🎶 Player creado para guild {}", guild_id);
    Ok(player)
}
