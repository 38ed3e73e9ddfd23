use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{
    backend::{LinkState, PlayOptions, PlaybackBackend, TrackEndReason},
    limiter::{PermissionLevel, QueueLimitStatus, QueueLimiter, TrackCounter},
    queue::{RepeatMode, TrackQueue},
    snapshot::{PlayerSnapshot, SavedTrack},
    status::{self, PlayerInfo, PlayerUpdate},
    track::{TrackContext, TrackId},
};
use crate::{
    bot::announce::{self, Announcer},
    error::{PlayerError, SeekDeniedError},
    monitoring::Metrics,
};

/// Pistas que se recuerdan en el historial
pub const MAX_HISTORY_SIZE: usize = 20;

/// Volumen máximo (150%)
pub const MAX_VOLUME: f32 = 1.5;

/// Dependencias compartidas por todos los players.
#[derive(Clone)]
pub struct PlayerServices {
    pub limiter: Arc<QueueLimiter>,
    pub announcer: Arc<dyn Announcer>,
    pub metrics: Arc<Metrics>,
    pub status: broadcast::Sender<PlayerUpdate>,
    pub announce_tracks: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Destroyed,
}

struct PlayerState {
    queue: TrackQueue,
    current: Option<TrackContext>,
    /// Última pista enviada al nodo; pasa al historial cuando termina
    last_loaded: Option<TrackContext>,
    history: VecDeque<TrackContext>,
    paused: bool,
    volume: f32,
    destroyed: bool,
}

/// Player de un servidor: su cola, la pista actual y el historial.
///
/// El estado vive detrás de un mutex síncrono que nunca se mantiene tomado a
/// través de un `.await`; las llamadas al nodo de audio se hacen después de
/// soltarlo.
pub struct GuildPlayer {
    guild_id: GuildId,
    link: Arc<dyn PlaybackBackend>,
    services: PlayerServices,
    state: Mutex<PlayerState>,
}

impl GuildPlayer {
    pub fn new(guild_id: GuildId, link: Arc<dyn PlaybackBackend>, services: PlayerServices, volume: f32) -> Self {
        Self {
            guild_id,
            link,
            services,
            state: Mutex::new(PlayerState {
                queue: TrackQueue::new(),
                current: None,
                last_loaded: None,
                history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
                paused: false,
                volume: volume.clamp(0.0, MAX_VOLUME),
                destroyed: false,
            }),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Agrega una pista si los límites del servidor lo permiten y, si no
    /// suena nada, empieza a reproducirla.
    pub async fn queue(&self, track: TrackContext, level: PermissionLevel) -> Result<(), PlayerError> {
        self.ensure_alive()?;

        let status = self
            .services
            .limiter
            .is_queue_allowed(self.guild_id, &track, level, self, 0)
            .await?;
        if !status.allowed {
            return Err(PlayerError::QueueRejected {
                code: status.code,
                message: status.message,
            });
        }

        let idle = {
            let mut state = self.state.lock();
            state.queue.add(track, false);
            state.current.is_none() && !state.paused
        };

        if idle {
            self.start_if_idle(false).await
        } else {
            self.publish();
            Ok(())
        }
    }

    /// Agrega un lote (playlist). Cada pista se evalúa contando las
    /// aceptadas antes que ella; devuelve el resultado de cada una.
    pub async fn queue_all(
        &self,
        tracks: Vec<TrackContext>,
        level: PermissionLevel,
    ) -> Result<Vec<QueueLimitStatus>, PlayerError> {
        self.ensure_alive()?;

        let statuses = self
            .services
            .limiter
            .check_all(self.guild_id, &tracks, level, self)
            .await?;

        let accepted: Vec<TrackContext> = tracks
            .into_iter()
            .zip(&statuses)
            .filter(|(_, status)| status.allowed)
            .map(|(track, _)| track)
            .collect();
        info!("📋 {} de {} pistas agregadas en guild {}", accepted.len(), statuses.len(), self.guild_id);

        let idle = {
            let mut state = self.state.lock();
            state.queue.add_all(accepted, false);
            state.current.is_none() && !state.paused
        };

        if idle {
            self.start_if_idle(false).await?;
        } else {
            self.publish();
        }
        Ok(statuses)
    }

    /// Saca la siguiente pista de la cola y la manda al nodo de audio,
    /// reemplazando la que estuviera cargada (se usa tras un fin de pista).
    ///
    /// Con `silent` no se anuncia (se usa al restaurar un snapshot).
    pub async fn load_and_play(&self, silent: bool) -> Result<(), PlayerError> {
        self.advance(silent, false).await
    }

    /// Como [`load_and_play`](Self::load_and_play), pero solo si no hay
    /// pista cargada ni pausa. Se comprueba bajo el mismo lock que `take`.
    async fn start_if_idle(&self, silent: bool) -> Result<(), PlayerError> {
        self.advance(silent, true).await
    }

    async fn advance(&self, silent: bool, only_if_idle: bool) -> Result<(), PlayerError> {
        // Con repeat ALL una pista rechazada vuelve a la cola: como mucho una vuelta
        let mut attempts = self.state.lock().queue.len() + 1;
        let mut last_error = None;

        while attempts > 0 {
            attempts -= 1;
            let retrying = last_error.is_some();

            let next = {
                let mut state = self.state.lock();
                if state.destroyed {
                    return Err(PlayerError::Destroyed);
                }
                let busy = state.current.is_some();
                if (only_if_idle && (busy || state.paused)) || (retrying && busy) {
                    debug!("Ya hay una pista cargada en guild {}", self.guild_id);
                    return Ok(());
                }

                match state.queue.take(false) {
                    Some(mut track) => {
                        let start = track.take_start_position();
                        let announce = !silent
                            && self.services.announce_tracks
                            && state.queue.repeat() != RepeatMode::Single
                            && !state.paused;
                        state.current = Some(track.clone());
                        state.last_loaded = Some(track.clone());
                        Some((track, start, announce))
                    }
                    None => {
                        state.current = None;
                        None
                    }
                }
            };

            let Some((track, start_millis, announce)) = next else {
                debug!("Cola vacía para guild {}", self.guild_id);
                self.publish();
                return last_error.map_or(Ok(()), Err);
            };

            let options = PlayOptions {
                start_millis,
                end_millis: track.end_position(),
            };
            if let Err(e) = self.link.play(track.track(), options).await {
                error!("❌ El nodo rechazó {}: {:?}", track.effective_title(), e);
                self.discard_failed(track.id());
                self.services.metrics.load_failed();
                self.services
                    .announcer
                    .send(self.guild_id, announce::load_failed(Some(&track)));
                last_error = Some(PlayerError::Backend(e));
                continue;
            }

            info!("🎵 Reproduciendo: {} en guild {}", track.effective_title(), self.guild_id);
            self.services.metrics.track_started();
            self.services.metrics.log_listener(track.requester());
            if announce {
                self.services
                    .announcer
                    .send(self.guild_id, announce::now_playing(&track));
            }

            self.publish();
            return Ok(());
        }

        warn!("⚠️ Ninguna pista de la cola pudo cargarse en guild {}", self.guild_id);
        self.publish();
        last_error.map_or(Ok(()), Err)
    }

    /// Reacción al aviso de fin de pista del nodo de audio
    pub async fn on_track_end(&self, reason: TrackEndReason) -> Result<(), PlayerError> {
        if self.state.lock().destroyed {
            debug!("Fin de pista ignorado: player de {} destruido", self.guild_id);
            return Ok(());
        }

        match reason {
            TrackEndReason::Finished | TrackEndReason::Stopped => {
                {
                    let mut state = self.state.lock();
                    state.current = None;
                    if let Some(finished) = state.last_loaded.take() {
                        state.history.push_back(finished);
                        while state.history.len() > MAX_HISTORY_SIZE {
                            state.history.pop_front();
                        }
                    }
                }
                self.load_and_play(false).await
            }
            TrackEndReason::Cleanup => {
                debug!("🧹 Limpieza del nodo en guild {}", self.guild_id);
                Ok(())
            }
            TrackEndReason::LoadFailed => {
                let failed = {
                    let mut state = self.state.lock();
                    state.queue.on_skipped();
                    state.current = None;
                    state.last_loaded.take()
                };
                warn!(
                    "⚠️ No se pudo cargar {} en guild {}",
                    failed.as_ref().map_or("la pista", |t| t.effective_title()),
                    self.guild_id
                );
                self.services.metrics.load_failed();
                self.services
                    .announcer
                    .send(self.guild_id, announce::load_failed(failed.as_ref()));
                self.load_and_play(false).await
            }
            other => {
                warn!("⚠️ Fin de pista inesperado en guild {}: {:?}", self.guild_id, other);
                Ok(())
            }
        }
    }

    /// Corta la pista actual; la siguiente empieza cuando el nodo avisa el fin
    pub async fn skip(&self) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        {
            let mut state = self.state.lock();
            state.queue.on_skipped();
            state.current = None;
        }
        self.link.stop().await?;
        info!("⏭️ Pista saltada en guild {}", self.guild_id);
        Ok(())
    }

    /// Detiene la reproducción y vacía la cola
    pub async fn stop(&self) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        {
            let mut state = self.state.lock();
            state.queue.clear();
            state.current = None;
        }
        self.link.stop().await?;
        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        self.publish();
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.set_pause(true).await
    }

    /// Reanuda; si no había pista cargada, arranca la siguiente
    pub async fn play(&self) -> Result<(), PlayerError> {
        self.set_pause(false).await
    }

    pub async fn set_pause(&self, paused: bool) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        let load_next = {
            let mut state = self.state.lock();
            state.paused = paused;
            !paused && state.current.is_none() && !state.queue.is_empty()
        };

        self.link.pause(paused).await?;
        if paused {
            info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        } else {
            info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        }

        if load_next {
            self.start_if_idle(false).await
        } else {
            self.publish();
            Ok(())
        }
    }

    /// Salta a `position_millis`, relativo al inicio efectivo de la pista
    pub async fn seek_to(&self, position_millis: u64) -> Result<(), PlayerError> {
        let target = {
            let state = self.state.lock();
            let track = state.current.as_ref().ok_or(SeekDeniedError::NothingPlaying)?;
            if track.is_stream() {
                return Err(SeekDeniedError::LiveStream.into());
            }
            if !track.track().is_seekable {
                return Err(SeekDeniedError::NotSeekable.into());
            }
            let duration = track.effective_duration().unwrap_or(0);
            if position_millis > duration {
                return Err(SeekDeniedError::OutOfRange {
                    position: position_millis,
                    duration,
                }
                .into());
            }
            track.start_position() + position_millis
        };

        self.link.seek(target).await?;
        debug!("⏩ Seek a {}ms en guild {}", target, self.guild_id);
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        if !(0.0..=MAX_VOLUME).contains(&volume) {
            return Err(PlayerError::InvalidVolume(volume));
        }
        self.ensure_alive()?;

        self.state.lock().volume = volume;
        self.link.set_volume(volume).await?;
        info!("🔊 Volumen ajustado a {}%", (volume * 100.0).round() as u32);
        Ok(())
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        self.state.lock().queue.set_repeat(mode);
        debug!("🔁 Repeat {:?} en guild {}", mode, self.guild_id);
        self.publish();
    }

    pub fn set_shuffle(&self, shuffle: bool) {
        self.state.lock().queue.set_shuffle(shuffle);
        debug!("🔀 Shuffle {} en guild {}", shuffle, self.guild_id);
        self.publish();
    }

    pub fn set_round_robin(&self, round_robin: bool) {
        self.state.lock().queue.set_round_robin(round_robin);
        self.publish();
    }

    pub fn reshuffle(&self) {
        self.state.lock().queue.reshuffle();
        self.publish();
    }

    /// Conecta al canal de voz; no hace nada si ya está en él
    pub async fn join_channel(&self, channel_id: ChannelId) -> Result<(), PlayerError> {
        self.ensure_alive()?;
        if self.link.current_channel() == Some(channel_id) {
            debug!("Ya conectado a {} en guild {}", channel_id, self.guild_id);
            return Ok(());
        }

        self.link.connect(channel_id).await?;
        info!("🔊 Conectado a {} en guild {}", channel_id, self.guild_id);
        Ok(())
    }

    /// Vacía la cola, corta la pista y suelta el enlace. Llamarlo de nuevo
    /// no hace nada.
    pub async fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.queue.clear();
            state.current = None;
            state.last_loaded = None;
        }

        if self.link.state() == LinkState::Destroyed {
            warn!("⚠️ El enlace de guild {} ya estaba destruido", self.guild_id);
        } else {
            if let Err(e) = self.link.stop().await {
                warn!("⚠️ Error deteniendo guild {}: {:?}", self.guild_id, e);
            }
            if let Err(e) = self.link.destroy().await {
                warn!("⚠️ Error liberando el enlace de guild {}: {:?}", self.guild_id, e);
            }
        }

        info!("🗑️ Player destruido en guild {}", self.guild_id);
        let _ = self.services.status.send(PlayerUpdate {
            guild_id: self.guild_id,
            info: PlayerInfo::empty(),
        });
    }

    /// Quita de la cola las pistas indicadas; la actual se salta al final
    pub async fn skip_tracks(&self, track_ids: &[TrackId]) -> Result<usize, PlayerError> {
        let (removed, skip_current) = {
            let mut state = self.state.lock();
            let removed = state.queue.remove_by_ids(track_ids, false).len();
            let skip_current = state
                .current
                .as_ref()
                .is_some_and(|t| track_ids.contains(&t.id()));
            (removed, skip_current)
        };

        if skip_current {
            self.skip().await?;
        } else {
            self.publish();
        }
        Ok(removed + usize::from(skip_current))
    }

    /// Como [`skip_tracks`](Self::skip_tracks) pero comprobando permisos: un
    /// DJ salta cualquier cosa, el resto solo lo que agregó.
    pub async fn skip_tracks_for_member(
        &self,
        user_id: UserId,
        level: PermissionLevel,
        track_ids: &[TrackId],
    ) -> Result<usize, PlayerError> {
        if !level.is_elevated() {
            let allowed = {
                let state = self.state.lock();
                let current_skippable = state
                    .current
                    .as_ref()
                    .map_or(true, |t| !track_ids.contains(&t.id()) || t.requester() == user_id);
                current_skippable && state.queue.is_user_track_owner(user_id, track_ids)
            };
            if !allowed {
                return Err(PlayerError::SkipDenied);
            }
        }

        self.skip_tracks(track_ids).await
    }

    /// Historial más reciente primero, `[start, end)`
    pub fn history_range(&self, start: usize, end: usize) -> Vec<TrackContext> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .rev()
            .skip(start)
            .take(end.saturating_sub(start))
            .cloned()
            .collect()
    }

    /// La pista actual (índice 0) seguida de la cola en orden de reproducción
    pub fn tracks_in_range(&self, start: usize, end: usize) -> Vec<TrackContext> {
        if start >= end {
            return Vec::new();
        }

        let mut state = self.state.lock();
        let current = state.current.clone();
        let offset = usize::from(current.is_some());
        let upcoming = state.queue.get_in_range(0, end.saturating_sub(offset));

        current
            .into_iter()
            .chain(upcoming)
            .skip(start)
            .take(end - start)
            .collect()
    }

    /// La cola pendiente (sin la actual) en orden de reproducción
    pub fn remaining_tracks(&self) -> Vec<TrackContext> {
        self.state.lock().queue.ordered()
    }

    pub fn playing_track(&self) -> Option<TrackContext> {
        self.state.lock().current.clone()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Milisegundos que faltan: lo que queda de la actual más la cola.
    /// Las transmisiones en vivo no suman.
    pub fn total_remaining_millis(&self) -> u64 {
        let state = self.state.lock();
        let current = state.current.as_ref().map_or(0, |track| {
            let played = self.link.position_millis().saturating_sub(track.start_position());
            track
                .effective_duration()
                .map_or(0, |duration| duration.saturating_sub(played))
        });
        current + state.queue.total_duration_millis()
    }

    pub fn streams_count(&self) -> usize {
        let state = self.state.lock();
        let current = state.current.as_ref().is_some_and(|t| t.is_stream());
        state.queue.stream_count() + usize::from(current)
    }

    pub fn playback_state(&self) -> PlaybackState {
        let state = self.state.lock();
        if state.destroyed {
            PlaybackState::Destroyed
        } else if state.current.is_none() {
            PlaybackState::Idle
        } else if state.paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback_state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_shuffle(&self) -> bool {
        self.state.lock().queue.is_shuffle()
    }

    pub fn is_round_robin(&self) -> bool {
        self.state.lock().queue.is_round_robin()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.state.lock().queue.repeat()
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn position_millis(&self) -> u64 {
        self.link.position_millis()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn player_info(&self) -> PlayerInfo {
        status::to_player_info(self)
    }

    /// Estado para guardar: la pista actual primero, luego la cola, sin
    /// repetir la actual.
    pub fn to_snapshot(&self) -> PlayerSnapshot {
        let state = self.state.lock();
        let position_millis = state.current.as_ref().map(|_| self.link.position_millis());

        // Con repeat ALL la pista actual ya volvió al final de la cola
        let requeued = match (&state.current, state.queue.repeat()) {
            (Some(current), RepeatMode::All) => state
                .queue
                .iter()
                .enumerate()
                .filter(|(_, t)| t.id() == current.id())
                .map(|(i, _)| i)
                .last(),
            _ => None,
        };

        let tracks = state
            .current
            .iter()
            .chain(
                state
                    .queue
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| Some(*i) != requeued)
                    .map(|(_, t)| t),
            )
            .filter_map(|track| match SavedTrack::from_context(track) {
                Ok(saved) => Some(saved),
                Err(e) => {
                    warn!("⚠️ No se pudo serializar {}: {}", track.effective_title(), e);
                    None
                }
            })
            .collect();

        PlayerSnapshot {
            paused: state.paused,
            shuffled: state.queue.is_shuffle(),
            repeat_mode: state.queue.repeat(),
            volume: state.volume,
            position_millis,
            channel_ref: self.link.current_channel(),
            tracks,
        }
    }

    /// Reconstruye el player desde un snapshot guardado.
    ///
    /// Las pistas que no se pueden decodificar se saltan. La posición se
    /// aplica a la primera pista, que se reproduce en silencio salvo que el
    /// snapshot estuviera en pausa. Devuelve cuántas pistas se recuperaron.
    pub async fn restore(&self, snapshot: PlayerSnapshot, volume_supported: bool) -> usize {
        let total = snapshot.tracks.len();
        let mut restored = Vec::with_capacity(total);
        for (i, saved) in snapshot.tracks.iter().enumerate() {
            match saved.restore() {
                Ok(track) => match snapshot.position_millis {
                    Some(position) if i == 0 => restored.push(track.with_resume_at(position)),
                    _ => restored.push(track),
                },
                Err(e) => warn!(
                    "⚠️ Pista {} de {} ({}) no se pudo restaurar en guild {}: {}",
                    i + 1,
                    total,
                    saved.title,
                    self.guild_id,
                    e
                ),
            }
        }
        let count = restored.len();

        {
            let mut state = self.state.lock();
            state.paused = snapshot.paused;
            if volume_supported {
                state.volume = snapshot.volume.clamp(0.0, MAX_VOLUME);
            }
            state.queue.set_repeat(snapshot.repeat_mode);
            // La pista que sonaba sale primero; el shuffle se aplica después
            state.queue.set_shuffle(false);
            state.queue.add_all(restored, true);
        }

        if let Some(channel_id) = snapshot.channel_ref {
            if let Err(e) = self.join_channel(channel_id).await {
                warn!("⚠️ No se pudo reconectar a {} en guild {}: {}", channel_id, self.guild_id, e);
            }
        }
        if volume_supported {
            if let Err(e) = self.link.set_volume(self.volume()).await {
                warn!("⚠️ No se pudo aplicar el volumen en guild {}: {:?}", self.guild_id, e);
            }
        }
        if !snapshot.paused {
            if let Err(e) = self.start_if_idle(true).await {
                warn!("⚠️ No se pudo reanudar guild {}: {}", self.guild_id, e);
            }
        }
        self.set_shuffle(snapshot.shuffled);

        info!("♻️ Restauradas {}/{} pistas en guild {}", count, total, self.guild_id);
        count
    }

    // Funciones privadas

    fn ensure_alive(&self) -> Result<(), PlayerError> {
        if self.state.lock().destroyed {
            return Err(PlayerError::Destroyed);
        }
        Ok(())
    }

    /// Olvida una pista que el nodo no aceptó para que no llegue al historial
    fn discard_failed(&self, track_id: TrackId) {
        let mut state = self.state.lock();
        state.queue.on_skipped();
        if state.current.as_ref().is_some_and(|t| t.id() == track_id) {
            state.current = None;
        }
        if state.last_loaded.as_ref().is_some_and(|t| t.id() == track_id) {
            state.last_loaded = None;
        }
    }

    /// Publica el estado actual; sin suscriptores el envío se descarta
    pub(crate) fn publish(&self) {
        let _ = self.services.status.send(PlayerUpdate {
            guild_id: self.guild_id,
            info: self.player_info(),
        });
    }
}

impl TrackCounter for GuildPlayer {
    fn track_count(&self) -> usize {
        let state = self.state.lock();
        state.queue.len() + usize::from(state.current.is_some())
    }

    fn user_track_count(&self, user_id: UserId) -> usize {
        let state = self.state.lock();
        let current = state.current.as_ref().is_some_and(|t| t.requester() == user_id);
        state.queue.user_track_count(user_id) + usize::from(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        backend::MockPlaybackBackend,
        limiter::{GuildLimits, QueueLimitCode},
        testing::{self, guild, track, BackendCommand},
        track::{AudioTrack, TrackSplit},
    };
    use pretty_assertions::assert_eq;

    fn titles(tracks: &[TrackContext]) -> Vec<&str> {
        tracks.iter().map(|t| t.effective_title()).collect()
    }

    #[tokio::test]
    async fn queueing_while_idle_starts_playback() {
        let (player, backend, announcer) = testing::player();

        player.queue(track("Uno", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("Dos", 1), PermissionLevel::User).await.unwrap();

        assert_eq!(backend.played(), vec!["Uno"]);
        assert_eq!(player.playback_state(), PlaybackState::Playing);
        assert_eq!(titles(&player.remaining_tracks()), vec!["Dos"]);
        assert_eq!(announcer.messages().len(), 1);
        assert_eq!(player.track_count(), 2);
    }

    #[tokio::test]
    async fn rejected_tracks_never_reach_the_queue() {
        let (player, _, _) = testing::player_with(GuildLimits {
            max_tracks: Some(2),
            ..GuildLimits::default()
        });
        player.queue(track("Uno", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("Dos", 1), PermissionLevel::User).await.unwrap();

        let err = player.queue(track("Tres", 1), PermissionLevel::User).await.unwrap_err();
        assert!(matches!(
            err,
            PlayerError::QueueRejected {
                code: QueueLimitCode::TrackLimitExceeded,
                ..
            }
        ));
        assert_eq!(player.track_count(), 2);

        player.queue(track("Tres", 2), PermissionLevel::Dj).await.unwrap();
        assert_eq!(player.track_count(), 3);
    }

    #[tokio::test]
    async fn playlist_batches_respect_the_track_limit() {
        let (player, backend, _) = testing::player_with(GuildLimits {
            max_tracks: Some(10),
            ..GuildLimits::default()
        });
        let playlist: Vec<_> = (0..50).map(|i| track(&format!("P{i}"), 1).in_playlist()).collect();

        let statuses = player.queue_all(playlist, PermissionLevel::User).await.unwrap();
        assert_eq!(statuses.iter().filter(|s| s.allowed).count(), 10);
        assert_eq!(player.track_count(), 10);
        assert_eq!(backend.played(), vec!["P0"]);
    }

    #[tokio::test]
    async fn history_keeps_the_twenty_most_recent_tracks() {
        let (player, _, _) = testing::player();
        for i in 0..25 {
            player.queue(track(&format!("T{i}"), 1), PermissionLevel::User).await.unwrap();
        }
        for _ in 0..25 {
            player.on_track_end(TrackEndReason::Finished).await.unwrap();
        }

        assert_eq!(player.history_len(), MAX_HISTORY_SIZE);
        let newest_first: Vec<String> = (5..25).rev().map(|i| format!("T{i}")).collect();
        assert_eq!(titles(&player.history_range(0, 20)), newest_first);
        assert_eq!(player.playback_state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn failed_loads_are_announced_and_skipped() {
        let (player, backend, announcer) = testing::player();
        player.queue(track("Rota", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("Buena", 1), PermissionLevel::User).await.unwrap();

        player.on_track_end(TrackEndReason::LoadFailed).await.unwrap();

        assert_eq!(backend.played(), vec!["Rota", "Buena"]);
        assert_eq!(player.history_len(), 0);
        assert!(announcer.messages().iter().any(|m| m.contains("Rota") && m.starts_with('❌')));
        assert_eq!(player.services.metrics.load_failures(), 1);
    }

    #[tokio::test]
    async fn cleanup_and_replaced_do_not_advance() {
        let (player, backend, _) = testing::player();
        player.queue(track("Uno", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("Dos", 1), PermissionLevel::User).await.unwrap();

        player.on_track_end(TrackEndReason::Cleanup).await.unwrap();
        player.on_track_end(TrackEndReason::Replaced).await.unwrap();

        assert_eq!(backend.played(), vec!["Uno"]);
        assert_eq!(player.playing_track().map(|t| t.effective_title().to_string()), Some("Uno".to_string()));
    }

    #[tokio::test]
    async fn repeat_single_replays_without_announcing_until_skipped() {
        let (player, backend, announcer) = testing::player();
        player.queue(track("Uno", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("Dos", 1), PermissionLevel::User).await.unwrap();
        player.set_repeat_mode(RepeatMode::Single);

        player.on_track_end(TrackEndReason::Finished).await.unwrap();
        player.on_track_end(TrackEndReason::Finished).await.unwrap();
        assert_eq!(backend.played(), vec!["Uno", "Uno", "Uno"]);
        assert_eq!(announcer.messages().len(), 1);

        player.skip().await.unwrap();
        player.on_track_end(TrackEndReason::Stopped).await.unwrap();
        assert_eq!(backend.played().last().map(String::as_str), Some("Dos"));
    }

    #[tokio::test]
    async fn stop_clears_everything() {
        let (player, backend, _) = testing::player();
        player.queue(track("Uno", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("Dos", 1), PermissionLevel::User).await.unwrap();

        player.stop().await.unwrap();
        player.on_track_end(TrackEndReason::Stopped).await.unwrap();

        assert_eq!(backend.played(), vec!["Uno"]);
        assert!(backend.commands().contains(&BackendCommand::Stop));
        assert_eq!(player.track_count(), 0);
        assert_eq!(player.playback_state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn seeking_is_checked_against_the_playing_track() {
        let (player, backend, _) = testing::player();
        assert_eq!(
            player.seek_to(0).await.unwrap_err().to_string(),
            SeekDeniedError::NothingPlaying.to_string()
        );

        let chapter = TrackContext::new(AudioTrack::new("mix", "Mix", 3_600_000), UserId::new(1)).with_split(
            TrackSplit {
                start_millis: 600_000,
                end_millis: 900_000,
                title: "Capítulo".to_string(),
            },
        );
        player.queue(chapter, PermissionLevel::User).await.unwrap();
        assert_eq!(
            backend.commands()[0],
            BackendCommand::Play(
                "Mix".to_string(),
                PlayOptions {
                    start_millis: 600_000,
                    end_millis: Some(900_000)
                }
            )
        );

        player.seek_to(30_000).await.unwrap();
        assert!(backend.commands().contains(&BackendCommand::Seek(630_000)));
        assert!(matches!(
            player.seek_to(300_001).await,
            Err(PlayerError::SeekDenied(SeekDeniedError::OutOfRange { .. }))
        ));
    }

    #[tokio::test]
    async fn live_streams_cannot_seek() {
        let (player, _, _) = testing::player();
        let live = TrackContext::new(AudioTrack::live("radio", "Radio"), UserId::new(1));
        player.queue(live, PermissionLevel::User).await.unwrap();

        assert!(matches!(
            player.seek_to(1_000).await,
            Err(PlayerError::SeekDenied(SeekDeniedError::LiveStream))
        ));
        assert_eq!(player.streams_count(), 1);
    }

    #[tokio::test]
    async fn volume_must_be_in_range() {
        let (player, backend, _) = testing::player();
        assert!(matches!(player.set_volume(1.6).await, Err(PlayerError::InvalidVolume(_))));
        assert!(matches!(player.set_volume(f32::NAN).await, Err(PlayerError::InvalidVolume(_))));

        player.set_volume(0.5).await.unwrap();
        assert_eq!(player.volume(), 0.5);
        assert_eq!(backend.commands(), vec![BackendCommand::Volume(0.5)]);
    }

    #[tokio::test]
    async fn pausing_an_idle_player_holds_the_queue() {
        let (player, backend, _) = testing::player();
        player.pause().await.unwrap();
        player.queue(track("Uno", 1), PermissionLevel::User).await.unwrap();
        assert!(backend.played().is_empty());

        player.play().await.unwrap();
        assert_eq!(backend.played(), vec!["Uno"]);
        assert!(player.is_playing());
    }

    #[tokio::test]
    async fn resuming_while_queueing_starts_a_single_track() {
        let (player, backend, _) = testing::player();
        player.pause().await.unwrap();
        player.queue(track("A", 1), PermissionLevel::User).await.unwrap();
        backend.yield_on_pause();

        let (resumed, queued) = tokio::join!(player.play(), player.queue(track("B", 1), PermissionLevel::User));
        resumed.unwrap();
        queued.unwrap();
        assert_eq!(backend.played(), vec!["A"]);
        assert_eq!(titles(&player.remaining_tracks()), vec!["B"]);

        player.on_track_end(TrackEndReason::Finished).await.unwrap();
        assert_eq!(backend.played(), vec!["A", "B"]);
        assert_eq!(titles(&player.history_range(0, 10)), vec!["A"]);
    }

    #[tokio::test]
    async fn tracks_the_node_rejects_are_skipped() {
        let (player, backend, announcer) = testing::player();
        backend.reject("Rota");
        player.pause().await.unwrap();
        player.queue(track("Rota", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("Buena", 1), PermissionLevel::User).await.unwrap();

        player.play().await.unwrap();
        assert_eq!(backend.played(), vec!["Buena"]);
        assert!(announcer.messages().iter().any(|m| m.contains("Rota") && m.starts_with('❌')));
        assert_eq!(player.services.metrics.load_failures(), 1);

        player.skip().await.unwrap();
        player.on_track_end(TrackEndReason::Stopped).await.unwrap();
        assert_eq!(titles(&player.history_range(0, 10)), vec!["Buena"]);
    }

    #[tokio::test]
    async fn a_queue_the_node_rejects_entirely_goes_idle() {
        let (player, backend, _) = testing::player();
        backend.reject("A");
        backend.reject("B");
        player.set_repeat_mode(RepeatMode::All);
        player.pause().await.unwrap();
        player.queue(track("A", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("B", 1), PermissionLevel::User).await.unwrap();

        assert!(matches!(player.play().await, Err(PlayerError::Backend(_))));
        assert!(backend.played().is_empty());
        assert_eq!(player.playback_state(), PlaybackState::Idle);
        assert_eq!(player.services.metrics.load_failures(), 3);
        assert_eq!(player.history_len(), 0);
    }

    #[tokio::test]
    async fn members_only_skip_their_own_tracks() {
        let (player, backend, _) = testing::player();
        let mine = track("Mía", 1);
        let theirs = track("Suya", 2);
        let (mine_id, theirs_id) = (mine.id(), theirs.id());
        player.queue(track("Actual", 2), PermissionLevel::User).await.unwrap();
        player.queue(mine, PermissionLevel::User).await.unwrap();
        player.queue(theirs, PermissionLevel::User).await.unwrap();

        let current_id = player.playing_track().map(|t| t.id()).unwrap();
        assert!(matches!(
            player
                .skip_tracks_for_member(UserId::new(1), PermissionLevel::User, &[current_id])
                .await,
            Err(PlayerError::SkipDenied)
        ));

        let skipped = player
            .skip_tracks_for_member(UserId::new(1), PermissionLevel::User, &[mine_id])
            .await
            .unwrap();
        assert_eq!(skipped, 1);

        let skipped = player
            .skip_tracks_for_member(UserId::new(1), PermissionLevel::Dj, &[theirs_id, current_id])
            .await
            .unwrap();
        assert_eq!(skipped, 2);
        assert!(player.remaining_tracks().is_empty());
        assert_eq!(backend.commands().last(), Some(&BackendCommand::Stop));
    }

    #[tokio::test]
    async fn listing_puts_the_playing_track_first() {
        let (player, backend, _) = testing::player();
        for title in ["A", "B", "C", "D"] {
            player.queue(track(title, 1), PermissionLevel::User).await.unwrap();
        }
        backend.set_position(60_000);

        assert_eq!(titles(&player.tracks_in_range(0, 3)), vec!["A", "B", "C"]);
        assert_eq!(titles(&player.tracks_in_range(2, 10)), vec!["C", "D"]);
        assert_eq!(player.total_remaining_millis(), 120_000 + 3 * 180_000);

        let info = player.player_info();
        assert!(info.playing);
        assert_eq!(info.position_millis, Some(60_000));
        assert_eq!(info.queue.len(), 4);
    }

    #[tokio::test]
    async fn status_updates_are_broadcast() {
        let (player, _, _) = testing::player();
        let mut updates = player.services.status.subscribe();

        player.queue(track("Uno", 1), PermissionLevel::User).await.unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update.guild_id, guild());
        assert!(update.info.playing);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let mut link = MockPlaybackBackend::new();
        link.expect_state().times(1).returning(|| LinkState::Connected);
        link.expect_stop().times(1).returning(|| Ok(()));
        link.expect_destroy().times(1).returning(|| Ok(()));

        let (services, _) = testing::services_with(GuildLimits::default());
        let player = GuildPlayer::new(guild(), Arc::new(link), services, 1.0);

        player.destroy().await;
        player.destroy().await;

        assert_eq!(player.playback_state(), PlaybackState::Destroyed);
        assert!(matches!(
            player.queue(track("Tarde", 1), PermissionLevel::User).await,
            Err(PlayerError::Destroyed)
        ));
    }

    #[tokio::test]
    async fn snapshots_resume_where_they_left_off() {
        let (player, backend, _) = testing::player();
        backend.connect(ChannelId::new(9)).await.unwrap();
        for title in ["A", "B", "C"] {
            player.queue(track(title, 1), PermissionLevel::User).await.unwrap();
        }
        player.set_shuffle(true);
        player.set_repeat_mode(RepeatMode::All);
        backend.set_position(42_000);

        let snapshot = player.to_snapshot();
        assert_eq!(snapshot.position_millis, Some(42_000));
        assert_eq!(snapshot.channel_ref, Some(ChannelId::new(9)));
        assert_eq!(snapshot.tracks.len(), 3);
        assert_eq!(snapshot.tracks[0].title, "A");

        let (restored, new_backend, announcer) = testing::player();
        assert_eq!(restored.restore(snapshot, true).await, 3);

        assert_eq!(
            new_backend.commands()[0],
            BackendCommand::Connect(ChannelId::new(9))
        );
        assert!(new_backend.commands().contains(&BackendCommand::Play(
            "A".to_string(),
            PlayOptions {
                start_millis: 42_000,
                end_millis: None
            }
        )));
        assert!(announcer.messages().is_empty());
        assert!(restored.is_shuffle());
        assert_eq!(restored.repeat_mode(), RepeatMode::All);
    }

    #[tokio::test]
    async fn repeat_all_snapshots_do_not_duplicate_the_playing_track() {
        let (player, _, _) = testing::player();
        player.set_repeat_mode(RepeatMode::All);
        player.queue(track("A", 1), PermissionLevel::User).await.unwrap();
        player.queue(track("B", 1), PermissionLevel::User).await.unwrap();

        let snapshot = player.to_snapshot();
        let saved: Vec<&str> = snapshot.tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(saved, vec!["A", "B"]);

        let (restored, backend, _) = testing::player();
        assert_eq!(restored.restore(snapshot.clone(), true).await, 2);
        assert_eq!(backend.played(), vec!["A"]);
        assert_eq!(restored.track_count(), player.track_count());
        assert_eq!(restored.to_snapshot().tracks, snapshot.tracks);
    }

    #[tokio::test]
    async fn paused_snapshots_stay_paused() {
        let (player, _, _) = testing::player();
        player.queue(track("A", 1), PermissionLevel::User).await.unwrap();
        player.pause().await.unwrap();
        let snapshot = player.to_snapshot();

        let (restored, backend, _) = testing::player();
        restored.restore(snapshot, false).await;

        assert!(backend.played().is_empty());
        assert!(restored.is_paused());
        assert_eq!(restored.track_count(), 1);
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, BackendCommand::Volume(_))));
    }
}
