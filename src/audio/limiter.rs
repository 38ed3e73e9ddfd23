use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::sync::Arc;
use tracing::debug;

use super::track::TrackContext;
use crate::monitoring::Metrics;

/// Nivel de permisos de quien hace el pedido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionLevel {
    Base,
    User,
    Dj,
    Admin,
    BotAdmin,
}

impl PermissionLevel {
    /// DJ o superior: sin límites de cola
    pub fn is_elevated(self) -> bool {
        self >= PermissionLevel::Dj
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueLimitCode {
    Success,
    PlaylistDisabled,
    UserTrackLimitExceeded,
    TrackLimitExceeded,
    TrackLengthExceeded,
}

/// Límites configurados para un servidor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildLimits {
    pub playlist_allowed: bool,
    pub user_max_tracks: Option<usize>,
    pub max_tracks: Option<usize>,
    pub max_track_length_millis: Option<u64>,
}

impl Default for GuildLimits {
    fn default() -> Self {
        Self {
            playlist_allowed: true,
            user_max_tracks: None,
            max_tracks: None,
            max_track_length_millis: None,
        }
    }
}

/// Fuente de los límites de cada servidor
#[async_trait]
pub trait GuildLimitsSource: Send + Sync {
    async fn fetch_guild_limits(&self, guild_id: GuildId) -> Result<GuildLimits>;
}

/// Conteos de la cola que consultan los límites.
pub trait TrackCounter {
    /// Pistas en cola más la que suena
    fn track_count(&self) -> usize;

    fn user_track_count(&self, user_id: UserId) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLimitStatus {
    pub allowed: bool,
    pub code: QueueLimitCode,
    pub message: String,
}

impl QueueLimitStatus {
    fn success() -> Self {
        Self {
            allowed: true,
            code: QueueLimitCode::Success,
            message: "Successful".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueLimit {
    NoPlaylist,
    UserTrackLimit,
    TrackLimit,
    TrackLength,
}

impl QueueLimit {
    const CHAIN: [QueueLimit; 4] = [
        QueueLimit::NoPlaylist,
        QueueLimit::UserTrackLimit,
        QueueLimit::TrackLimit,
        QueueLimit::TrackLength,
    ];

    fn name(self) -> &'static str {
        match self {
            QueueLimit::NoPlaylist => "NoPlaylist",
            QueueLimit::UserTrackLimit => "UserTrackLimit",
            QueueLimit::TrackLimit => "TrackLimit",
            QueueLimit::TrackLength => "TrackLength",
        }
    }

    fn code(self) -> QueueLimitCode {
        match self {
            QueueLimit::NoPlaylist => QueueLimitCode::PlaylistDisabled,
            QueueLimit::UserTrackLimit => QueueLimitCode::UserTrackLimitExceeded,
            QueueLimit::TrackLimit => QueueLimitCode::TrackLimitExceeded,
            QueueLimit::TrackLength => QueueLimitCode::TrackLengthExceeded,
        }
    }

    fn allows(self, track: &TrackContext, counts: &dyn TrackCounter, extra_pending: usize, limits: &GuildLimits) -> bool {
        match self {
            QueueLimit::NoPlaylist => !track.is_from_playlist() || limits.playlist_allowed,
            QueueLimit::UserTrackLimit => limits
                .user_max_tracks
                .map_or(true, |max| max > counts.user_track_count(track.requester()) + extra_pending),
            QueueLimit::TrackLimit => limits
                .max_tracks
                .map_or(true, |max| max > counts.track_count() + extra_pending),
            // Una transmisión en vivo no tiene fin: nunca cabe en un máximo
            QueueLimit::TrackLength => match (limits.max_track_length_millis, track.effective_duration()) {
                (None, _) => true,
                (Some(max), Some(duration)) => max > duration,
                (Some(_), None) => false,
            },
        }
    }

    fn message(self, limits: &GuildLimits) -> String {
        let limit = |value: Option<String>| value.unwrap_or_else(|| "ILIMITADO".to_string());
        match self {
            QueueLimit::NoPlaylist => "Las playlists están deshabilitadas en este servidor".to_string(),
            QueueLimit::UserTrackLimit => format!(
                "No puedes tener más de {} canciones en la cola",
                limit(limits.user_max_tracks.map(|n| n.to_string()))
            ),
            QueueLimit::TrackLimit => format!(
                "La cola está llena (máximo {} canciones)",
                limit(limits.max_tracks.map(|n| n.to_string()))
            ),
            QueueLimit::TrackLength => format!(
                "La canción supera la duración máxima ({})",
                limit(
                    limits
                        .max_track_length_millis
                        .map(|ms| humantime::format_duration(std::time::Duration::from_secs(ms / 1000)).to_string())
                )
            ),
        }
    }
}

/// Cadena ordenada de límites que decide si una pista puede entrar a la cola.
pub struct QueueLimiter {
    source: Arc<dyn GuildLimitsSource>,
    metrics: Arc<Metrics>,
}

impl QueueLimiter {
    pub fn new(source: Arc<dyn GuildLimitsSource>, metrics: Arc<Metrics>) -> Self {
        Self { source, metrics }
    }

    /// Evalúa los límites en orden; el primero que falla corta la cadena.
    ///
    /// `extra_pending` son pistas ya aceptadas en el mismo lote que todavía
    /// no están en la cola.
    pub async fn is_queue_allowed(
        &self,
        guild_id: GuildId,
        track: &TrackContext,
        level: PermissionLevel,
        counts: &(dyn TrackCounter + Sync),
        extra_pending: usize,
    ) -> Result<QueueLimitStatus> {
        if level.is_elevated() {
            return Ok(QueueLimitStatus::success());
        }

        let limits = self.source.fetch_guild_limits(guild_id).await?;
        Ok(self.evaluate(track, counts, extra_pending, &limits))
    }

    /// Evalúa un lote (playlist): la pista `i` cuenta las `i` anteriores
    pub async fn check_all(
        &self,
        guild_id: GuildId,
        tracks: &[TrackContext],
        level: PermissionLevel,
        counts: &(dyn TrackCounter + Sync),
    ) -> Result<Vec<QueueLimitStatus>> {
        if level.is_elevated() {
            return Ok(vec![QueueLimitStatus::success(); tracks.len()]);
        }

        let limits = self.source.fetch_guild_limits(guild_id).await?;
        Ok(tracks
            .iter()
            .enumerate()
            .map(|(i, track)| self.evaluate(track, counts, i, &limits))
            .collect())
    }

    fn evaluate(
        &self,
        track: &TrackContext,
        counts: &dyn TrackCounter,
        extra_pending: usize,
        limits: &GuildLimits,
    ) -> QueueLimitStatus {
        for limit in QueueLimit::CHAIN {
            if !limit.allows(track, counts, extra_pending, limits) {
                self.metrics.queue_prevented(limit.name());
                debug!("🚫 {} rechazada por {}", track.effective_title(), limit.name());
                return QueueLimitStatus {
                    allowed: false,
                    code: limit.code(),
                    message: limit.message(limits),
                };
            }
        }

        QueueLimitStatus::success()
    }
}
