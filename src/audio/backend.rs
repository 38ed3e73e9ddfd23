use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;

use super::track::AudioTrack;

/// Motivo con el que el nodo de audio reporta el fin de una pista.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    Stopped,
    Cleanup,
    LoadFailed,
    Replaced,
}

/// Estado del enlace de voz de un servidor con el nodo de audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    NotConnected,
    Connected,
    Destroyed,
}

/// Dónde empieza y dónde termina la reproducción de una pista.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayOptions {
    pub start_millis: u64,
    pub end_millis: Option<u64>,
}

/// Enlace de un servidor con el nodo de audio externo.
///
/// El nodo avisa del fin de cada pista llamando a
/// [`GuildPlayer::on_track_end`](crate::audio::player::GuildPlayer::on_track_end).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    async fn play(&self, track: &AudioTrack, options: PlayOptions) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn pause(&self, paused: bool) -> Result<()>;

    async fn seek(&self, position_millis: u64) -> Result<()>;

    async fn set_volume(&self, volume: f32) -> Result<()>;

    async fn connect(&self, channel_id: ChannelId) -> Result<()>;

    /// Libera el enlace; después de esto el estado es `Destroyed`
    async fn destroy(&self) -> Result<()>;

    fn position_millis(&self) -> u64;

    fn current_channel(&self) -> Option<ChannelId>;

    fn state(&self) -> LinkState;
}

/// Crea el enlace de cada servidor nuevo
pub trait BackendFactory: Send + Sync {
    fn create_link(&self, guild_id: GuildId) -> Arc<dyn PlaybackBackend>;
}
