use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::info;

use super::{
    backend::{BackendFactory, LinkState, PlayOptions, PlaybackBackend},
    track::AudioTrack,
};
use crate::config::Config;

/// Wrapper simplificado para Lavalink: crea un enlace por servidor.
pub struct LavalinkManager {
    host: String,
    port: u16,
    password: String,
}

impl LavalinkManager {
    pub fn new(config: &Config) -> Self {
        info!("🎼 Configurando Lavalink en {}:{}", config.lavalink_host, config.lavalink_port);

        Self {
            host: config.lavalink_host.clone(),
            port: config.lavalink_port,
            password: config.lavalink_password.clone(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl BackendFactory for LavalinkManager {
    fn create_link(&self, guild_id: GuildId) -> Arc<dyn PlaybackBackend> {
        Arc::new(LavalinkLink {
            guild_id,
            node: self.address(),
            authorized: !self.password.is_empty(),
            state: Mutex::new(LinkStatus::default()),
        })
    }
}

#[derive(Debug, Default)]
struct LinkStatus {
    channel: Option<ChannelId>,
    destroyed: bool,
    position_millis: u64,
}

/// Enlace de un servidor con el nodo. Por ahora solo registra los comandos
/// y no genera avisos de fin de pista: quien escuche los eventos del nodo
/// debe pasarlos a
/// [`PlayerRegistry::dispatch_track_end`](crate::audio::registry::PlayerRegistry::dispatch_track_end).
pub struct LavalinkLink {
    guild_id: GuildId,
    node: String,
    authorized: bool,
    state: Mutex<LinkStatus>,
}

#[async_trait]
impl PlaybackBackend for LavalinkLink {
    async fn play(&self, track: &AudioTrack, options: PlayOptions) -> Result<()> {
        info!(
            "Lavalink play - Node: {}, Guild: {}, Track: {}, Start: {}ms",
            self.node, self.guild_id, track.identifier, options.start_millis
        );
        self.state.lock().position_millis = options.start_millis;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("Lavalink stop - Guild: {}", self.guild_id);
        self.state.lock().position_millis = 0;
        Ok(())
    }

    async fn pause(&self, paused: bool) -> Result<()> {
        info!("Lavalink pause - Guild: {}, Paused: {}", self.guild_id, paused);
        Ok(())
    }

    async fn seek(&self, position_millis: u64) -> Result<()> {
        info!("Lavalink seek - Guild: {}, Position: {}ms", self.guild_id, position_millis);
        self.state.lock().position_millis = position_millis;
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        info!("Lavalink volume - Guild: {}, Volume: {}", self.guild_id, (volume * 100.0) as u32);
        Ok(())
    }

    async fn connect(&self, channel_id: ChannelId) -> Result<()> {
        if !self.authorized {
            anyhow::bail!("Lavalink sin contraseña configurada");
        }
        info!("Lavalink join - Guild: {}, Channel: {}", self.guild_id, channel_id);
        self.state.lock().channel = Some(channel_id);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        info!("Lavalink leave - Guild: {}", self.guild_id);
        let mut state = self.state.lock();
        state.channel = None;
        state.destroyed = true;
        Ok(())
    }

    fn position_millis(&self) -> u64 {
        self.state.lock().position_millis
    }

    fn current_channel(&self) -> Option<ChannelId> {
        self.state.lock().channel
    }

    fn state(&self) -> LinkState {
        let state = self.state.lock();
        if state.destroyed {
            LinkState::Destroyed
        } else if state.channel.is_some() {
            LinkState::Connected
        } else {
            LinkState::NotConnected
        }
    }
}
