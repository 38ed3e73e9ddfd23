use dashmap::DashMap;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::audio::track::TrackContext;

/// Destino de los anuncios de un servidor. Enviar nunca bloquea ni falla:
/// si el mensaje no llega, la reproducción sigue igual.
pub trait Announcer: Send + Sync {
    fn send(&self, guild_id: GuildId, message: String);
}

/// Anuncia en el canal de texto registrado para cada servidor.
pub struct DiscordAnnouncer {
    http: Arc<Http>,
    channels: DashMap<GuildId, ChannelId>,
}

impl DiscordAnnouncer {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            channels: DashMap::new(),
        }
    }

    /// Registra el canal de texto donde se anuncia en `guild_id`
    pub fn set_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.channels.insert(guild_id, channel_id);
    }

    pub fn channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.channels.get(&guild_id).map(|c| *c)
    }
}

impl Announcer for DiscordAnnouncer {
    fn send(&self, guild_id: GuildId, message: String) {
        let Some(channel_id) = self.channel(guild_id) else {
            debug!("Sin canal de anuncios en guild {}", guild_id);
            return;
        };

        let http = self.http.clone();
        tokio::spawn(async move {
            if let Err(e) = channel_id.say(&http, message).await {
                warn!("⚠️ No se pudo anunciar en {}: {:?}", channel_id, e);
            }
        });
    }
}

/// Mensaje al empezar una pista
pub fn now_playing(track: &TrackContext) -> String {
    match track.effective_duration() {
        Some(millis) => format!(
            "🎵 Reproduciendo **{}** [{}] (pedido por <@{}>)",
            track.effective_title(),
            format_millis(millis),
            track.requester()
        ),
        None => format!(
            "🔴 Reproduciendo en vivo **{}** (pedido por <@{}>)",
            track.effective_title(),
            track.requester()
        ),
    }
}

/// Mensaje cuando una pista no se pudo cargar
pub fn load_failed(track: Option<&TrackContext>) -> String {
    match track {
        Some(track) => format!("❌ No se pudo reproducir **{}**, pasando a la siguiente", track.effective_title()),
        None => "❌ No se pudo reproducir la pista, pasando a la siguiente".to_string(),
    }
}

fn format_millis(millis: u64) -> String {
    humantime::format_duration(Duration::from_secs(millis / 1000)).to_string()
}
