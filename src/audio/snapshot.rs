use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, UserId};

use super::{
    queue::RepeatMode,
    track::{AudioTrack, TrackContext, TrackSplit},
};
use crate::error::TrackDecodeError;

/// Estado guardado de un player para reanudarlo tras un reinicio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub paused: bool,
    pub shuffled: bool,
    pub repeat_mode: RepeatMode,
    /// 0.0 - 1.5
    pub volume: f32,
    /// Posición de la pista que sonaba (la primera de `tracks`)
    pub position_millis: Option<u64>,
    pub channel_ref: Option<ChannelId>,
    pub tracks: Vec<SavedTrack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedTrack {
    pub serialized_payload: String,
    pub requester_id: UserId,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub title: String,
}

impl SavedTrack {
    pub fn from_context(track: &TrackContext) -> Result<Self, serde_json::Error> {
        Ok(Self {
            serialized_payload: track.track().encode()?,
            requester_id: track.requester(),
            start_time: track.split().map(|split| split.start_millis),
            end_time: track.split().map(|split| split.end_millis),
            title: track.effective_title().to_string(),
        })
    }

    pub fn restore(&self) -> Result<TrackContext, TrackDecodeError> {
        let audio = AudioTrack::decode(&self.serialized_payload)?;
        let track = TrackContext::new(audio, self.requester_id);

        Ok(match (self.start_time, self.end_time) {
            (Some(start_millis), Some(end_millis)) => track.with_split(TrackSplit {
                start_millis,
                end_millis,
                title: self.title.clone(),
            }),
            _ => track,
        })
    }
}

/// Persistencia de snapshots por servidor
#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn load_snapshot(&self, guild_id: GuildId) -> Result<Option<PlayerSnapshot>>;

    async fn save_snapshot(&self, guild_id: GuildId, snapshot: &PlayerSnapshot) -> Result<()>;
}
