//! Proyección de solo lectura de un player para observadores externos.

use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;

use super::{player::GuildPlayer, queue::RepeatMode, track::TrackContext};

/// Pistas de la cola que se incluyen en cada [`PlayerInfo`]
pub const STATUS_QUEUE_PREVIEW: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    pub name: String,
    /// `None` para transmisiones en vivo
    pub duration: Option<u64>,
}

impl From<&TrackContext> for TrackInfo {
    fn from(track: &TrackContext) -> Self {
        Self {
            id: track.id().to_string(),
            name: track.effective_title().to_string(),
            duration: track.effective_duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub playing: bool,
    pub paused: bool,
    pub shuffled: bool,
    pub repeat_mode: RepeatMode,
    pub position_millis: Option<u64>,
    /// La pista actual (si hay) seguida de las próximas
    pub queue: Vec<TrackInfo>,
}

impl PlayerInfo {
    /// Estado de un servidor sin player
    pub fn empty() -> Self {
        Self {
            playing: false,
            paused: false,
            shuffled: false,
            repeat_mode: RepeatMode::Off,
            position_millis: None,
            queue: Vec::new(),
        }
    }
}

/// Mensaje del canal de estado en vivo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerUpdate {
    pub guild_id: GuildId,
    pub info: PlayerInfo,
}

/// Se calcula cada vez; no se guarda en caché
pub fn to_player_info(player: &GuildPlayer) -> PlayerInfo {
    let tracks = player.tracks_in_range(0, STATUS_QUEUE_PREVIEW);
    let playing = player.is_playing();

    PlayerInfo {
        playing,
        paused: player.is_paused(),
        shuffled: player.is_shuffle(),
        repeat_mode: player.repeat_mode(),
        position_millis: playing.then(|| player.position_millis()),
        queue: tracks.iter().map(TrackInfo::from).collect(),
    }
}
