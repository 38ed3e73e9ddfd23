use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::error::TrackDecodeError;

/// Clave de orden de las pistas prioritarias: siempre van primero.
pub const PRIORITY_SORT_KEY: i32 = 0;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifica una pista en cola aunque se clone o se vuelva a mezclar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(u64);

impl TrackId {
    pub fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Pista tal como la resuelve el nodo de audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub identifier: String,
    pub title: String,
    pub author: Option<String>,
    pub uri: Option<String>,
    /// Duración en milisegundos; 0 para transmisiones en vivo
    pub length_millis: u64,
    pub is_stream: bool,
    pub is_seekable: bool,
}

impl AudioTrack {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, length_millis: u64) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            author: None,
            uri: None,
            length_millis,
            is_stream: false,
            is_seekable: true,
        }
    }

    pub fn live(identifier: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            author: None,
            uri: None,
            length_millis: 0,
            is_stream: true,
            is_seekable: false,
        }
    }

    /// Serializa la pista como blob base64 para los snapshots
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    /// Reconstruye una pista desde su blob
    pub fn decode(blob: &str) -> Result<Self, TrackDecodeError> {
        let bytes = STANDARD.decode(blob.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Fragmento de una pista más larga (un capítulo, por ejemplo).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSplit {
    pub start_millis: u64,
    pub end_millis: u64,
    pub title: String,
}

/// Una pista en cola junto con quién la pidió y su clave de orden.
#[derive(Debug, Clone)]
pub struct TrackContext {
    track_id: TrackId,
    track: AudioTrack,
    requester: UserId,
    is_priority: bool,
    sort_key: i32,
    added_at: DateTime<Utc>,
    from_playlist: bool,
    split: Option<TrackSplit>,
    resume_at: Option<u64>,
}

impl TrackContext {
    pub fn new(track: AudioTrack, requester: UserId) -> Self {
        Self {
            track_id: TrackId::next(),
            track,
            requester,
            is_priority: false,
            sort_key: random_sort_key(),
            added_at: Utc::now(),
            from_playlist: false,
            split: None,
            resume_at: None,
        }
    }

    /// Pista que se salta el orden aleatorio y va al frente de la cola
    pub fn priority(track: AudioTrack, requester: UserId) -> Self {
        Self {
            is_priority: true,
            sort_key: PRIORITY_SORT_KEY,
            ..Self::new(track, requester)
        }
    }

    pub fn in_playlist(mut self) -> Self {
        self.from_playlist = true;
        self
    }

    pub fn with_split(mut self, split: TrackSplit) -> Self {
        self.split = Some(split);
        self
    }

    pub(crate) fn with_resume_at(mut self, position_millis: u64) -> Self {
        self.resume_at = Some(position_millis);
        self
    }

    pub fn id(&self) -> TrackId {
        self.track_id
    }

    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn is_priority(&self) -> bool {
        self.is_priority
    }

    pub fn sort_key(&self) -> i32 {
        self.sort_key
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    pub fn is_from_playlist(&self) -> bool {
        self.from_playlist
    }

    pub fn split(&self) -> Option<&TrackSplit> {
        self.split.as_ref()
    }

    pub fn is_stream(&self) -> bool {
        self.track.is_stream
    }

    pub fn effective_title(&self) -> &str {
        match &self.split {
            Some(split) => &split.title,
            None => &self.track.title,
        }
    }

    /// Duración efectiva; `None` para transmisiones en vivo
    pub fn effective_duration(&self) -> Option<u64> {
        if self.track.is_stream {
            return None;
        }
        Some(match &self.split {
            Some(split) => split.end_millis.saturating_sub(split.start_millis),
            None => self.track.length_millis,
        })
    }

    pub fn start_position(&self) -> u64 {
        self.split.as_ref().map_or(0, |split| split.start_millis)
    }

    pub fn end_position(&self) -> Option<u64> {
        self.split.as_ref().map(|split| split.end_millis)
    }

    /// Posición con la que debe arrancar la próxima reproducción
    pub(crate) fn take_start_position(&mut self) -> u64 {
        self.resume_at.take().unwrap_or_else(|| self.start_position())
    }

    pub(crate) fn clear_resume(&mut self) {
        self.resume_at = None;
    }

    /// Asigna una clave aleatoria nueva (las prioritarias no cambian)
    pub(crate) fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) -> i32 {
        if !self.is_priority {
            self.sort_key = rng.gen_range(1..=i32::MAX);
        }
        self.sort_key
    }

    /// Pierde la prioridad (se usa al recircular la cola en repeat ALL)
    pub(crate) fn demote(&mut self) {
        if self.is_priority {
            self.is_priority = false;
            self.sort_key = random_sort_key();
        }
    }
}

impl PartialEq for TrackContext {
    fn eq(&self, other: &Self) -> bool {
        self.track_id == other.track_id
    }
}

impl Eq for TrackContext {}

fn random_sort_key() -> i32 {
    rand::thread_rng().gen_range(1..=i32::MAX)
}
