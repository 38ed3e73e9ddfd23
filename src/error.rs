//! Errores que el engine devuelve a quien invoca un comando.
//!
//! Los colaboradores externos (nodo de audio, persistencia, límites) usan
//! `anyhow::Result`; aquí solo viven los errores que el usuario puede ver.

use thiserror::Error;

use crate::audio::limiter::QueueLimitCode;

/// Errores de un [`GuildPlayer`](crate::audio::player::GuildPlayer).
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    SeekDenied(#[from] SeekDeniedError),

    #[error("Volumen inválido: {0} (debe estar entre 0 y 150%)")]
    InvalidVolume(f32),

    #[error("No puedes saltar pistas que no agregaste")]
    SkipDenied,

    #[error("{message}")]
    QueueRejected { code: QueueLimitCode, message: String },

    #[error("El player de este servidor ya fue destruido")]
    Destroyed,

    #[error("Error del nodo de audio: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// Motivos por los que un seek no se permite.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeekDeniedError {
    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("No se puede adelantar una transmisión en vivo")]
    LiveStream,

    #[error("Esta pista no permite seek")]
    NotSeekable,

    #[error("Posición {position}ms fuera de la pista ({duration}ms)")]
    OutOfRange { position: u64, duration: u64 },
}

/// Fallo al reconstruir una pista serializada.
#[derive(Debug, Error)]
pub enum TrackDecodeError {
    #[error("blob base64 inválido: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("blob JSON inválido: {0}")]
    Json(#[from] serde_json::Error),
}
