//! # Audio Module
//!
//! Per-guild playback orchestration for Open Music.
//!
//! This module owns everything between "a user asked to queue a track" and
//! "the audio node was told to play it":
//! - Queue ordering with priority, shuffle, round-robin and repeat modes
//! - Admission limits checked before a track enters the queue
//! - The per-guild player state machine driven by audio node callbacks
//! - A registry that builds at most one player per guild and persists them
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - One canonical deque per guild
//! - Shuffle and round-robin views derived lazily from it (see [`ordering`])
//! - Repeat SINGLE / ALL handled at `take` time
//!
//! ### [`limiter`] - Admission Limits
//! - Ordered chain: playlists, per-user tracks, total tracks, track length
//! - DJ tier and above bypass every limit
//!
//! ### [`player`] - Guild Player
//! - Current track, bounded history, pause and volume
//! - Reacts to [`backend::TrackEndReason`] events from the audio node
//!
//! ### [`registry`] - Player Registry
//! - Single-flight construction with snapshot restore
//! - Bounded shutdown save of every player
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_engine::audio::{limiter::PermissionLevel, registry::PlayerRegistry, track::{AudioTrack, TrackContext}};
//! use serenity::model::id::{GuildId, UserId};
//!
//! # async fn example(registry: PlayerRegistry) -> anyhow::Result<()> {
//! let player = registry.get_or_create(GuildId::new(123456789)).await?;
//! let track = TrackContext::new(AudioTrack::new("dQw4w9WgXcQ", "Never Gonna Give You Up", 213_000), UserId::new(1));
//!
//! player.queue(track, PermissionLevel::User).await?;
//! player.pause().await?;
//! player.play().await?;
//! player.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod lavalink_simple;
pub mod limiter;
pub mod ordering;
pub mod player;
pub mod queue;
pub mod registry;
pub mod snapshot;
pub mod status;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;
