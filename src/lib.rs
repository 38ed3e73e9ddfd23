//! Open Music Engine: per-guild queue ordering and playback orchestration.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod storage;
