//! # Bot Module
//!
//! Discord-facing pieces of the engine.
//!
//! Command parsing and the gateway connection live outside this crate; what
//! remains here is the announce sink players use to post "now playing" and
//! load-failure messages to each guild's text channel.

pub mod announce;
