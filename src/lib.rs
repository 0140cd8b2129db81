//! Queuebird: per-guild music playback orchestration for Discord.
//!
//! The [`audio`] core (queue, sessions, connection lifecycle, playback
//! driver, admission control) has no Discord dependency beyond id types;
//! [`bot`] plugs it into serenity and songbird.

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod ui;
