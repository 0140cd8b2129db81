//! # Audio Module
//!
//! Per-guild playback orchestration.
//!
//! ## Architecture
//!
//! ### [`queue`] - Session Queue
//! - FIFO of unresolved references, with prepend for "play next"
//! - Pure in-memory operations, no I/O
//!
//! ### [`session`] - Session Registry
//! - One [`session::Session`] per guild behind its own lock
//! - Created on demand, dropped when the bot leaves the guild
//!
//! ### [`connection`] - Connection Lifecycle
//! - At most one voice connection per guild, in the requester's channel
//! - Connect timeout and exponential-backoff reconnect ([`backoff`])
//!
//! ### [`driver`] - Playback Driver
//! - One background drain task per guild: pop, resolve, connect, stream
//! - Skips broken items, resumes the interrupted item after a reconnect
//!
//! ### [`admission`] - Admission Control
//! - Global bound on in-flight resolve/connect work across all guilds
//!
//! The media layer and the voice gateway are reached through traits
//! ([`crate::sources::MediaResolver`], [`voice::VoiceGateway`]) so the whole
//! core runs against in-memory fakes in tests.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use queuebird::audio::{player::{AudioPlayer, Requester}, queue::TrackRef};
//! use serenity::model::id::GuildId;
//! use std::sync::Arc;
//!
//! # async fn example(player: Arc<AudioPlayer>, requester: Requester) -> anyhow::Result<()> {
//! let guild_id = GuildId::new(123456789);
//!
//! player
//!     .enqueue(guild_id, requester, TrackRef::parse("lofi hip hop"), false)
//!     .await?;
//! player.advance(guild_id).await;
//!
//! player.skip(guild_id, 1).await?;
//! player.stop(guild_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod backoff;
pub mod connection;
pub mod driver;
pub mod events;
pub mod player;
pub mod queue;
pub mod session;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;
