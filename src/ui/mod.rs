//! Discord embeds for command replies and player announcements.

pub mod embeds;
