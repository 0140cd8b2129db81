//! # Sources Module
//!
//! Media resolution for queued references. A [`MediaResolver`] turns a
//! [`TrackRef`] into a playable [`ResolvedItem`] (stream URL + title) and
//! expands playlist URLs into ordered references.
//!
//! Resolution is lazy: nothing is resolved at enqueue time, and results are
//! never cached, so playing the same reference twice resolves it twice.

pub mod error;
pub mod youtube_api;
pub mod ytdlp;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub use error::{ItemFailure, ResolveError};
pub use youtube_api::YouTubeApiClient;
pub use ytdlp::YtDlpClient;

use crate::audio::queue::TrackRef;

/// Resultado de resolver una referencia
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub title: String,
    pub stream_url: String,
    pub page_url: Option<String>,
    pub duration: Option<Duration>,
}

impl ResolvedItem {
    pub fn new(title: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            stream_url: stream_url.into(),
            page_url: None,
            duration: None,
        }
    }
}

/// Playlist expandida en orden
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistInfo {
    pub title: String,
    pub items: Vec<TrackRef>,
}

/// Resolver de medios. Lento y falible (red).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resuelve una URL o búsqueda a un stream reproducible
    async fn resolve_single(&self, reference: &TrackRef) -> Result<ResolvedItem, ResolveError>;

    /// Expande una playlist; `None` si la URL no es una playlist
    async fn resolve_playlist(&self, url: &str) -> Result<Option<PlaylistInfo>, ResolveError>;
}

/// Resolver de producción: yt-dlp para elementos, YouTube API para playlists
/// (con yt-dlp como respaldo si no hay API key o la API falla).
pub struct SourceResolver {
    ytdlp: YtDlpClient,
    youtube_api: Option<YouTubeApiClient>,
    max_playlist_size: usize,
}

impl SourceResolver {
    pub fn new(
        ytdlp: YtDlpClient,
        youtube_api: Option<YouTubeApiClient>,
        max_playlist_size: usize,
    ) -> Self {
        Self {
            ytdlp,
            youtube_api,
            max_playlist_size,
        }
    }
}

#[async_trait]
impl MediaResolver for SourceResolver {
    async fn resolve_single(&self, reference: &TrackRef) -> Result<ResolvedItem, ResolveError> {
        self.ytdlp.resolve(reference).await
    }

    async fn resolve_playlist(&self, url: &str) -> Result<Option<PlaylistInfo>, ResolveError> {
        let Some(playlist_id) = YouTubeApiClient::extract_playlist_id(url) else {
            return Ok(None);
        };

        if let Some(api) = &self.youtube_api {
            match api.playlist(&playlist_id, self.max_playlist_size).await {
                Ok(Some(mut playlist)) => {
                    playlist.items.truncate(self.max_playlist_size);
                    return Ok(Some(playlist));
                }
                // Mixes (RD...) no existen en la API; yt-dlp sí los expande
                Ok(None) => debug!("📋 La API no conoce la playlist {}", playlist_id),
                Err(e) => warn!("⚠️ YouTube API falló, usando yt-dlp: {}", e),
            }
        }

        let playlist = self.ytdlp.flat_playlist(url, self.max_playlist_size).await?;
        Ok(playlist.map(|mut playlist| {
            playlist.items.truncate(self.max_playlist_size);
            playlist
        }))
    }
}
