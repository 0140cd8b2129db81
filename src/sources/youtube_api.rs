use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{error::ResolveError, PlaylistInfo};
use crate::audio::queue::TrackRef;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Deserialize)]
#[serde(bound = "T: Deserialize<'de>")]
struct ListResponse<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    video_id: String,
}

/// Cliente de la YouTube Data API v3 para expandir playlists
pub struct YouTubeApiClient {
    api_key: String,
    client: reqwest::Client,
}

impl YouTubeApiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { api_key, client })
    }

    /// Extrae el ID de playlist del parámetro `list=`
    pub fn extract_playlist_id(url: &str) -> Option<String> {
        let regex = Regex::new(r"list=([a-zA-Z0-9_-]+)").ok()?;
        regex
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Título y primeros `limit` videos de una playlist
    pub async fn playlist(
        &self,
        playlist_id: &str,
        limit: usize,
    ) -> Result<Option<PlaylistInfo>, ResolveError> {
        debug!("📋 Consultando playlist {} en YouTube API", playlist_id);

        let playlists: ListResponse<Playlist> = self
            .get("playlists", &[("part", "snippet"), ("id", playlist_id)])
            .await?;

        let Some(playlist) = playlists.items.into_iter().next() else {
            return Ok(None);
        };

        // La API limita maxResults a 50
        let max_results = limit.clamp(1, 50).to_string();
        let items: ListResponse<PlaylistItem> = self
            .get(
                "playlistItems",
                &[
                    ("part", "contentDetails"),
                    ("playlistId", playlist_id),
                    ("maxResults", &max_results),
                ],
            )
            .await?;

        let items: Vec<TrackRef> = items
            .items
            .into_iter()
            .map(|item| {
                TrackRef::Url(format!(
                    "https://www.youtube.com/watch?v={}",
                    item.content_details.video_id
                ))
            })
            .collect();

        if items.is_empty() {
            return Ok(None);
        }

        info!(
            "✅ YouTube API: playlist '{}' con {} videos",
            playlist.snippet.title,
            items.len()
        );

        Ok(Some(PlaylistInfo {
            title: playlist.snippet.title,
            items,
        }))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ResolveError> {
        let response = self
            .client
            .get(format!("{}/{}", API_BASE, endpoint))
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ResolveError::Backend(format!("YouTube API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("❌ YouTube API error: {} - {}", status, error_text);
            return Err(ResolveError::Backend(format!(
                "YouTube API error: {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ResolveError::Backend(format!("YouTube API: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_playlist_id_extraction() {
        assert_eq!(
            YouTubeApiClient::extract_playlist_id(
                "https://www.youtube.com/playlist?list=PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG"
            ),
            Some("PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG".to_string())
        );
        assert_eq!(
            YouTubeApiClient::extract_playlist_id(
                "https://www.youtube.com/watch?v=abc&list=RDabc&index=2"
            ),
            Some("RDabc".to_string())
        );
        assert_eq!(
            YouTubeApiClient::extract_playlist_id("https://www.youtube.com/watch?v=abc"),
            None
        );
    }

    #[test]
    fn test_playlist_items_deserialize() {
        let json = r#"{"items":[{"contentDetails":{"videoId":"v1"}},{"contentDetails":{"videoId":"v2"}}]}"#;
        let parsed: ListResponse<PlaylistItem> = serde_json::from_str(json).unwrap();
        let ids: Vec<_> = parsed
            .items
            .iter()
            .map(|i| i.content_details.video_id.as_str())
            .collect();
        assert_eq!(ids, vec!["v1", "v2"]);

        let empty: ListResponse<Playlist> = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }
}
