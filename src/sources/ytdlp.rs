use async_process::Command;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{error::ResolveError, PlaylistInfo, ResolvedItem};
use crate::audio::queue::TrackRef;

/// Cliente para resolver elementos con el binario yt-dlp
pub struct YtDlpClient {
    binary: String,
}

/// Información extraída de yt-dlp (`--dump-json`)
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    formats: Option<Vec<Format>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: String,
    acodec: Option<String>,
}

/// Salida de `--flat-playlist --dump-single-json`
#[derive(Debug, Deserialize)]
struct YtDlpPlaylist {
    title: Option<String>,
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Resuelve una URL o una búsqueda (`ytsearch1:`) a un stream reproducible
    pub async fn resolve(&self, reference: &TrackRef) -> Result<ResolvedItem, ResolveError> {
        let target = match reference {
            TrackRef::Url(url) => url.clone(),
            TrackRef::Query(query) => format!("ytsearch1:{}", query),
        };

        debug!("📊 Obteniendo info de: {}", target);

        let output = Command::new(&self.binary)
            .args([
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--dump-json",
                "--no-warnings",
                &target,
            ])
            .output()
            .await
            .map_err(|e| ResolveError::Backend(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para {}: {}", target, stderr.trim());
            return Err(ResolveError::from_diagnostic(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let item = parse_single(&stdout, &target)?;
        info!("✅ Resuelto: {}", item.title);
        Ok(item)
    }

    /// Expande una playlist sin descargar cada video
    pub async fn flat_playlist(
        &self,
        url: &str,
        limit: usize,
    ) -> Result<Option<PlaylistInfo>, ResolveError> {
        debug!("📋 Expandiendo playlist con yt-dlp: {}", url);

        let limit = limit.to_string();
        let output = Command::new(&self.binary)
            .args([
                "--flat-playlist",
                "--dump-single-json",
                "--no-warnings",
                "--playlist-end",
                &limit,
                url,
            ])
            .output()
            .await
            .map_err(|e| ResolveError::Backend(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::from_diagnostic(stderr));
        }

        parse_playlist(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_single(stdout: &str, target: &str) -> Result<ResolvedItem, ResolveError> {
    // ytsearch imprime una línea JSON por resultado
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ResolveError::NotFound(target.to_string()))?;

    let info: YtDlpInfo = serde_json::from_str(line)
        .map_err(|e| ResolveError::Backend(format!("respuesta de yt-dlp inválida: {}", e)))?;

    let stream_url = info
        .url
        .clone()
        .or_else(|| {
            info.formats.as_ref().and_then(|formats| {
                formats
                    .iter()
                    .rev()
                    .find(|f| f.acodec.as_deref() != Some("none"))
                    .map(|f| f.url.clone())
            })
        })
        .ok_or_else(|| ResolveError::Item {
            kind: super::ItemFailure::ExtractionFailed,
            message: format!("Unable to extract stream url for {}", target),
        })?;

    Ok(ResolvedItem {
        title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
        stream_url,
        page_url: info.webpage_url.or_else(|| {
            info.id
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
        }),
        duration: info
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(Duration::from_secs_f64),
    })
}

fn parse_playlist(stdout: &str) -> Result<Option<PlaylistInfo>, ResolveError> {
    let playlist: YtDlpPlaylist = serde_json::from_str(stdout.trim())
        .map_err(|e| ResolveError::Backend(format!("respuesta de yt-dlp inválida: {}", e)))?;

    let items: Vec<TrackRef> = playlist
        .entries
        .into_iter()
        .filter_map(|entry| match (entry.url, entry.id) {
            (Some(url), _) if url.starts_with("http") => Some(url),
            (_, Some(id)) => Some(format!("https://www.youtube.com/watch?v={}", id)),
            _ => None,
        })
        .map(TrackRef::Url)
        .collect();

    if items.is_empty() {
        return Ok(None);
    }

    Ok(Some(PlaylistInfo {
        title: playlist.title.unwrap_or_else(|| "Playlist".to_string()),
        items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ItemFailure;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_single_prefers_selected_format() {
        let json = r#"{"id":"abc","title":"Song","url":"https://cdn/a.webm","webpage_url":"https://www.youtube.com/watch?v=abc","duration":212.0,"formats":[{"url":"https://cdn/low","acodec":"opus"}]}"#;
        let item = parse_single(json, "x").unwrap();
        assert_eq!(item.title, "Song");
        assert_eq!(item.stream_url, "https://cdn/a.webm");
        assert_eq!(item.duration, Some(Duration::from_secs(212)));
    }

    #[test]
    fn test_parse_single_falls_back_to_audio_format() {
        let json = r#"{"id":"abc","title":"Song","formats":[{"url":"https://cdn/audio","acodec":"opus"},{"url":"https://cdn/video","acodec":"none"}]}"#;
        let item = parse_single(json, "x").unwrap();
        assert_eq!(item.stream_url, "https://cdn/audio");
        assert_eq!(
            item.page_url.as_deref(),
            Some("https://www.youtube.com/watch?v=abc")
        );
    }

    #[test]
    fn test_parse_single_errors() {
        assert!(matches!(
            parse_single("\n", "ytsearch1:nada"),
            Err(ResolveError::NotFound(_))
        ));

        let err = parse_single(r#"{"title":"No formats"}"#, "x").unwrap_err();
        assert_eq!(err.failure(), ItemFailure::ExtractionFailed);
    }

    #[test]
    fn test_parse_flat_playlist() {
        let json = r#"{"title":"Mix","entries":[{"id":"a1","url":"https://www.youtube.com/watch?v=a1"},{"id":"b2","url":"b2"},{"title":"broken"}]}"#;
        let playlist = parse_playlist(json).unwrap().unwrap();
        assert_eq!(playlist.title, "Mix");
        assert_eq!(
            playlist.items,
            vec![
                TrackRef::Url("https://www.youtube.com/watch?v=a1".to_string()),
                TrackRef::Url("https://www.youtube.com/watch?v=b2".to_string()),
            ]
        );

        assert!(parse_playlist(r#"{"title":"Empty","entries":[]}"#)
            .unwrap()
            .is_none());
    }
}
