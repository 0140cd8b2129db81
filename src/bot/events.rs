use anyhow::Result;
use serenity::{builder::CreateEmbed, builder::CreateMessage, http::Http};
use std::sync::Arc;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{
    audio::{
        events::{PlayerEvent, PlayerEventKind},
        player::AudioPlayer,
    },
    ui::embeds,
};

/// Publica en el canal de texto de cada guild los eventos del reproductor.
pub fn spawn_announcer(http: Arc<Http>, player: &AudioPlayer) -> JoinHandle<()> {
    let mut events = player.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = announce(&http, event).await {
                        error!("Error al enviar anuncio: {:?}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("📣 Se perdieron {} anuncios", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("📣 Anunciador terminado");
    })
}

async fn announce(http: &Arc<Http>, event: PlayerEvent) -> Result<()> {
    let Some(channel_id) = event.text_channel else {
        return Ok(());
    };
    let Some(embed) = embed_for(&event.kind) else {
        return Ok(());
    };

    channel_id
        .send_message(http, CreateMessage::new().embed(embed))
        .await?;

    Ok(())
}

/// `None` para eventos que ya respondió el comando que los causó.
fn embed_for(kind: &PlayerEventKind) -> Option<CreateEmbed> {
    let embed = match kind {
        PlayerEventKind::TrackStarted {
            title,
            page_url,
            duration,
            requested_by,
            resumed,
        } => embeds::create_track_started_embed(
            title,
            page_url.as_deref(),
            *duration,
            *requested_by,
            *resumed,
        ),
        PlayerEventKind::ItemSkipped {
            reference, failure, ..
        } => embeds::create_item_failed_embed(reference, *failure),
        PlayerEventKind::QueueFinished => embeds::create_queue_finished_embed(),
        PlayerEventKind::Reconnecting { attempt } => embeds::create_reconnecting_embed(*attempt),
        PlayerEventKind::Reconnected => embeds::create_reconnected_embed(),
        PlayerEventKind::ReconnectFailed { attempts } => {
            embeds::create_reconnect_failed_embed(*attempts)
        }
        PlayerEventKind::Stopped => return None,
    };

    Some(embed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::queue::TrackRef, sources::ItemFailure};

    #[test]
    fn test_stop_is_not_announced() {
        assert!(embed_for(&PlayerEventKind::Stopped).is_none());
    }

    #[test]
    fn test_skipped_item_is_announced() {
        let kind = PlayerEventKind::ItemSkipped {
            reference: TrackRef::Url("https://youtu.be/x".into()),
            failure: ItemFailure::AgeRestricted,
            reason: "Sign in to confirm your age".into(),
        };
        let json = serde_json::to_value(embed_for(&kind).unwrap()).unwrap();
        assert!(json["fields"][0]["value"]
            .as_str()
            .unwrap()
            .contains("restricción de edad"));
    }
}
