use serenity::model::id::{ChannelId, GuildId, UserId};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{audio::queue::TrackRef, sources::ItemFailure};

/// Algo que el reproductor quiere contarle a los usuarios
#[derive(Debug, Clone)]
pub struct PlayerEvent {
    pub guild_id: GuildId,
    /// Canal de texto del último comando en ese guild
    pub text_channel: Option<ChannelId>,
    pub kind: PlayerEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEventKind {
    TrackStarted {
        title: String,
        page_url: Option<String>,
        duration: Option<Duration>,
        requested_by: UserId,
        /// Reanudado tras una reconexión
        resumed: bool,
    },
    ItemSkipped {
        reference: TrackRef,
        failure: ItemFailure,
        reason: String,
    },
    QueueFinished,
    Reconnecting {
        attempt: u32,
    },
    Reconnected,
    ReconnectFailed {
        attempts: u32,
    },
    Stopped,
}

/// Difusión de [`PlayerEvent`]s. Publicar sin suscriptores no hace nada.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, guild_id: GuildId, text_channel: Option<ChannelId>, kind: PlayerEventKind) {
        trace!("📣 Evento en guild {}: {:?}", guild_id, kind);
        let _ = self.tx.send(PlayerEvent {
            guild_id,
            text_channel,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(GuildId::new(1), Some(ChannelId::new(2)), PlayerEventKind::QueueFinished);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.guild_id, GuildId::new(1));
        assert_eq!(event.text_channel, Some(ChannelId::new(2)));
        assert_eq!(event.kind, PlayerEventKind::QueueFinished);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        bus.publish(GuildId::new(1), None, PlayerEventKind::Stopped);
    }
}
