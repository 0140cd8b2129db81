//! Boundary with the chat-gateway collaborator.
//!
//! The orchestration core only sees these traits; `bot::voice` implements
//! them on top of songbird.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::sources::ResolvedItem;

/// Cómo terminó un stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Sonó hasta el final
    Finished,
    /// Detenido a pedido (skip/stop)
    Stopped,
    /// Falló el stream en sí (decodificación, HTTP)
    Failed(String),
    /// Se cayó la conexión de voz a mitad del stream
    ConnectionLost,
}

/// Se resuelve una vez, cuando termina su stream
#[derive(Debug)]
pub struct StreamHandle {
    done: oneshot::Receiver<StreamEnd>,
}

/// Lado productor de un [`StreamHandle`]; lo guarda el enlace
#[derive(Debug)]
pub struct StreamCompletion {
    tx: oneshot::Sender<StreamEnd>,
}

pub fn stream_channel() -> (StreamCompletion, StreamHandle) {
    let (tx, done) = oneshot::channel();
    (StreamCompletion { tx }, StreamHandle { done })
}

impl StreamHandle {
    /// Espera el fin del stream. Si el enlace suelta su completion sin
    /// avisar, cuenta como conexión perdida.
    pub async fn finished(self) -> StreamEnd {
        self.done.await.unwrap_or(StreamEnd::ConnectionLost)
    }
}

impl StreamCompletion {
    pub fn complete(self, end: StreamEnd) {
        // El receptor puede haberse ido (stop); no importa
        let _ = self.tx.send(end);
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("tiempo de conexión agotado")]
    ConnectTimeout,

    #[error("ya hay una conexión de voz activa en este servidor")]
    AlreadyConnected,

    #[error("sin conexión de voz")]
    NotConnected,

    #[error("error al unirse al canal: {0}")]
    Join(String),

    #[error("error de stream: {0}")]
    Stream(String),
}

/// Enlace vivo a un canal de voz de un guild
#[async_trait]
pub trait VoiceLink: Send + Sync {
    fn guild_id(&self) -> GuildId;

    fn channel_id(&self) -> ChannelId;

    async fn is_connected(&self) -> bool;

    /// Empieza a reproducir `item`, reemplazando lo que sonaba
    async fn stream(&self, item: &ResolvedItem) -> Result<StreamHandle, GatewayError>;

    /// Corta el stream actual; su handle termina con [`StreamEnd::Stopped`]
    async fn stop_stream(&self);

    /// Sale del canal. Idempotente.
    async fn disconnect(&self);
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceLink>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_completion_resolves_handle() {
        let (completion, handle) = stream_channel();
        completion.complete(StreamEnd::Finished);
        assert_eq!(handle.finished().await, StreamEnd::Finished);
    }

    #[tokio::test]
    async fn test_dropped_completion_is_connection_lost() {
        let (completion, handle) = stream_channel();
        drop(completion);
        assert_eq!(handle.finished().await, StreamEnd::ConnectionLost);
    }
}
