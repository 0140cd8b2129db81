//! Playback driver: the per-guild drain task.
//!
//! [`AudioPlayer::advance`] claims an idle session and spawns one task that
//! pops, resolves, connects and streams items until the queue is empty. The
//! task holds the session lock only between awaits and re-checks its
//! [`RunToken`] every time it takes it back, so a `stop` issued at any point
//! wins.
//!
//! Per-item failures (resolve or stream) skip to the next item. A lost
//! connection is retried with backoff and the interrupted item is played
//! again from the start; when the retries run out the session goes idle
//! with the item back at the front of the queue.

use chrono::Utc;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    admission::AdmissionPermit,
    connection::{Connection, ConnectionError},
    events::PlayerEventKind,
    player::AudioPlayer,
    queue::QueueItem,
    session::{NowPlaying, PlaybackState, RunToken, SessionHandle},
    voice::{GatewayError, StreamEnd},
};
use crate::sources::{ItemFailure, ResolvedItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Se lanzó una tarea de reproducción.
    Started,
    /// Otra tarea ya es dueña de la sesión.
    AlreadyActive,
    NothingQueued,
    NoSession,
}

/// Qué hace el bucle después de un elemento
enum Flow {
    Next,
    Halt,
}

impl AudioPlayer {
    /// Empieza a reproducir la cola del guild si nadie lo está haciendo ya.
    ///
    /// Se puede llamar a la vez y repetidas veces: nunca hay más de una tarea
    /// de reproducción por guild.
    pub async fn advance(self: &Arc<Self>, guild_id: GuildId) -> AdvanceOutcome {
        let _permit = self.admission.acquire().await;

        let Some(handle) = self.registry.get(guild_id) else {
            return AdvanceOutcome::NoSession;
        };

        let run = {
            let mut session = handle.lock().await;
            if session.state().is_active() {
                debug!("🎵 Guild {} ya está reproduciendo ({})", guild_id, session.state());
                return AdvanceOutcome::AlreadyActive;
            }
            if session.queue.is_empty() {
                return AdvanceOutcome::NothingQueued;
            }
            session.state = PlaybackState::Starting;
            session.run_token()
        };

        info!("▶️ Iniciando reproducción en guild {}", guild_id);
        let player = Arc::clone(self);
        tokio::spawn(async move {
            player.drain(guild_id, handle, run).await;
        });

        AdvanceOutcome::Started
    }

    async fn drain(self: Arc<Self>, guild_id: GuildId, handle: SessionHandle, run: RunToken) {
        loop {
            let (item, voice_channel) = {
                let mut session = handle.lock().await;
                if !session.owns(&run) {
                    return;
                }

                session.now_playing = None;
                match session.queue.pop_front() {
                    Some(item) => {
                        session.state = PlaybackState::Starting;
                        (item, session.voice_channel)
                    }
                    None => {
                        session.state = if session.connection.is_some() {
                            PlaybackState::Draining
                        } else {
                            PlaybackState::Idle
                        };
                        info!("📭 Cola terminada en guild {}", guild_id);
                        self.events.publish(
                            guild_id,
                            session.text_channel,
                            PlayerEventKind::QueueFinished,
                        );
                        return;
                    }
                }
            };

            match self
                .play_item(guild_id, &handle, &run, item, voice_channel)
                .await
            {
                Flow::Next => continue,
                Flow::Halt => return,
            }
        }
    }

    async fn play_item(
        &self,
        guild_id: GuildId,
        handle: &SessionHandle,
        run: &RunToken,
        item: QueueItem,
        voice_channel: Option<ChannelId>,
    ) -> Flow {
        let mut permit: Option<AdmissionPermit> = tokio::select! {
            _ = run.cancel.cancelled() => return Flow::Halt,
            permit = self.admission.acquire() => Some(permit),
        };

        debug!("🔍 Resolviendo '{}' en guild {}", item.reference, guild_id);
        let resolved = tokio::select! {
            _ = run.cancel.cancelled() => return Flow::Halt,
            resolved = self.resolver.resolve_single(&item.reference) => resolved,
        };

        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                let failure = e.failure();
                warn!(
                    "⚠️ No se pudo resolver '{}' ({}): {}",
                    item.reference, failure, e
                );
                self.skip_item(guild_id, handle, run, &item, failure, e.to_string())
                    .await;
                return Flow::Next;
            }
        };

        let existing = {
            let session = handle.lock().await;
            if !session.owns(run) {
                return Flow::Halt;
            }
            session.connection.clone()
        };

        let mut connection = match self
            .connections
            .acquire(guild_id, voice_channel, existing.clone(), &run.cancel)
            .await
        {
            Ok(connection) => connection,
            Err(ConnectionError::Cancelled) => return Flow::Halt,
            // No son caídas de conexión: reintentar con backoff no ayuda
            Err(e @ (ConnectionError::AlreadyConnecting | ConnectionError::NoChannel)) => {
                warn!("❌ No se pudo conectar en guild {}: {}", guild_id, e);
                return self.abandon(guild_id, handle, run, item, e).await;
            }
            Err(e) => {
                warn!("❌ No se pudo conectar en guild {}: {}", guild_id, e);
                permit = None;
                match self
                    .reconnect(guild_id, handle, run, voice_channel, existing)
                    .await
                {
                    Ok(connection) => connection,
                    Err(e) => return self.abandon(guild_id, handle, run, item, e).await,
                }
            }
        };

        if !self.store_connection(handle, run, &connection).await {
            self.connections.release(Some(connection)).await;
            return Flow::Halt;
        }

        let mut resumed = false;
        loop {
            // Registrado antes de pasar a Playing para no perder la señal
            let lost = run.lost.notified();
            tokio::pin!(lost);
            lost.as_mut().enable();

            let started = connection.link().stream(&resolved).await;
            let stream = match started {
                Ok(stream) => stream,
                Err(GatewayError::NotConnected) => {
                    permit = None;
                    match self
                        .reconnect(guild_id, handle, run, voice_channel, Some(connection))
                        .await
                    {
                        Ok(fresh) => {
                            connection = fresh;
                            if !self.store_connection(handle, run, &connection).await {
                                self.connections.release(Some(connection)).await;
                                return Flow::Halt;
                            }
                            continue;
                        }
                        Err(e) => return self.abandon(guild_id, handle, run, item, e).await,
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    let failure = ItemFailure::classify(&message);
                    error!("❌ Error al iniciar stream en guild {}: {}", guild_id, message);
                    self.skip_item(guild_id, handle, run, &item, failure, message)
                        .await;
                    return Flow::Next;
                }
            };
            drop(permit.take());

            if !self
                .mark_playing(guild_id, handle, run, &item, &resolved, resumed)
                .await
            {
                connection.link().stop_stream().await;
                return Flow::Halt;
            }

            let end = tokio::select! {
                _ = run.cancel.cancelled() => return Flow::Halt,
                _ = &mut lost => StreamEnd::ConnectionLost,
                end = stream.finished() => end,
            };

            match end {
                StreamEnd::Finished | StreamEnd::Stopped => {
                    debug!("✅ Terminó '{}' en guild {}", resolved.title, guild_id);
                    return Flow::Next;
                }
                StreamEnd::Failed(message) => {
                    let failure = ItemFailure::classify(&message);
                    error!(
                        "❌ Stream de '{}' falló ({}): {}",
                        resolved.title, failure, message
                    );
                    self.skip_item(guild_id, handle, run, &item, failure, message)
                        .await;
                    return Flow::Next;
                }
                StreamEnd::ConnectionLost => {
                    warn!(
                        "📡 Conexión perdida durante '{}' en guild {}",
                        resolved.title, guild_id
                    );
                    match self
                        .reconnect(guild_id, handle, run, voice_channel, Some(connection))
                        .await
                    {
                        Ok(fresh) => {
                            connection = fresh;
                            if !self.store_connection(handle, run, &connection).await {
                                self.connections.release(Some(connection)).await;
                                return Flow::Halt;
                            }
                            resumed = true;
                        }
                        Err(e) => return self.abandon(guild_id, handle, run, item, e).await,
                    }
                }
            }
        }
    }

    /// Reemplaza la conexión caída pasando por el backoff
    async fn reconnect(
        &self,
        guild_id: GuildId,
        handle: &SessionHandle,
        run: &RunToken,
        voice_channel: Option<ChannelId>,
        stale: Option<Connection>,
    ) -> Result<Connection, ConnectionError> {
        let text_channel = {
            let mut session = handle.lock().await;
            if !session.owns(run) {
                return Err(ConnectionError::Cancelled);
            }
            session.state = PlaybackState::Reconnecting;
            session.connection = None;
            session.text_channel
        };

        let Some(channel_id) = voice_channel else {
            self.connections.release(stale).await;
            return Err(ConnectionError::NoChannel);
        };

        let connection = self
            .connections
            .reconnect_with_backoff(guild_id, channel_id, stale, &run.cancel, |attempt| {
                self.events.publish(
                    guild_id,
                    text_channel,
                    PlayerEventKind::Reconnecting { attempt },
                )
            })
            .await?;

        self.events
            .publish(guild_id, text_channel, PlayerEventKind::Reconnected);
        Ok(connection)
    }

    /// Abandona la sesión tras un fallo de conexión sin arreglo. El elemento
    /// interrumpido vuelve al frente de la cola.
    async fn abandon(
        &self,
        guild_id: GuildId,
        handle: &SessionHandle,
        run: &RunToken,
        item: QueueItem,
        reason: ConnectionError,
    ) -> Flow {
        let stale = {
            let mut session = handle.lock().await;
            if !session.owns(run) {
                return Flow::Halt;
            }

            error!("❌ Reproducción abandonada en guild {}: {}", guild_id, reason);

            session.queue.restore_front(item);
            session.now_playing = None;
            session.state = PlaybackState::Idle;

            let attempts = match reason {
                ConnectionError::ReconnectExhausted { attempts } => attempts,
                _ => 0,
            };
            self.events.publish(
                guild_id,
                session.text_channel,
                PlayerEventKind::ReconnectFailed { attempts },
            );

            session.connection.take()
        };

        self.connections.release(stale).await;
        Flow::Halt
    }

    async fn store_connection(
        &self,
        handle: &SessionHandle,
        run: &RunToken,
        connection: &Connection,
    ) -> bool {
        let mut session = handle.lock().await;
        if !session.owns(run) {
            return false;
        }
        session.connection = Some(connection.clone());
        true
    }

    async fn mark_playing(
        &self,
        guild_id: GuildId,
        handle: &SessionHandle,
        run: &RunToken,
        item: &QueueItem,
        resolved: &ResolvedItem,
        resumed: bool,
    ) -> bool {
        let mut session = handle.lock().await;
        if !session.owns(run) {
            return false;
        }

        session.state = PlaybackState::Playing;
        session.now_playing = Some(NowPlaying {
            reference: item.reference.clone(),
            title: resolved.title.clone(),
            page_url: resolved.page_url.clone(),
            duration: resolved.duration,
            requested_by: item.requested_by,
            started_at: Utc::now(),
        });

        info!("🎵 Reproduciendo '{}' en guild {}", resolved.title, guild_id);
        self.events.publish(
            guild_id,
            session.text_channel,
            PlayerEventKind::TrackStarted {
                title: resolved.title.clone(),
                page_url: resolved.page_url.clone(),
                duration: resolved.duration,
                requested_by: item.requested_by,
                resumed,
            },
        );
        true
    }

    async fn skip_item(
        &self,
        guild_id: GuildId,
        handle: &SessionHandle,
        run: &RunToken,
        item: &QueueItem,
        failure: ItemFailure,
        reason: String,
    ) {
        let session = handle.lock().await;
        if !session.owns(run) {
            return;
        }

        self.events.publish(
            guild_id,
            session.text_channel,
            PlayerEventKind::ItemSkipped {
                reference: item.reference.clone(),
                failure,
                reason,
            },
        );
    }
}
