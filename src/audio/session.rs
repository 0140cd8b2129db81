use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{connection::Connection, queue::SessionQueue, queue::TrackRef};

/// Estado de reproducción de un guild.
///
/// ```text
/// Idle ──advance──▶ Starting ──stream up──▶ Playing ──end──▶ Starting | Draining
///                      │                       │
///                      └──── connection lost ──┴──▶ Reconnecting ──▶ Playing | Idle
/// ```
///
/// `stop` devuelve cualquier estado a `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    Reconnecting,
    /// Cola vacía, conexión aún abierta
    Draining,
}

impl PlaybackState {
    /// Una tarea es dueña de la sesión; no puede arrancar otra.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Playing | Self::Reconnecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Playing => "playing",
            Self::Reconnecting => "reconnecting",
            Self::Draining => "draining",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// El elemento que está sonando
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub reference: TrackRef,
    pub title: String,
    pub page_url: Option<String>,
    pub duration: Option<Duration>,
    pub requested_by: UserId,
    pub started_at: DateTime<Utc>,
}

/// Identidad de una tarea de reproducción. Si su generación ya no coincide
/// con la de la sesión, un `stop` la reemplazó y no debe tocarla.
#[derive(Debug, Clone)]
pub(crate) struct RunToken {
    generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) lost: Arc<Notify>,
}

/// Estado de un guild. Sólo se accede a través del lock del registro.
#[derive(Debug)]
pub struct Session {
    pub(crate) queue: SessionQueue,
    pub(crate) state: PlaybackState,
    pub(crate) connection: Option<Connection>,
    pub(crate) voice_channel: Option<ChannelId>,
    pub(crate) text_channel: Option<ChannelId>,
    pub(crate) now_playing: Option<NowPlaying>,
    generation: u64,
    cancel: CancellationToken,
    lost: Arc<Notify>,
}

impl Session {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queue: SessionQueue::new(max_queue_size),
            state: PlaybackState::Idle,
            connection: None,
            voice_channel: None,
            text_channel: None,
            now_playing: None,
            generation: 0,
            cancel: CancellationToken::new(),
            lost: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Sólo es verdadero mientras suena un stream
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn queue(&self) -> &SessionQueue {
        &self.queue
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    pub(crate) fn run_token(&self) -> RunToken {
        RunToken {
            generation: self.generation,
            cancel: self.cancel.clone(),
            lost: Arc::clone(&self.lost),
        }
    }

    pub(crate) fn owns(&self, run: &RunToken) -> bool {
        self.generation == run.generation
    }

    /// Despierta a la tarea que espera el stream actual, si la hay
    pub(crate) fn signal_connection_lost(&self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }
        self.lost.notify_waiters();
        true
    }

    /// Termina la ejecución actual: cancela su tarea, vacía la cola y vuelve
    /// a `Idle`. Devuelve la conexión para que la libere quien llama.
    pub(crate) fn reset(&mut self) -> Option<Connection> {
        self.generation = self.generation.wrapping_add(1);
        self.cancel.cancel();
        self.cancel = CancellationToken::new();

        let cleared = self.queue.clear();
        debug!("🧹 Sesión reiniciada ({} elementos descartados)", cleared);

        self.now_playing = None;
        self.state = PlaybackState::Idle;
        self.connection.take()
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Guild → sesión. Se crean bajo demanda y sólo se borran al expulsar el
/// guild.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    max_queue_size: usize,
}

impl SessionRegistry {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_queue_size,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> SessionHandle {
        let entry = self.sessions.entry(guild_id).or_insert_with(|| {
            info!("🆕 Sesión creada para guild {}", guild_id);
            Arc::new(Mutex::new(Session::new(self.max_queue_size)))
        });
        Arc::clone(entry.value())
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.remove(&guild_id).map(|(_, session)| session)
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::QueueItem;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_active_states() {
        assert!(!PlaybackState::Idle.is_active());
        assert!(PlaybackState::Starting.is_active());
        assert!(PlaybackState::Playing.is_active());
        assert!(PlaybackState::Reconnecting.is_active());
        assert!(!PlaybackState::Draining.is_active());
    }

    #[test]
    fn test_registry_returns_same_session() {
        let registry = SessionRegistry::new(10);
        let a = registry.get_or_create(GuildId::new(1));
        let b = registry.get_or_create(GuildId::new(1));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get(GuildId::new(2)).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(GuildId::new(1)).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reset_invalidates_run_and_clears_queue() {
        let mut session = Session::new(10);
        session
            .queue
            .append(QueueItem::new(TrackRef::Query("a".into()), UserId::new(1)))
            .unwrap();
        session.state = PlaybackState::Playing;

        let run = session.run_token();
        assert!(session.owns(&run));

        assert!(session.reset().is_none());
        assert!(!session.owns(&run));
        assert!(run.cancel.is_cancelled());
        assert!(session.queue.is_empty());
        assert_eq!(session.state(), PlaybackState::Idle);

        // Las ejecuciones nuevas reciben un token sin cancelar
        assert!(!session.run_token().cancel.is_cancelled());
    }

    #[test]
    fn test_connection_lost_only_signals_while_playing() {
        let mut session = Session::new(10);
        assert!(!session.signal_connection_lost());

        session.state = PlaybackState::Playing;
        assert!(session.signal_connection_lost());
    }
}
