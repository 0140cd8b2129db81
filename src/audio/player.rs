use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        admission::AdmissionController,
        backoff::BackoffPolicy,
        connection::ConnectionManager,
        events::{EventBus, PlayerEvent, PlayerEventKind},
        queue::{QueueFull, QueueItem, QueueListing, TrackRef},
        session::{NowPlaying, PlaybackState, SessionRegistry},
        voice::VoiceGateway,
    },
    sources::{MediaResolver, PlaylistInfo, ResolveError},
};

/// Parámetros de orquestación, ver `Config::playback`
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub max_concurrent_operations: usize,
    pub connect_timeout: Duration,
    pub backoff_unit: Duration,
    pub backoff_cap: u32,
    pub max_reconnect_attempts: u32,
    pub max_queue_size: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 100,
            connect_timeout: Duration::from_secs(120),
            backoff_unit: Duration::from_secs(1),
            backoff_cap: 60,
            max_reconnect_attempts: 8,
            max_queue_size: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("no hay sesión para este servidor")]
    NoSession,

    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    #[error("no se está reproduciendo nada")]
    NothingPlaying,
}

/// Quién pidió algo y desde dónde
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: UserId,
    /// Canal de voz en el que está el usuario
    pub voice_channel: ChannelId,
    /// Canal donde se anuncian los eventos
    pub text_channel: Option<ChannelId>,
}

/// Punto de entrada del reproductor.
///
/// Tiene todas las sesiones y los colaboradores compartidos. Los comandos
/// encolan aquí y luego llaman a [`AudioPlayer::advance`]; el resto lo hace
/// una tarea en segundo plano por guild (ver `driver.rs`).
pub struct AudioPlayer {
    pub(super) registry: SessionRegistry,
    pub(super) connections: ConnectionManager,
    pub(super) admission: AdmissionController,
    pub(super) resolver: Arc<dyn MediaResolver>,
    pub(super) events: EventBus,
}

impl AudioPlayer {
    pub fn new(
        settings: PlaybackSettings,
        resolver: Arc<dyn MediaResolver>,
        gateway: Arc<dyn VoiceGateway>,
    ) -> Self {
        let admission = AdmissionController::new(settings.max_concurrent_operations);
        let backoff = BackoffPolicy::new(
            settings.backoff_unit,
            settings.backoff_cap,
            settings.max_reconnect_attempts,
        );

        Self {
            registry: SessionRegistry::new(settings.max_queue_size),
            connections: ConnectionManager::new(
                gateway,
                admission.clone(),
                settings.connect_timeout,
                backoff,
            ),
            admission,
            resolver,
            events: EventBus::new(64),
        }
    }

    /// Expande una playlist en sus referencias, con control de admisión
    pub async fn expand_playlist(&self, url: &str) -> Result<Option<PlaylistInfo>, ResolveError> {
        let _permit = self.admission.acquire().await;
        self.resolver.resolve_playlist(url).await
    }

    pub fn in_flight_operations(&self) -> usize {
        self.admission.in_flight()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Crea la sesión del guild si aún no existe
    pub fn ensure_session(&self, guild_id: GuildId) {
        self.registry.get_or_create(guild_id);
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Encola una referencia; con `prepend` va al frente (suena después).
    ///
    /// Devuelve su posición en la cola, empezando en 1.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        requester: Requester,
        reference: TrackRef,
        prepend: bool,
    ) -> Result<usize, PlayerError> {
        let handle = self.registry.get(guild_id).ok_or(PlayerError::NoSession)?;
        let mut session = handle.lock().await;

        let item = QueueItem::new(reference, requester.user_id);
        let position = if prepend {
            session.queue.prepend(item)?;
            1
        } else {
            session.queue.append(item)?;
            session.queue.len()
        };

        session.voice_channel = Some(requester.voice_channel);
        session.text_channel = requester.text_channel.or(session.text_channel);

        debug!(
            "➕ Encolado en guild {} (posición {}, {} en cola)",
            guild_id,
            position,
            session.queue.len()
        );
        Ok(position)
    }

    /// Agrega referencias en orden hasta el límite de la cola.
    ///
    /// Devuelve cuántas entraron.
    pub async fn enqueue_all(
        &self,
        guild_id: GuildId,
        requester: Requester,
        references: Vec<TrackRef>,
    ) -> Result<usize, PlayerError> {
        let handle = self.registry.get(guild_id).ok_or(PlayerError::NoSession)?;
        let mut session = handle.lock().await;

        let items = references
            .into_iter()
            .map(|reference| QueueItem::new(reference, requester.user_id))
            .collect();
        let added = session.queue.append_all(items);

        session.voice_channel = Some(requester.voice_channel);
        session.text_channel = requester.text_channel.or(session.text_channel);

        info!("📋 {} elementos añadidos a la cola de guild {}", added, guild_id);
        Ok(added)
    }

    /// Detiene la reproducción, limpia la cola y sale del canal de voz.
    ///
    /// Es inmediato: una tarea que esté resolviendo, conectando o
    /// reconectando queda cancelada y no vuelve a tocar la sesión. Devuelve
    /// si había algo que detener.
    pub async fn stop(&self, guild_id: GuildId) -> Result<bool, PlayerError> {
        let handle = self.registry.get(guild_id).ok_or(PlayerError::NoSession)?;

        // Sin soltar la sesión: un `advance` nuevo no la reclama hasta que la
        // conexión vieja esté cerrada
        let mut session = handle.lock().await;
        let was_active = session.state != PlaybackState::Idle
            || session.connection.is_some()
            || !session.queue.is_empty();
        let connection = session.reset();
        let text_channel = session.text_channel;

        if let Some(connection) = &connection {
            connection.link().stop_stream().await;
        }
        self.connections.release(connection).await;
        drop(session);

        if was_active {
            info!("⏹️ Reproducción detenida en guild {}", guild_id);
            self.events
                .publish(guild_id, text_channel, PlayerEventKind::Stopped);
        }

        Ok(was_active)
    }

    /// Salta la canción actual y las `count - 1` siguientes.
    ///
    /// Devuelve cuántas se saltaron, contando la actual.
    pub async fn skip(&self, guild_id: GuildId, count: usize) -> Result<usize, PlayerError> {
        let handle = self.registry.get(guild_id).ok_or(PlayerError::NoSession)?;
        let count = count.max(1);

        let (connection, dropped) = {
            let mut session = handle.lock().await;
            if !session.is_playing() {
                return Err(PlayerError::NothingPlaying);
            }
            let dropped = session.queue.skip(count - 1);
            (session.connection.clone(), dropped)
        };

        // El driver ve el stream terminar como `Stopped` y pasa al siguiente
        if let Some(connection) = connection {
            connection.link().stop_stream().await;
        }

        info!("⏭️ Saltados {} elementos en guild {}", dropped + 1, guild_id);
        Ok(dropped + 1)
    }

    /// Primeros `max_items` de la cola y cuántos quedan detrás. Vacía si el
    /// guild no tiene sesión.
    pub async fn list_queue(&self, guild_id: GuildId, max_items: usize) -> QueueListing {
        match self.registry.get(guild_id) {
            Some(handle) => handle.lock().await.queue.peek_range(max_items),
            None => QueueListing {
                items: Vec::new(),
                remaining: 0,
            },
        }
    }

    pub async fn current_state(&self, guild_id: GuildId) -> PlaybackState {
        match self.registry.get(guild_id) {
            Some(handle) => handle.lock().await.state(),
            None => PlaybackState::Idle,
        }
    }

    pub async fn is_playing(&self, guild_id: GuildId) -> bool {
        self.current_state(guild_id).await == PlaybackState::Playing
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<NowPlaying> {
        let handle = self.registry.get(guild_id)?;
        let session = handle.lock().await;
        session.now_playing().cloned()
    }

    /// Canal de voz al que está conectado el bot en el guild
    pub async fn connected_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let handle = self.registry.get(guild_id)?;
        let session = handle.lock().await;
        session.connection().map(|connection| connection.channel_id())
    }

    /// La conexión de voz del bot se cayó sin que nadie hiciera `stop`
    pub async fn connection_lost(&self, guild_id: GuildId) -> bool {
        let Some(handle) = self.registry.get(guild_id) else {
            return false;
        };
        let signalled = handle.lock().await.signal_connection_lost();
        if signalled {
            warn!("📡 Conexión de voz perdida en guild {}", guild_id);
        }
        signalled
    }

    /// Detiene y olvida el guild (el bot salió de él)
    pub async fn evict(&self, guild_id: GuildId) {
        if self.stop(guild_id).await.is_ok() {
            self.registry.remove(guild_id);
            info!("🗑️ Sesión eliminada para guild {}", guild_id);
        }
    }

    /// Detiene todas las sesiones y libera sus conexiones en paralelo
    pub async fn shutdown(&self) {
        let guilds = self.registry.guild_ids();
        info!("🛑 Cerrando {} sesiones", guilds.len());

        join_all(guilds.into_iter().map(|guild_id| self.stop(guild_id))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::testing::{channel, guild, wait_until, FakeGateway},
        sources::{MockMediaResolver, ResolvedItem},
    };
    use pretty_assertions::assert_eq;

    fn requester() -> Requester {
        Requester {
            user_id: UserId::new(7),
            voice_channel: channel(10),
            text_channel: Some(channel(99)),
        }
    }

    fn echo_resolver() -> Arc<MockMediaResolver> {
        let mut resolver = MockMediaResolver::new();
        resolver.expect_resolve_single().returning(|reference| {
            Ok(ResolvedItem::new(
                reference.as_str(),
                format!("https://cdn.test/{}", reference),
            ))
        });
        Arc::new(resolver)
    }

    fn player(gateway: Arc<FakeGateway>) -> Arc<AudioPlayer> {
        let settings = PlaybackSettings {
            backoff_unit: Duration::from_millis(1),
            max_queue_size: 5,
            ..PlaybackSettings::default()
        };
        let player = Arc::new(AudioPlayer::new(settings, echo_resolver(), gateway));
        player.ensure_session(guild());
        player
    }

    fn titles(listing: &QueueListing) -> Vec<String> {
        listing
            .items
            .iter()
            .map(|item| item.reference.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_enqueue_without_session_is_rejected() {
        let player = Arc::new(AudioPlayer::new(
            PlaybackSettings::default(),
            echo_resolver(),
            FakeGateway::new(),
        ));

        let result = player
            .enqueue(guild(), requester(), TrackRef::Query("a".into()), false)
            .await;
        assert!(matches!(result, Err(PlayerError::NoSession)));
    }

    #[tokio::test]
    async fn test_prepend_goes_first() {
        let player = player(FakeGateway::new());

        for name in ["a", "b"] {
            player
                .enqueue(guild(), requester(), TrackRef::Query(name.into()), false)
                .await
                .unwrap();
        }
        let position = player
            .enqueue(guild(), requester(), TrackRef::Query("z".into()), true)
            .await
            .unwrap();

        assert_eq!(position, 1);
        assert_eq!(titles(&player.list_queue(guild(), 10).await), vec!["z", "a", "b"]);
    }

    #[tokio::test]
    async fn test_enqueue_all_truncates_at_capacity() {
        let player = player(FakeGateway::new());

        let references = (0..8).map(|i| TrackRef::Query(format!("t{i}"))).collect();
        let added = player
            .enqueue_all(guild(), requester(), references)
            .await
            .unwrap();

        assert_eq!(added, 5);
        let listing = player.list_queue(guild(), 2).await;
        assert_eq!(titles(&listing), vec!["t0", "t1"]);
        assert_eq!(listing.remaining, 3);
    }

    #[tokio::test]
    async fn test_stop_clears_everything() {
        let gateway = FakeGateway::new();
        let player = player(gateway.clone());
        let mut events = player.subscribe();

        for name in ["a", "b", "c"] {
            player
                .enqueue(guild(), requester(), TrackRef::Query(name.into()), false)
                .await
                .unwrap();
        }
        player.advance(guild()).await;
        wait_until("playing", || async { player.is_playing(guild()).await }).await;

        assert!(player.stop(guild()).await.unwrap());

        assert_eq!(player.current_state(guild()).await, PlaybackState::Idle);
        assert!(player.list_queue(guild(), 10).await.is_empty());
        assert!(player.now_playing(guild()).await.is_none());
        assert!(player.connected_channel(guild()).await.is_none());
        assert!(!gateway.last_link().unwrap().connected());

        // Nada vuelve a sonar después del stop
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(gateway.streamed(), vec!["a"]);

        loop {
            let event = events.recv().await.unwrap();
            if event.kind == PlayerEventKind::Stopped {
                assert_eq!(event.text_channel, Some(channel(99)));
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_stop_when_idle_reports_nothing_to_stop() {
        let player = player(FakeGateway::new());
        assert!(!player.stop(guild()).await.unwrap());
    }

    #[tokio::test]
    async fn test_skip_requires_playback() {
        let player = player(FakeGateway::new());
        assert!(matches!(
            player.skip(guild(), 1).await,
            Err(PlayerError::NothingPlaying)
        ));
    }

    #[tokio::test]
    async fn test_skip_drops_current_and_following() {
        let gateway = FakeGateway::new();
        let player = player(gateway.clone());

        for name in ["a", "b", "c", "d"] {
            player
                .enqueue(guild(), requester(), TrackRef::Query(name.into()), false)
                .await
                .unwrap();
        }
        player.advance(guild()).await;
        wait_until("a playing", || async { gateway.streamed() == vec!["a"] }).await;

        assert_eq!(player.skip(guild(), 2).await.unwrap(), 2);

        wait_until("c playing", || async { gateway.streamed() == vec!["a", "c"] }).await;
        assert_eq!(titles(&player.list_queue(guild(), 10).await), vec!["d"]);
    }

    #[tokio::test]
    async fn test_evict_forgets_session() {
        let player = player(FakeGateway::new());
        player.evict(guild()).await;

        assert_eq!(player.session_count(), 0);
        let result = player
            .enqueue(guild(), requester(), TrackRef::Query("a".into()), false)
            .await;
        assert!(matches!(result, Err(PlayerError::NoSession)));
    }

    #[tokio::test]
    async fn test_shutdown_releases_all_connections() {
        let gateway = FakeGateway::new();
        let player = player(gateway.clone());
        player
            .enqueue(guild(), requester(), TrackRef::Query("a".into()), false)
            .await
            .unwrap();
        player.advance(guild()).await;
        wait_until("playing", || async { player.is_playing(guild()).await }).await;

        player.shutdown().await;

        assert!(!gateway.last_link().unwrap().connected());
        assert_eq!(player.current_state(guild()).await, PlaybackState::Idle);
    }
}
