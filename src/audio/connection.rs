use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    admission::AdmissionController,
    backoff::{Backoff, BackoffPolicy},
    voice::{GatewayError, VoiceGateway, VoiceLink},
};

/// Enlace de voz vivo de un guild. Lo posee la sesión; los clones comparten
/// el mismo enlace.
#[derive(Clone)]
pub struct Connection {
    link: Arc<dyn VoiceLink>,
    established_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(link: Arc<dyn VoiceLink>) -> Self {
        Self {
            link,
            established_at: Utc::now(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.link.guild_id()
    }

    pub fn channel_id(&self) -> ChannelId {
        self.link.channel_id()
    }

    pub fn link(&self) -> &Arc<dyn VoiceLink> {
        &self.link
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub async fn is_connected(&self) -> bool {
        self.link.is_connected().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("guild_id", &self.guild_id())
            .field("channel_id", &self.channel_id())
            .field("established_at", &self.established_at)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("la conexión no se completó en {0:?}")]
    ConnectTimeout(Duration),

    #[error("otra conexión sigue en curso para este servidor")]
    AlreadyConnecting,

    #[error("no hay canal de voz al que conectarse")]
    NoChannel,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("no se pudo reconectar tras {attempts} intentos")]
    ReconnectExhausted { attempts: u32 },

    #[error("operación cancelada")]
    Cancelled,
}

/// Mantiene "como mucho una conexión viva por guild, en el canal de quien
/// la pidió".
///
/// La conexión vive en la sesión del guild; el manager recibe la actual y
/// devuelve la que hay que conservar. Las conexiones de un mismo guild se
/// hacen de a una: quien llega segundo espera su turno.
pub struct ConnectionManager {
    gateway: Arc<dyn VoiceGateway>,
    admission: AdmissionController,
    guild_locks: DashMap<GuildId, Arc<Mutex<()>>>,
    connect_timeout: Duration,
    backoff: BackoffPolicy,
}

impl ConnectionManager {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        admission: AdmissionController,
        connect_timeout: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            gateway,
            admission,
            guild_locks: DashMap::new(),
            connect_timeout,
            backoff,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Devuelve una conexión al canal `channel_id`.
    ///
    /// Reutiliza `existing` si sigue conectada a ese canal; cualquier otra
    /// conexión previa se corta antes de conectar de nuevo. Si `cancel` se
    /// dispara mientras se conecta, el enlace tardío se corta antes de soltar
    /// el turno del guild y el resultado es [`ConnectionError::Cancelled`].
    pub async fn acquire(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        existing: Option<Connection>,
        cancel: &CancellationToken,
    ) -> Result<Connection, ConnectionError> {
        let _turn = self.wait_turn(guild_id, cancel).await?;

        if let Some(existing) = existing {
            if Some(existing.channel_id()) == channel_id && existing.is_connected().await {
                debug!("🔊 Reutilizando conexión de voz en guild {}", guild_id);
                return Ok(existing);
            }

            info!(
                "🔌 Liberando conexión obsoleta (canal {}) en guild {}",
                existing.channel_id(),
                guild_id
            );
            existing.link().disconnect().await;
        }

        let channel_id = channel_id.ok_or(ConnectionError::NoChannel)?;
        if cancel.is_cancelled() {
            return Err(ConnectionError::Cancelled);
        }

        // La conexión en sí no se interrumpe a medias; la acota el timeout
        let link = match tokio::time::timeout(
            self.connect_timeout,
            self.gateway.connect(guild_id, channel_id),
        )
        .await
        {
            Ok(Ok(link)) => link,
            Ok(Err(GatewayError::ConnectTimeout)) | Err(_) => {
                warn!(
                    "⏰ Conexión al canal {} agotó {:?} en guild {}",
                    channel_id, self.connect_timeout, guild_id
                );
                return Err(ConnectionError::ConnectTimeout(self.connect_timeout));
            }
            Ok(Err(e)) => return Err(e.into()),
        };

        if cancel.is_cancelled() {
            info!(
                "🚫 Conexión al canal {} llegó tarde en guild {}, se descarta",
                channel_id, guild_id
            );
            link.disconnect().await;
            return Err(ConnectionError::Cancelled);
        }

        info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);
        Ok(Connection::new(link))
    }

    /// Corta y descarta la conexión. Idempotente.
    pub async fn release(&self, connection: Option<Connection>) {
        if let Some(connection) = connection {
            connection.link().disconnect().await;
            info!("👋 Conexión liberada en guild {}", connection.guild_id());
        }
    }

    /// Reconecta a `channel_id` con backoff exponencial.
    ///
    /// Primero libera la conexión caída. Antes del intento `n` espera
    /// `min(2^n, cap)` unidades; tras `max_attempts` fallos se rinde con
    /// [`ConnectionError::ReconnectExhausted`]. `on_attempt` recibe el número
    /// de cada intento que está por empezar.
    pub async fn reconnect_with_backoff(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        stale: Option<Connection>,
        cancel: &CancellationToken,
        on_attempt: impl Fn(u32) + Send + Sync,
    ) -> Result<Connection, ConnectionError> {
        self.release(stale).await;

        let mut backoff = Backoff::new(self.backoff);

        loop {
            if backoff.is_exhausted() {
                error!(
                    "❌ Reconexión agotada tras {} intentos en guild {}",
                    backoff.attempts(),
                    guild_id
                );
                return Err(ConnectionError::ReconnectExhausted {
                    attempts: backoff.attempts(),
                });
            }

            let delay = backoff.next();
            let attempt = backoff.attempts();
            on_attempt(attempt);
            warn!(
                "🔄 Reintento {} de reconexión en {:?} (guild {})",
                attempt, delay, guild_id
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                permit = self.admission.acquire() => permit,
            };

            let result = self.acquire(guild_id, Some(channel_id), None, cancel).await;
            drop(permit);

            match result {
                Ok(connection) => {
                    info!("✅ Reconectado en guild {} (intento {})", guild_id, attempt);
                    return Ok(connection);
                }
                Err(ConnectionError::Cancelled) => return Err(ConnectionError::Cancelled),
                Err(e) => warn!("❌ Intento {} falló: {}", attempt, e),
            }
        }
    }

    /// Turno exclusivo para conectar en el guild. Espera como mucho un
    /// timeout de conexión a que termine la anterior.
    async fn wait_turn(
        &self,
        guild_id: GuildId,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<()>, ConnectionError> {
        let lock = Arc::clone(self.guild_locks.entry(guild_id).or_default().value());

        if let Ok(turn) = Arc::clone(&lock).try_lock_owned() {
            return Ok(turn);
        }
        debug!("⏳ Esperando otra conexión en curso en guild {}", guild_id);

        tokio::select! {
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
            turn = tokio::time::timeout(self.connect_timeout, lock.lock_owned()) => {
                turn.map_err(|_| ConnectionError::AlreadyConnecting)
            }
        }
    }
}
