//! songbird-backed implementation of the voice gateway.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    events::CoreEvent,
    input::HttpRequest,
    tracks::PlayMode,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::voice::{
        stream_channel, GatewayError, StreamCompletion, StreamEnd, StreamHandle, VoiceGateway,
        VoiceLink,
    },
    sources::ResolvedItem,
};

/// Completion of one track; whoever takes it first reports the end.
type CompletionSlot = Arc<Mutex<Option<StreamCompletion>>>;

/// Slot of the track currently playing on a call.
type CurrentSlot = Arc<Mutex<Option<CompletionSlot>>>;

fn finish(slot: &CompletionSlot, end: StreamEnd) {
    if let Some(completion) = slot.lock().take() {
        completion.complete(end);
    }
}

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    volume: f32,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, volume: f32) -> Self {
        Self {
            manager,
            http,
            volume,
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceLink>, GatewayError> {
        let call = match self.manager.join(guild_id, channel_id).await {
            Ok(call) => call,
            Err(JoinError::TimedOut) => {
                let _ = self.manager.remove(guild_id).await;
                return Err(GatewayError::ConnectTimeout);
            }
            Err(e) => {
                error!("❌ Error al unirse al canal {}: {:?}", channel_id, e);
                let _ = self.manager.remove(guild_id).await;
                return Err(GatewayError::Join(e.to_string()));
            }
        };

        let current: CurrentSlot = Arc::new(Mutex::new(None));
        {
            let mut handler = call.lock().await;
            if let Err(e) = handler.deafen(true).await {
                warn!("⚠️ No se pudo ensordecer al bot en guild {}: {:?}", guild_id, e);
            }

            // Un Call se reutiliza entre conexiones del mismo guild
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Core(CoreEvent::DriverDisconnect),
                DisconnectNotifier {
                    guild_id,
                    current: Arc::clone(&current),
                },
            );
        }

        Ok(Arc::new(SongbirdLink {
            guild_id,
            channel_id,
            call,
            manager: Arc::clone(&self.manager),
            http: self.http.clone(),
            volume: self.volume,
            current,
            left: AtomicBool::new(false),
        }))
    }
}

pub struct SongbirdLink {
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<tokio::sync::Mutex<Call>>,
    manager: Arc<Songbird>,
    http: reqwest::Client,
    volume: f32,
    current: CurrentSlot,
    left: AtomicBool,
}

impl SongbirdLink {
    fn take_current(&self) -> Option<CompletionSlot> {
        self.current.lock().take()
    }
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_connected(&self) -> bool {
        if self.left.load(Ordering::SeqCst) {
            return false;
        }
        self.call.lock().await.current_connection().is_some()
    }

    async fn stream(&self, item: &ResolvedItem) -> Result<StreamHandle, GatewayError> {
        if self.left.load(Ordering::SeqCst) {
            return Err(GatewayError::NotConnected);
        }

        let mut call = self.call.lock().await;
        if call.current_connection().is_none() {
            return Err(GatewayError::NotConnected);
        }

        if let Some(previous) = self.take_current() {
            finish(&previous, StreamEnd::Stopped);
        }
        call.stop();

        let input = HttpRequest::new(self.http.clone(), item.stream_url.clone());
        let track = call.play_input(input.into());
        if let Err(e) = track.set_volume(self.volume) {
            debug!("🔉 No se pudo ajustar el volumen: {:?}", e);
        }

        let (completion, handle) = stream_channel();
        let slot: CompletionSlot = Arc::new(Mutex::new(Some(completion)));

        track
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    slot: Arc::clone(&slot),
                },
            )
            .map_err(|e| GatewayError::Stream(format!("{:?}", e)))?;
        track
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    slot: Arc::clone(&slot),
                },
            )
            .map_err(|e| GatewayError::Stream(format!("{:?}", e)))?;

        *self.current.lock() = Some(slot);
        debug!("🎶 Stream iniciado: {}", item.title);
        Ok(handle)
    }

    async fn stop_stream(&self) {
        if let Some(slot) = self.take_current() {
            finish(&slot, StreamEnd::Stopped);
        }
        self.call.lock().await.stop();
    }

    async fn disconnect(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(slot) = self.take_current() {
            finish(&slot, StreamEnd::Stopped);
        }

        // Sólo se elimina el Call si sigue siendo el nuestro
        let ours = self
            .manager
            .get(self.guild_id)
            .is_some_and(|call| Arc::ptr_eq(&call, &self.call));
        if !ours {
            return;
        }

        self.call.lock().await.stop();
        match self.manager.remove(self.guild_id).await {
            Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", self.guild_id),
            Err(e) => debug!("🔌 Salida de guild {}: {:?}", self.guild_id, e),
        }
    }
}

struct TrackEndNotifier {
    slot: CompletionSlot,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        finish(&self.slot, StreamEnd::Finished);
        None
    }
}

struct TrackErrorNotifier {
    slot: CompletionSlot,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let message = match ctx {
            EventContext::Track(tracks) => tracks
                .iter()
                .find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(format!("{:?}", e)),
                    _ => None,
                })
                .unwrap_or_else(|| "error de reproducción".to_string()),
            _ => "error de reproducción".to_string(),
        };

        error!("❌ Error en track: {}", message);
        finish(&self.slot, StreamEnd::Failed(message));
        None
    }
}

/// Reports the running stream as lost when the voice driver drops.
struct DisconnectNotifier {
    guild_id: GuildId,
    current: CurrentSlot,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let slot = self.current.lock().take();
        if let Some(slot) = slot {
            warn!("📡 Driver de voz desconectado en guild {}", self.guild_id);
            finish(&slot, StreamEnd::ConnectionLost);
        }
        None
    }
}
