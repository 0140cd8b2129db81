//! In-memory voice gateway for driver and connection tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use super::voice::{
    stream_channel, GatewayError, StreamCompletion, StreamEnd, StreamHandle, VoiceGateway,
    VoiceLink,
};
use crate::sources::ResolvedItem;

pub fn guild() -> GuildId {
    GuildId::new(1)
}

pub fn channel(id: u64) -> ChannelId {
    ChannelId::new(id)
}

/// Consulta `check` hasta que se cumpla o pase un segundo
pub async fn wait_until<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[derive(Default)]
pub struct FakeGateway {
    connect_delay: Option<Duration>,
    failures_left: AtomicU32,
    connects: AtomicU32,
    links: Mutex<Vec<Arc<FakeLink>>>,
    streamed: Arc<Mutex<Vec<String>>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_connect_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            connect_delay: Some(delay),
            ..Self::default()
        })
    }

    /// Las próximas `n` conexiones fallan
    pub fn fail_next_connects(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Intentos de conexión, incluidos los fallidos
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Todos los enlaces entregados, del más viejo al más nuevo
    pub fn links(&self) -> Vec<Arc<FakeLink>> {
        self.links.lock().clone()
    }

    pub fn last_link(&self) -> Option<Arc<FakeLink>> {
        self.links.lock().last().cloned()
    }

    /// Títulos de cada stream iniciado, en orden, en todos los enlaces
    pub fn streamed(&self) -> Vec<String> {
        self.streamed.lock().clone()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceLink>, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::Join("scripted failure".into()));
        }

        let link = Arc::new(FakeLink {
            guild_id,
            channel_id,
            connected: AtomicBool::new(true),
            current: Mutex::new(None),
            streamed: Arc::clone(&self.streamed),
        });
        self.links.lock().push(Arc::clone(&link));
        Ok(link)
    }
}

pub struct FakeLink {
    guild_id: GuildId,
    channel_id: ChannelId,
    connected: AtomicBool,
    current: Mutex<Option<StreamCompletion>>,
    streamed: Arc<Mutex<Vec<String>>>,
}

impl FakeLink {
    /// Termina el stream actual como lo haría la capa de medios
    pub fn finish_current(&self, end: StreamEnd) -> bool {
        match self.current.lock().take() {
            Some(completion) => {
                completion.complete(end);
                true
            }
            None => false,
        }
    }

    /// Simula que el servidor de voz echa al bot
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.finish_current(StreamEnd::ConnectionLost);
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceLink for FakeLink {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn is_connected(&self) -> bool {
        self.connected()
    }

    async fn stream(&self, item: &ResolvedItem) -> Result<StreamHandle, GatewayError> {
        if !self.connected() {
            return Err(GatewayError::NotConnected);
        }

        let (completion, handle) = stream_channel();
        if let Some(previous) = self.current.lock().replace(completion) {
            previous.complete(StreamEnd::Stopped);
        }
        self.streamed.lock().push(item.title.clone());
        Ok(handle)
    }

    async fn stop_stream(&self) {
        self.finish_current(StreamEnd::Stopped);
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.finish_current(StreamEnd::Stopped);
    }
}
