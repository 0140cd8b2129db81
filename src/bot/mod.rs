//! # Bot Module
//!
//! Discord side of Queuebird: slash-command registration and dispatch, guild
//! lifecycle, voice-state signals, the songbird voice gateway and the
//! announcer that turns player events into channel messages.
//!
//! ## Architecture
//!
//! [`QueueBird`] implements Serenity's [`EventHandler`]. It owns no playback
//! state itself; everything goes through the shared [`AudioPlayer`]:
//!
//! - `ready` / `guild_create` create the guild's session
//! - `guild_delete` (bot removed) evicts it
//! - `voice_state_update` reports a dropped bot connection, and stops
//!   playback once no listener is left in the bot's channel

use anyhow::Result;
use serenity::{
    all::{
        ChannelId, Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild,
        VoiceState,
    },
    async_trait,
};
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;
pub mod voice;

use crate::{audio::player::AudioPlayer, config::Config};

/// Main Discord event handler.
pub struct QueueBird {
    /// Configuración cargada al inicio
    pub config: Arc<Config>,
    /// Orquestador de reproducción compartido con `main`
    pub player: Arc<AudioPlayer>,
    pub started_at: Instant,
}

impl QueueBird {
    pub fn new(config: Arc<Config>, player: Arc<AudioPlayer>) -> Self {
        Self {
            config,
            player,
            started_at: Instant::now(),
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Per-guild when `guild_id` is configured (propagates in seconds, useful
    /// for development), global otherwise (can take up to an hour).
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Personas (no bots) en el canal de voz del bot, según la caché
    fn listeners_in_bot_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Option<usize> {
        let bot_id = ctx.cache.current_user().id;
        let guild = ctx.cache.guild(guild_id)?;

        let listeners = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .filter(|state| state.user_id != bot_id)
            .filter(|state| !state.member.as_ref().is_some_and(|member| member.user.bot))
            .count();

        Some(listeners)
    }
}

#[async_trait]
impl EventHandler for QueueBird {
    /// Registers commands and opens a session for every guild the bot is in.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        for guild in &ready.guilds {
            self.player.ensure_session(guild.id);
        }

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        if is_new == Some(true) {
            info!("🎉 Agregado al servidor '{}' ({})", guild.name, guild.id);
        }
        self.player.ensure_session(guild.id);
    }

    /// `unavailable` means an outage, not a removal; the session is kept.
    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            warn!("⚠️ Guild {} no disponible temporalmente", incomplete.id);
            return;
        }

        info!("👋 Removido del servidor {}", incomplete.id);
        self.player.evict(incomplete.id).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Voice signals for the player.
    ///
    /// - The bot's own state losing its channel is a dropped connection; the
    ///   player only acts on it while a stream is running.
    /// - Someone leaving the bot's channel stops playback once no listener
    ///   remains.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let bot_id = ctx.cache.current_user().id;

        if new.user_id == bot_id {
            if new.channel_id.is_none() && old.is_some() {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.player.connection_lost(guild_id).await;
            }
            return;
        }

        let Some(bot_channel) = self.player.connected_channel(guild_id).await else {
            return;
        };
        let left_bot_channel = old.as_ref().and_then(|state| state.channel_id) == Some(bot_channel)
            && new.channel_id != Some(bot_channel);
        if !left_bot_channel {
            return;
        }

        match self.listeners_in_bot_channel(&ctx, guild_id, bot_channel) {
            Some(0) => {
                info!("🚪 Canal vacío, deteniendo reproducción en guild {}", guild_id);
                if let Err(e) = self.player.stop(guild_id).await {
                    error!("Error al detener reproducción: {:?}", e);
                }
            }
            Some(listeners) => debug!("👥 Quedan {} oyentes en guild {}", listeners, guild_id),
            None => {}
        }
    }
}
