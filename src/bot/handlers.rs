use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{
        player::{PlayerError, Requester},
        queue::TrackRef,
    },
    bot::QueueBird,
    sources::YouTubeApiClient,
    ui::embeds::{self, BotStats},
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &QueueBird) -> Result<()> {
    info!(
        "📝 Comando /{} usado por {} en guild {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    // Todo salvo la ayuda y los reportes necesita un servidor
    let guild_id = match (command.guild_id, command.data.name.as_str()) {
        (_, "help") => return handle_help(ctx, &command).await,
        (guild_id, "reportanerror") => return handle_report(ctx, &command, guild_id, bot).await,
        (Some(guild_id), _) => guild_id,
        (None, _) => {
            return respond(
                ctx,
                &command,
                embeds::create_error_embed("Sin servidor", "Este comando sólo funciona en un servidor"),
                true,
            )
            .await
        }
    };

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, guild_id, bot).await,
        "skip" => handle_skip(ctx, &command, guild_id, bot).await,
        "stop" => handle_stop(ctx, &command, guild_id, bot).await,
        "queue" => handle_queue(ctx, &command, guild_id, bot).await,
        "nowplaying" => handle_nowplaying(ctx, &command, guild_id, bot).await,
        "stats" => handle_stats(ctx, &command, bot).await,
        _ => {
            respond(
                ctx,
                &command,
                embeds::create_error_embed("Comando no reconocido", "Usa `/help`"),
                true,
            )
            .await
        }
    }
}

// Handlers específicos para cada comando

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &QueueBird,
) -> Result<()> {
    let input = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "url")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?
        .to_string();

    // Defer la respuesta: expandir una playlist puede tardar
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let Some(voice_channel) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return edit(
            ctx,
            command,
            embeds::create_error_embed("Sin canal de voz", "Debes estar en un canal de voz"),
        )
        .await;
    };

    let requester = Requester {
        user_id: command.user.id,
        voice_channel,
        text_channel: Some(command.channel_id),
    };

    let reference = TrackRef::parse(&input);
    let embed = if YouTubeApiClient::extract_playlist_id(&input).is_some() {
        enqueue_playlist(bot, guild_id, requester, &reference).await
    } else {
        enqueue_single(bot, guild_id, requester, reference).await
    };

    edit(ctx, command, embed).await?;
    bot.player.advance(guild_id).await;

    Ok(())
}

/// Una canción suelta va al frente de la cola
async fn enqueue_single(
    bot: &QueueBird,
    guild_id: GuildId,
    requester: Requester,
    reference: TrackRef,
) -> CreateEmbed {
    match bot
        .player
        .enqueue(guild_id, requester, reference.clone(), true)
        .await
    {
        Ok(position) => embeds::create_track_added_embed(&reference, position, requester.user_id),
        Err(e) => player_error_embed(&e),
    }
}

/// Una playlist va al final, en orden
async fn enqueue_playlist(
    bot: &QueueBird,
    guild_id: GuildId,
    requester: Requester,
    reference: &TrackRef,
) -> CreateEmbed {
    let playlist = match bot.player.expand_playlist(reference.as_str()).await {
        Ok(Some(playlist)) => playlist,
        Ok(None) => {
            info!("📋 '{}' no es una playlist expandible, se encola tal cual", reference);
            return enqueue_single(bot, guild_id, requester, reference.clone()).await;
        }
        Err(e) => {
            warn!("⚠️ No se pudo expandir la playlist '{}': {}", reference, e);
            return embeds::create_error_embed("Playlist", &e.to_string());
        }
    };

    let found = playlist.items.len();
    match bot
        .player
        .enqueue_all(guild_id, requester, playlist.items)
        .await
    {
        Ok(added) => embeds::create_playlist_added_embed(&playlist.title, added, found),
        Err(e) => player_error_embed(&e),
    }
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &QueueBird,
) -> Result<()> {
    let amount = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "num_songs")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(1)
        .max(1) as usize;

    match bot.player.skip(guild_id, amount).await {
        Ok(skipped) => respond(ctx, command, embeds::create_skipped_embed(skipped), false).await,
        Err(e) => respond(ctx, command, player_error_embed(&e), true).await,
    }
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &QueueBird,
) -> Result<()> {
    match bot.player.stop(guild_id).await {
        Ok(true) => respond(ctx, command, embeds::create_stopped_embed(), false).await,
        Ok(false) => {
            respond(
                ctx,
                command,
                embeds::create_error_embed("Nada que detener", "No estoy reproduciendo nada"),
                true,
            )
            .await
        }
        Err(e) => respond(ctx, command, player_error_embed(&e), true).await,
    }
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &QueueBird,
) -> Result<()> {
    let listing = bot
        .player
        .list_queue(guild_id, bot.config.queue_display_limit)
        .await;
    let now = bot.player.now_playing(guild_id).await;

    respond(
        ctx,
        command,
        embeds::create_queue_embed(&listing, now.as_ref()),
        false,
    )
    .await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &QueueBird,
) -> Result<()> {
    match bot.player.now_playing(guild_id).await {
        Some(now) => respond(ctx, command, embeds::create_now_playing_embed(&now), false).await,
        None => {
            respond(
                ctx,
                command,
                embeds::create_error_embed("Nada sonando", "No hay nada reproduciéndose actualmente"),
                true,
            )
            .await
        }
    }
}

async fn handle_stats(ctx: &Context, command: &CommandInteraction, bot: &QueueBird) -> Result<()> {
    let stats = BotStats {
        uptime: bot.started_at.elapsed(),
        guilds: ctx.cache.guild_count(),
        sessions: bot.player.session_count(),
        in_flight: bot.player.in_flight_operations(),
    };

    respond(ctx, command, embeds::create_stats_embed(&stats), false).await
}

async fn handle_report(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: Option<GuildId>,
    bot: &QueueBird,
) -> Result<()> {
    let message = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "message")
        .and_then(|opt| opt.value.as_str())
        .unwrap_or_default();

    let Some(owner) = bot.config.owner_user_id else {
        return respond(
            ctx,
            command,
            embeds::create_error_embed("Reportes desactivados", "El bot no tiene dueño configurado"),
            true,
        )
        .await;
    };

    let dm = UserId::new(owner).create_dm_channel(&ctx.http).await?;
    dm.id
        .send_message(
            &ctx.http,
            CreateMessage::new().embed(embeds::create_report_embed(
                command.user.id,
                guild_id,
                message,
            )),
        )
        .await?;

    info!("🐞 Reporte de {} enviado al dueño", command.user.name);
    respond(
        ctx,
        command,
        embeds::create_success_embed("Reporte enviado", "¡Gracias por avisar!"),
        true,
    )
    .await
}

async fn handle_help(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    respond(ctx, command, embeds::create_help_embed(), true).await
}

// Funciones auxiliares

fn player_error_embed(error: &PlayerError) -> CreateEmbed {
    match error {
        PlayerError::NoSession => embeds::create_error_embed(
            "No disponible",
            "El bot aún no está listo en este servidor, inténtalo en unos segundos",
        ),
        PlayerError::QueueFull(e) => embeds::create_error_embed("Cola llena", &e.to_string()),
        PlayerError::NothingPlaying => {
            embeds::create_error_embed("Nada sonando", "No se está reproduciendo nada")
        }
    }
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
