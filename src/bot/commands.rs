use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        stop_command(),
        queue_command(),
        nowplaying_command(),
        stats_command(),
        report_command(),
        help_command(),
    ]
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción, una búsqueda o una playlist de YouTube")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "url",
                "URL, término de búsqueda o URL de playlist",
            )
            .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Salta la canción actual")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "num_songs",
                "Número de canciones a saltar (incluida la actual)",
            )
            .min_int_value(1),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción, limpia la cola y sale del canal")
}

// Comandos de información

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra la canción actual")
}

fn stats_command() -> CreateCommand {
    CreateCommand::new("stats").description("Estadísticas del bot")
}

fn report_command() -> CreateCommand {
    CreateCommand::new("reportanerror")
        .description("Envía un reporte de error al dueño del bot")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "message", "Describe el problema")
                .required(true),
        )
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Muestra la ayuda del bot")
}
