use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
    model::id::{GuildId, UserId},
};
use std::time::Duration;

use crate::{
    audio::{
        queue::{QueueListing, TrackRef},
        session::NowPlaying,
    },
    sources::ItemFailure,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Queuebird";

/// Discord admite 25 campos por embed; uno queda para el resumen
const MAX_QUEUE_FIELDS: usize = 24;

/// Datos para `/stats`
#[derive(Debug, Clone)]
pub struct BotStats {
    pub uptime: Duration,
    pub guilds: usize,
    pub sessions: usize,
    pub in_flight: usize,
}

fn base(title: impl Into<String>, colour: serenity::all::Colour) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .color(colour)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(reference: &TrackRef, position: usize, requested_by: UserId) -> CreateEmbed {
    let description = match reference {
        TrackRef::Url(url) => format!("**[{}]({})**", url, url),
        TrackRef::Query(query) => format!("🔍 **{}**", query),
    };

    base("✅ Canción Agregada", colors::SUCCESS_GREEN)
        .description(description)
        .field("📍 Posición", position.to_string(), true)
        .field("👤 Solicitado por", format!("<@{}>", requested_by), true)
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente si no hay música sonando",
        ))
}

/// Crea un embed para mostrar que se agregó una playlist
pub fn create_playlist_added_embed(title: &str, added: usize, found: usize) -> CreateEmbed {
    let mut embed = base("📋 Playlist Agregada", colors::SUCCESS_GREEN)
        .description(format!("**{}**", title))
        .field("🎵 Canciones", added.to_string(), true);

    if added < found {
        embed = embed.field(
            "⚠️ Omitidas",
            format!("{} (cola llena)", found - added),
            true,
        );
    }

    embed
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(now: &NowPlaying) -> CreateEmbed {
    let elapsed = (chrono::Utc::now() - now.started_at)
        .to_std()
        .unwrap_or_default();

    let mut embed = base("🎵 Reproduciendo Ahora", colors::MUSIC_PURPLE)
        .description(format!("**{}**", now.title));

    let progress = match now.duration {
        Some(total) => format!("{} / {}", format_duration(elapsed), format_duration(total)),
        None => format!("{} / 🔴 En vivo", format_duration(elapsed)),
    };

    embed = embed
        .field("⏱️ Progreso", progress, true)
        .field("👤 Solicitado por", format!("<@{}>", now.requested_by), true);

    if let Some(url) = &now.page_url {
        embed = embed.url(url);
    }

    embed
}

/// Anuncio de inicio de canción (o de reanudación tras reconectar)
pub fn create_track_started_embed(
    title: &str,
    page_url: Option<&str>,
    duration: Option<Duration>,
    requested_by: UserId,
    resumed: bool,
) -> CreateEmbed {
    let heading = if resumed {
        "🔁 Reanudando"
    } else {
        "🎵 Reproduciendo Ahora"
    };

    let mut embed = base(heading, colors::MUSIC_PURPLE)
        .description(format!("**{}**", title))
        .field(
            "⏱️ Duración",
            duration.map_or_else(|| "🔴 En vivo".to_string(), format_duration),
            true,
        )
        .field("👤 Solicitado por", format!("<@{}>", requested_by), true);

    if let Some(url) = page_url {
        embed = embed.url(url);
    }

    embed
}

/// Crea el embed de la cola: un campo por elemento y un resumen del resto
pub fn create_queue_embed(listing: &QueueListing, now: Option<&NowPlaying>) -> CreateEmbed {
    let mut description = format!("📊 {} en cola", listing.total());
    if let Some(now) = now {
        description = format!("▶️ Sonando: **{}**\n{}", now.title, description);
    }

    let mut embed = base("📜 Cola de Reproducción", colors::INFO_BLUE).description(description);

    if listing.is_empty() {
        return embed.field("📭 Vacía", "No hay canciones en la cola", false);
    }

    for (index, item) in listing.items.iter().take(MAX_QUEUE_FIELDS).enumerate() {
        embed = embed.field(
            format!("{}. {}", index + 1, truncate(item.reference.as_str(), 200)),
            format!(
                "👤 <@{}> · <t:{}:R>",
                item.requested_by,
                item.added_at.timestamp()
            ),
            false,
        );
    }

    let hidden = listing.remaining + listing.items.len().saturating_sub(MAX_QUEUE_FIELDS);
    if hidden > 0 {
        embed = embed.field("...", format!("... y {} más", hidden), false);
    }

    embed
}

pub fn create_skipped_embed(count: usize) -> CreateEmbed {
    base("⏭️ Saltado", colors::NEUTRAL_GRAY).description(if count == 1 {
        "Se saltó la canción actual".to_string()
    } else {
        format!("Se saltaron {} canciones", count)
    })
}

pub fn create_stopped_embed() -> CreateEmbed {
    base("⏹️ Detenido", colors::NEUTRAL_GRAY)
        .description("Reproducción detenida y cola limpiada")
}

/// Un elemento no se pudo reproducir y se saltó
pub fn create_item_failed_embed(reference: &TrackRef, failure: ItemFailure) -> CreateEmbed {
    base("⚠️ Canción Saltada", colors::WARNING_ORANGE)
        .description(format!("**{}**", truncate(reference.as_str(), 200)))
        .field("Motivo", failure.user_message(), false)
}

pub fn create_queue_finished_embed() -> CreateEmbed {
    base("📭 Cola Terminada", colors::NEUTRAL_GRAY)
        .description("No quedan canciones. Usa `/play` para agregar más")
}

pub fn create_reconnecting_embed(attempt: u32) -> CreateEmbed {
    base("🔄 Reconectando", colors::WARNING_ORANGE)
        .description(format!("Se perdió la conexión de voz. Intento {}...", attempt))
}

pub fn create_reconnected_embed() -> CreateEmbed {
    base("✅ Reconectado", colors::SUCCESS_GREEN).description("Conexión de voz restablecida")
}

pub fn create_reconnect_failed_embed(attempts: u32) -> CreateEmbed {
    let cause = match attempts {
        0 => "No se pudo conectar al canal de voz".to_string(),
        n => format!("No se pudo reconectar tras {} intentos", n),
    };

    base("❌ Sin Conexión", colors::ERROR_RED).description(format!(
        "{}. La cola se conservó; usa `/play` para reanudar",
        cause
    ))
}

pub fn create_stats_embed(stats: &BotStats) -> CreateEmbed {
    use num_format::{Locale, ToFormattedString};

    // Sin fracciones de segundo
    let uptime = Duration::from_secs(stats.uptime.as_secs());

    base("📊 Estadísticas", colors::INFO_BLUE)
        .field("⏱️ Tiempo activo", humantime::format_duration(uptime).to_string(), false)
        .field("🏠 Servidores", stats.guilds.to_formatted_string(&Locale::es), true)
        .field("🎵 Sesiones", stats.sessions.to_formatted_string(&Locale::es), true)
        .field("⚙️ Operaciones en curso", stats.in_flight.to_string(), true)
}

pub fn create_report_embed(
    reporter: UserId,
    guild_id: Option<GuildId>,
    message: &str,
) -> CreateEmbed {
    base("🐞 Reporte de Error", colors::ERROR_RED)
        .description(truncate(message, 4000))
        .field("👤 Usuario", format!("<@{}> ({})", reporter, reporter), true)
        .field(
            "🏠 Servidor",
            guild_id.map_or_else(|| "DM".to_string(), |id| id.to_string()),
            true,
        )
}

/// Crea un embed de ayuda general
pub fn create_help_embed() -> CreateEmbed {
    base("🎵 Queuebird - Ayuda", colors::INFO_BLUE)
        .description("Bot de música por servidor con cola, playlists y reconexión automática")
        .field(
            "🎵 Reproducción",
            "• `/play <url>` - Reproduce una URL o búsqueda (suena a continuación)\n\
            • `/play <playlist>` - Agrega una playlist de YouTube al final de la cola\n\
            • `/skip [num_songs]` - Salta canciones\n\
            • `/stop` - Detiene, limpia la cola y sale del canal",
            false,
        )
        .field(
            "📜 Información",
            "• `/queue` - Muestra la cola\n\
            • `/nowplaying` - Muestra la canción actual\n\
            • `/stats` - Estadísticas del bot",
            false,
        )
        .field(
            "🐞 Soporte",
            "• `/reportanerror <mensaje>` - Envía un reporte al dueño del bot",
            false,
        )
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    base(format!("❌ {}", title), colors::ERROR_RED).description(description)
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    base(format!("✅ {}", title), colors::SUCCESS_GREEN).description(description)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::QueueItem;
    use pretty_assertions::assert_eq;

    fn listing(shown: usize, remaining: usize) -> QueueListing {
        QueueListing {
            items: (0..shown)
                .map(|i| QueueItem::new(TrackRef::Query(format!("t{i}")), UserId::new(1)))
                .collect(),
            remaining,
        }
    }

    fn field_names(embed: CreateEmbed) -> Vec<String> {
        let json = serde_json::to_value(embed).unwrap();
        json["fields"]
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .map(|f| f["name"].as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_queue_embed_caps_fields_and_summarizes_rest() {
        let names = field_names(create_queue_embed(&listing(24, 6), None));

        assert_eq!(names.len(), 25);
        assert_eq!(names[0], "1. t0");
        assert_eq!(names[23], "24. t23");
        assert_eq!(names[24], "...");
    }

    #[test]
    fn test_queue_embed_without_overflow() {
        let names = field_names(create_queue_embed(&listing(2, 0), None));
        assert_eq!(names, vec!["1. t0", "2. t1"]);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(65)), "1:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_reconnect_failed_wording() {
        let json = serde_json::to_value(create_reconnect_failed_embed(0)).unwrap();
        assert!(json["description"]
            .as_str()
            .unwrap()
            .starts_with("No se pudo conectar al canal de voz."));

        let json = serde_json::to_value(create_reconnect_failed_embed(8)).unwrap();
        assert!(json["description"].as_str().unwrap().contains("tras 8 intentos"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("corto", 10), "corto");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
