use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, model::id::ApplicationId, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use queuebird::{
    audio::player::AudioPlayer,
    bot::{events::spawn_announcer, voice::SongbirdGateway, QueueBird},
    config::Config,
    sources::{SourceResolver, YouTubeApiClient, YtDlpClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("queuebird=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Queuebird v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Resolución de medios
    let youtube_api = match &config.youtube_api_key {
        Some(key) => Some(YouTubeApiClient::new(key.clone())?),
        None => {
            info!("📋 Sin YOUTUBE_API_KEY: las playlists se expanden con yt-dlp");
            None
        }
    };
    let resolver = Arc::new(SourceResolver::new(
        YtDlpClient::new(config.ytdlp_path.clone()),
        youtube_api,
        config.max_playlist_size,
    ));

    // Voz y orquestación
    let songbird = Songbird::serenity();
    let gateway = Arc::new(SongbirdGateway::new(
        songbird.clone(),
        reqwest::Client::new(),
        config.default_volume,
    ));
    let player = Arc::new(AudioPlayer::new(config.playback(), resolver, gateway));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Construir cliente
    let handler = QueueBird::new(config.clone(), player.clone());
    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let announcer = spawn_announcer(client.http.clone(), &player);

    // Manejar shutdown graceful: soltar todas las conexiones antes de salir
    let shard_manager = client.shard_manager.clone();
    let shutdown_player = player.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_player.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    announcer.abort();
    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("yt-dlp no disponible en '{}'", config.ytdlp_path);
    }
}
