use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use autorename::bot::{self, BotState};
use autorename::config::Config;
use autorename::renamer::{Database, ffmpeg};
use autorename::telegram_log;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "autorename.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let mut bot = Bot::new(&config.telegram_bot_token);
    if let Some(api_url) = &config.api_url {
        bot = bot.set_api_url(api_url.clone());
    }

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("autorename.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting autorename...");
    info!("Loaded config from {config_path}");
    info!("Owner IDs: {:?}", config.owner_ids);
    if !config.force_sub_channels.is_empty() {
        info!("Force-sub channels: {:?}", config.force_sub_channels);
    }

    match ffmpeg::check_ffmpeg(&config.tools).await {
        Ok(version) => info!("Found {}", version),
        Err(e) => warn!("{} (files will be sent without metadata)", e),
    }

    // Leftovers from an interrupted run
    let work_dir = config.work_dir();
    if let Err(e) = std::fs::remove_dir_all(&work_dir)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to clear {:?}: {}", work_dir, e);
    }
    if let Err(e) = std::fs::create_dir_all(&work_dir) {
        error!("Failed to create work directory {:?}: {}", work_dir, e);
        std::process::exit(1);
    }

    let database = match Database::open(&config.database_path()) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open database {:?}: {}", config.database_path(), e);
            std::process::exit(1);
        }
    };

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            me.username().to_string()
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            String::new()
        }
    };

    let state = Arc::new(BotState::new(config, database, bot.clone(), bot_username));
    tokio::spawn(bot::run_premium_expiry(state.clone()));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(bot::handle_message))
        .branch(Update::filter_callback_query().endpoint(bot::handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
