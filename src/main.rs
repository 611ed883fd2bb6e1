//! replybot - console entry point
//!
//! Wires the session store, rule log, engine and geocode cache together and
//! answers messages read from stdin.

use chrono::Duration;
use replybot::adapter::{self, ConsoleTransport, MessageGate};
use replybot::engine::{MatchingEngine, ScriptEngine};
use replybot::geo::{GeoCache, MapboxGeocoder};
use replybot::learning::RuleLog;
use replybot::orchestrator::EngineFactory;
use replybot::review::ReviewQueue;
use replybot::{session, subroutines, Bot, Config};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async_main());
    // The console reader may still be parked on stdin.
    runtime.shutdown_background();
    result
}

async fn async_main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let default_filter = if config.debug {
        "replybot=debug"
    } else {
        "replybot=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Loaded configuration: data_dir={}, store={:?}",
        config.data_dir.display(),
        config.session_store
    );
    if config.mute {
        info!("Bot replies are muted");
    }

    // SQLite handles and the blocking geocode client are opened off the runtime.
    let bot_config = config.clone();
    let bot = tokio::task::spawn_blocking(move || build_bot(&bot_config)).await??;
    let bot = Arc::new(bot);

    let review = Arc::new(ReviewQueue::new(config.review_capacity));
    let gate = MessageGate::new(bot.clone(), review, "replybot")
        .with_guilds(config.guilds.clone())
        .with_admins(config.admins.clone())
        .with_max_age(Duration::seconds(config.max_message_age_secs))
        .with_mute(config.mute);

    info!("Bot is now running. Press CTRL-C to exit.");
    let mut transport = ConsoleTransport::new();
    let result = tokio::select! {
        result = adapter::run(&mut transport, Arc::new(gate)) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    // The geocode client is blocking and must be dropped off the runtime.
    tokio::task::spawn_blocking(move || drop(bot)).await?;
    result
}

fn build_bot(config: &Config) -> anyhow::Result<Bot> {
    std::fs::create_dir_all(&config.data_dir)?;

    let store = session::create_session_store(config.session_store, &config.session_db_path())?;
    let rules = RuleLog::open(&config.rules_db_path())?;

    let geo = match &config.mapbox_token {
        Some(token) => {
            let provider = Box::new(MapboxGeocoder::new(token.clone()));
            Some(Arc::new(GeoCache::open(&config.geo_db_path(), provider)?))
        }
        None => {
            warn!("MAPBOX_TOKEN not set, distance lookups disabled");
            None
        }
    };

    let brain_dir = config.brain_dir.clone();
    let engine_store = store.clone();
    let factory: EngineFactory = Box::new(move || {
        let mut engine = ScriptEngine::new(engine_store.clone());
        if brain_dir.is_dir() {
            engine.load_directory(&brain_dir)?;
        } else {
            warn!("Brain directory {} not found, starting with learned rules only", brain_dir.display());
        }
        subroutines::register(&mut engine, geo.clone());
        info!("Loaded {} rules", engine.rule_count());
        Ok(Box::new(engine) as Box<dyn MatchingEngine>)
    });

    let bot = Bot::new(
        store,
        rules,
        factory,
        Duration::seconds(config.context_window_secs),
    )?;
    Ok(bot)
}
