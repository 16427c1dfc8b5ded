use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

/// How often idle per-user rate limiter entries are discarded.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    // The subscriber needs `[logging] json`, so loading reports its notices
    // back instead of logging them directly.
    let (mut config, notices) = config::Config::load(&args.config)?;
    init_tracing(config.logging.json);
    for notice in &notices {
        notice.log();
    }

    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    ensure_data_dirs(&config);

    let db = parley_db::create_pool(&config.database.url, config.database.max_connections).await?;
    parley_db::run_migrations(&db).await?;

    let state = parley_core::AppState::new(db, config.app_config());

    let limiter = state.event_limiter.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        tick.tick().await;
        loop {
            tick.tick().await;
            limiter.prune();
        }
    });

    let app = parley_api::build_router()
        .merge(parley_ws::gateway_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;

    print_startup_banner(&config);

    let shutdown_signal = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
        println!();
        tracing::info!("Shutting down (ctrl-c)...");
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley=info,tower_http=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Create the parent directory of a file-backed SQLite database.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!("Could not create directory '{}': {}", parent.display(), e);
                }
            }
        }
    }
}

fn print_startup_banner(config: &config::Config) {
    let limit = match config.gateway.max_events_per_minute {
        0 => "unlimited".to_string(),
        n => format!("{n} events/min per user"),
    };
    println!();
    println!("  Parley messaging gateway");
    println!();
    println!("  Listening:   http://{}", config.server.bind_address);
    println!("  Gateway:     ws://{}/gateway", config.server.bind_address);
    println!("  Database:    {}", config.database.url);
    println!("  Rate limit:  {}", limit);
    println!(
        "  Heartbeat:   {}s (evict superseded: {})",
        config.gateway.heartbeat_interval_secs, config.gateway.evict_superseded_sessions
    );
    println!();
}
