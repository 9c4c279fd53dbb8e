use groupledger_server::notify::Notifications;
use groupledger_server::{server, storage, sweeper};
mod cli;

use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    use clap::Parser;
    let args = cli::Cli::parse();

    // Console-only logging with env-driven level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = match server::AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error=%e, "Failed to load config");
            std::process::exit(2);
        }
    };

    if let Some(cli::Command::Token { user, ttl_days }) = &args.command {
        match server::auth::issue_token(&config.jwt_secret, user, *ttl_days) {
            Ok(token) => println!("{token}"),
            Err(e) => {
                eprintln!("Token error: {:?}", e);
                std::process::exit(2);
            }
        }
        return;
    }

    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "data/ledger.db".into());
    // Ensure data dir exists when using default
    if let Some(parent) = std::path::Path::new(&db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        let _ = std::fs::create_dir_all(parent);
    }
    let store = match storage::Store::connect_sqlite(&db_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error=%e, path=%db_path, "Failed to connect DB");
            std::process::exit(3);
        }
    };

    if let Err(e) = store.seed_groups(&config.groups).await {
        tracing::error!(error=%e, "Failed to seed groups");
        std::process::exit(4);
    }

    let notifications = Notifications::default();

    if let Some(cli::Command::Sweep) = args.command {
        let auctions = sweeper::run_auction_sweep(&store, &notifications).await;
        let tasks = sweeper::run_task_sweep(&store, &notifications).await;
        notifications.flush().await;
        tracing::info!(?auctions, ?tasks, "sweep finished");
        if auctions.failed + tasks.failed > 0 {
            std::process::exit(5);
        }
        return;
    }

    // Decide listen port: env PORT overrides config.listen_port, default 5151
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .or(config.listen_port)
        .unwrap_or(5151);

    let shutdown_token = CancellationToken::new();
    let sweepers = sweeper::Sweepers::start(
        store.clone(),
        notifications.clone(),
        config.sweeper.schedule(),
        &shutdown_token,
    );

    let state = server::AppState::new(config, store, notifications.clone());
    let app = server::router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    tracing::info!(%addr, "Starting server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error=%e, %addr, "Failed to bind listener");
            std::process::exit(6);
        }
    };

    let shutdown_token_for_server = shutdown_token.clone();
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_token_for_server.cancelled_owned())
            .await
    });

    shutdown_signal().await;
    tracing::info!("shutdown: initiating graceful stop");
    shutdown_token.cancel();
    match tokio::time::timeout(std::time::Duration::from_secs(3), &mut server_task).await {
        Ok(join_res) => match join_res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(%err, "server error"),
            Err(e) => tracing::error!(error=%e, "server task join error"),
        },
        Err(_) => {
            tracing::warn!("shutdown: forcing server abort due to timeout");
            server_task.abort();
        }
    }
    // In-flight sweep transactions finish before the process exits.
    sweepers.shutdown().await;
    notifications.flush().await;
    tracing::info!("shutdown: complete");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(i), Ok(t)) => (i, t),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error=%e, "shutdown: signal handlers unavailable, using Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown: received Ctrl+C");
    }
}
