use autobid::bootstrap::{build_driver, discover_identity};
use autobid::cli::{Cli, Commands};
use autobid::config::{AppConfig, LoggingConfig};
use autobid::engine::{BidEngine, SystemClock};
use autobid::error::Result;
use autobid::session::ControlSession;
use autobid::status::{LogReporter, StatusReporter};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config.logging);

    match cli.command() {
        Commands::Identify => run_identify(&config, cli.paper).await,
        Commands::Run => run_agent(config, cli.paper).await,
    }
}

/// Print the listing identity the agent would register with
async fn run_identify(config: &AppConfig, force_paper: bool) -> Result<()> {
    let reporter = LogReporter;
    let driver = build_driver(&config.driver, force_paper).await?;
    let identity = discover_identity(
        &driver,
        config.driver.identify_poll(),
        config.driver.identify_max_attempts,
        &reporter,
    )
    .await?;

    println!("item id:   {}", identity.id);
    println!("image ref: {}", identity.image_ref);
    Ok(())
}

async fn run_agent(config: AppConfig, force_paper: bool) -> Result<()> {
    info!("Starting autobid agent");
    let reporter: Arc<dyn StatusReporter> = Arc::new(LogReporter);

    let driver = build_driver(&config.driver, force_paper).await?;
    let identity = discover_identity(
        &driver,
        config.driver.identify_poll(),
        config.driver.identify_max_attempts,
        reporter.as_ref(),
    )
    .await?;

    let engine = BidEngine::new(driver, Arc::new(SystemClock), reporter.clone());
    let (session, handle) =
        ControlSession::new(config.controller.clone(), identity, engine.clone(), reporter);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let session_task = tokio::spawn(session.run(shutdown_tx.subscribe()));

    shutdown_signal().await;
    info!(link = %handle.link_state(), "Shutting down...");

    engine.stop();
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(Duration::from_secs(5), session_task).await {
        Ok(Ok(())) => info!("Shutdown complete"),
        Ok(Err(e)) => error!("Control session task failed: {}", e),
        Err(_) => warn!("Control session did not stop in time"),
    }
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},autobid=debug", config.level)));

    // `rolling::daily` panics if it cannot create the first file, so check writability first
    let file_layer = config.dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir, e
            );
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".autobid_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "autobid.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Lives for the whole process
                Box::leak(Box::new(guard));
                eprintln!("Logging to: {}/autobid.log", log_dir);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let (json_layer, console_layer) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
