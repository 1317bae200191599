use anyhow::{Context, Result};
use echobot::admin::AdminConsole;
use echobot::discord::Session;
use echobot::shutdown::ShutdownSignal;
use echobot::{health, ConfigSource, RelayEngine};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Set to `json` for one JSON object per log line.
const LOG_FORMAT_VAR: &str = "ECHOBOT_LOG_FORMAT";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

// serenity spawns a task per gateway event. On one thread those tasks run
// in spawn order and reach the fair session queue in that order, so
// messages are relayed in the order they arrived.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    // 1. Configuration. Any problem here is fatal.
    let source = ConfigSource::from_env();
    let config = match source.load() {
        Ok(config) => config,
        Err(e) => {
            error!(source = %source, error = %e, "Invalid configuration, not starting");
            return Err(e).with_context(|| format!("Failed to load configuration from {}", source));
        }
    };

    // 2. Shutdown on SIGINT/SIGTERM
    let shutdown = ShutdownSignal::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    });

    // 3. Liveness endpoint
    if let Some(port) = health::port_from_env() {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, shutdown).await {
                error!(port, error = %e, "Liveness endpoint failed");
            }
        });
    }

    // 4. Relay until shutdown, reconnecting on gateway failures
    let mut engine = RelayEngine::new(&config);
    let mut console = AdminConsole::new(&config, source, shutdown.clone());
    let mut stop = shutdown.subscribe();
    let mut delay = RECONNECT_DELAY;

    info!(
        redirects = engine.index().len(),
        sources = engine.index().source_count(),
        "Echobot starting"
    );

    loop {
        let started = Instant::now();
        let result = match Session::connect(config.token()).await {
            Ok(session) => session.run(&mut engine, &mut console, &shutdown).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => break,
            Err(e) => error!(error = %e, "Discord session ended"),
        }

        if shutdown.is_shutdown() {
            break;
        }
        if started.elapsed() > MAX_RECONNECT_DELAY {
            delay = RECONNECT_DELAY;
        }

        warn!(delay_secs = delay.as_secs(), "Restarting Discord client");
        tokio::select! {
            _ = stop.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }

    info!("Echobot stopped");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
