use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chainwatch_common::config::{MonitorConfig, RuntimeSettings};
use chainwatch_common::db;
use chainwatch_common::metrics::Metrics;
use chainwatch_common::retry::Attempt;
use chainwatch_common::types::Destination;
use chainwatch_engine::{CursorStore, FileCursorStore, PgCursorStore};
use chainwatch_explorer::{Explorer, HttpExplorerClient};
use chainwatch_monitor::{AddressChecker, BalanceReporter, Scheduler, SchedulerConfig};
use chainwatch_notifier::{DeliveryError, Dispatcher, NotificationSender, TelegramBotApi};

const DEFAULT_LOG_FILTER: &str =
    "chainwatch_monitor=info,chainwatch_engine=info,chainwatch_notifier=info,chainwatch_explorer=info";

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match RuntimeSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid environment: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(settings.json_logs);

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Chainwatch failed to start");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(settings: RuntimeSettings) -> anyhow::Result<()> {
    tracing::info!("Chainwatch starting...");

    // Load configuration
    let config = MonitorConfig::load(&settings.config_path)?
        .with_token_override(settings.telegram_bot_token.clone());
    config.validate()?;
    let addresses = config.monitored_addresses();

    for address in addresses.iter().filter(|a| !a.is_deliverable()) {
        tracing::warn!(
            address = %address.address,
            nickname = %address.nickname,
            "Address has no telegram destination and no default chat is configured; its events will not be delivered"
        );
    }

    // Metrics are a no-op unless a port is configured
    let shutdown = CancellationToken::new();
    let (metrics, metrics_server) = match config.prometheus.port {
        Some(port) => {
            let metrics = Metrics::new()?;
            let listener = chainwatch_api::bind(port).await?;
            let server = tokio::spawn(chainwatch_api::serve(
                listener,
                metrics.clone(),
                shutdown.clone(),
            ));
            (metrics, Some(server))
        }
        None => (Metrics::disabled(), None),
    };

    // Cursor store
    let store: Arc<dyn CursorStore> = match &settings.database_url {
        Some(url) => {
            let pool = db::connect_cursor_db(url, settings.db_max_connections).await?;
            tracing::info!("Cursor store: PostgreSQL");
            Arc::new(PgCursorStore::new(pool))
        }
        None => {
            let store = FileCursorStore::open(&settings.cursor_state_path).await?;
            tracing::info!(path = %store.path().display(), "Cursor store: JSON file");
            Arc::new(store)
        }
    };

    // Explorer, probed once before the first tick
    let client = HttpExplorerClient::new(&config.explorer.url, settings.explorer_timeout)?;
    let explorer = Explorer::from_config(&config.explorer, Arc::new(client), metrics.clone());
    explorer.probe().await?;
    tracing::info!(url = %config.explorer.url, "Explorer reachable");

    // Telegram
    let sender: Arc<dyn NotificationSender> = match &config.telegram.bot_token {
        Some(token) => Arc::new(TelegramBotApi::new(
            &settings.telegram_api_url,
            token,
            settings.telegram_timeout,
        )?),
        None => Arc::new(NoBot),
    };
    let dispatcher = Arc::new(
        Dispatcher::new(sender, metrics.clone())
            .with_max_attempts(settings.delivery_max_attempts)
            .with_concurrency(settings.dispatch_concurrency),
    );

    let reporter = config.monitoring.daily_report_hour.map(|hour| {
        BalanceReporter::new(
            explorer.clone(),
            dispatcher.clone(),
            config.balance_report_addresses(),
            hour,
        )
    });

    let checker = Arc::new(AddressChecker::new(
        explorer,
        store,
        dispatcher,
        config.monitoring.lookback(),
        metrics.clone(),
    ));

    let mut scheduler = Scheduler::new(
        checker,
        addresses,
        SchedulerConfig {
            interval: config.monitoring.check_interval(),
            check_concurrency: settings.check_concurrency,
            shutdown_grace: settings.shutdown_grace,
        },
        metrics,
    );
    if let Some(reporter) = reporter {
        scheduler = scheduler.with_balance_report(reporter);
    }
    let handle = scheduler.start();

    shutdown_signal().await;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    handle.stop().await;
    shutdown.cancel();
    if let Some(server) = metrics_server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %format!("{e:#}"), "Metrics server exited with error"),
            Err(e) => tracing::error!(error = %e, "Metrics server task failed"),
        }
    }

    tracing::info!("Chainwatch stopped.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Sender used when no bot token is configured. Validation guarantees no
/// address is deliverable in that case, so it is never reached in practice.
struct NoBot;

#[async_trait::async_trait]
impl NotificationSender for NoBot {
    async fn send(&self, destination: &Destination, _text: &str) -> Attempt<(), DeliveryError> {
        Attempt::Permanent(DeliveryError::Other(format!(
            "no bot token configured for {}",
            destination
        )))
    }
}
