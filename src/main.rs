use std::sync::Arc;

use anyhow::Context;
use chatroom::{
    AppState,
    auth::AuthState,
    bots::{BotCommandParser, BotDispatcher, BotRegistry, StockBot},
    config::{BotQueueKind, Config, LogFormat},
    hub::{Hub, HubHandle},
    queue::{BotWorker, MemoryQueue, MessageQueue, QueueBridge},
    store::ChatStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let store = ChatStore::connect(&config.database_url)
        .await
        .with_context(|| format!("unable to open {}", config.database_url))?;
    store.migrate().await?;

    let token = CancellationToken::new();
    let (hub, hub_handle) = Hub::new(token.clone());
    tokio::spawn(hub.run());

    let bridge = match config.bot_queue {
        BotQueueKind::Memory => Some(start_bots(&config, &hub_handle, &token).await?),
        BotQueueKind::None => {
            warn!("no bot queue configured, bot commands will be answered with an error");
            None
        }
    };

    let state = AppState {
        store,
        auth: AuthState::new(&config.jwt_secret, config.jwt_ttl),
        hub: hub_handle,
        bots: BotDispatcher::new(BotCommandParser::new(config.bot_symbol.as_str()), bridge),
        client_config: Arc::new(config.client.clone()),
        history_limit: config.history_limit,
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "chat server listening");

    axum::serve(listener, chatroom::app(state))
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await?;

    token.cancel();
    info!("chat server stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("debug"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

/// Wires the in-process broker: a worker answering commands and a bridge
/// feeding the replies back into the hub.
async fn start_bots(
    config: &Config,
    hub: &HubHandle,
    token: &CancellationToken,
) -> anyhow::Result<QueueBridge> {
    let queue: Arc<dyn MessageQueue> = Arc::new(MemoryQueue::default());
    let bridge = QueueBridge::new(
        queue.clone(),
        config.request_queue.as_str(),
        config.response_queue.as_str(),
    )
    .await?;

    let registry = BotRegistry::default().with(StockBot::new(config.stock_api_url.as_str())?);
    let worker = BotWorker::new(
        queue,
        config.request_queue.as_str(),
        config.response_queue.as_str(),
        registry,
    );

    let worker_token = token.clone();
    tokio::spawn(async move {
        if let Err(err) = worker.run(worker_token).await {
            error!(%err, "bot worker failed");
        }
    });

    let consumer = bridge.clone();
    let hub = hub.clone();
    let bridge_token = token.clone();
    tokio::spawn(async move {
        if let Err(err) = consumer.run(hub, bridge_token).await {
            error!(%err, "bot response consumer failed");
        }
    });

    Ok(bridge)
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("shutting down");
                token.cancel();
            }
            Err(err) => {
                error!(%err, "unable to listen for shutdown signal");
                token.cancelled().await;
            }
        },
        () = token.cancelled() => {}
    }
}
