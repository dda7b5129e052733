use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};

use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use webhook_dispatcher::{
    audit::{LogStore, SqliteLogStore},
    channel::{Channel, SqliteChannel},
    dispatcher::{
        CircuitBreakerRegistry, DeliveryExecutor, DeliveryLogWriter, Dispatcher, DispatcherConfig,
        ReqwestHttpClient, WorkerConfig,
    },
    handlers::router,
    producer::Producer,
    state::AppState,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    All,
    Producer,
    Consumer,
}

impl Role {
    fn from_env() -> Self {
        match std::env::var("DISPATCHER_ROLE")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "producer" => Role::Producer,
            "consumer" => Role::Consumer,
            "" | "all" => Role::All,
            other => {
                warn!(role = other, "unknown DISPATCHER_ROLE, running all roles");
                Role::All
            }
        }
    }

    fn produces(self) -> bool {
        matches!(self, Role::All | Role::Producer)
    }

    fn consumes(self) -> bool {
        matches!(self, Role::All | Role::Consumer)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:dispatcher.db?mode=rwc".to_string());
    let bind_addr = std::env::var("DISPATCHER_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let audit_api_token = std::env::var("DISPATCHER_AUDIT_API_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty());
    let role = Role::from_env();
    let config = DispatcherConfig::from_env();

    info!(
        ?role,
        topic = %config.topic,
        consumer_group = %config.consumer_group,
        partitions = config.partitions,
        circuit = %config.circuit_name,
        "starting webhook dispatcher"
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let channel: Arc<dyn Channel> = Arc::new(SqliteChannel::new(
        pool.clone(),
        config.topic.clone(),
        config.consumer_group.clone(),
        config.partitions,
    ));
    let log_store: Arc<dyn LogStore> = Arc::new(SqliteLogStore::new(pool.clone()));
    let circuits = Arc::new(CircuitBreakerRegistry::new(config.circuit.clone()));

    let cancel = CancellationToken::new();
    let workers = if role.consumes() {
        let breaker = circuits.breaker(&config.circuit_name).await;
        let http = Arc::new(ReqwestHttpClient::new(config.http_timeout)?);
        let executor = Arc::new(DeliveryExecutor::new(
            breaker,
            http,
            DeliveryLogWriter::new(Arc::clone(&log_store)),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&channel),
            executor,
            WorkerConfig::from(&config),
        );
        Some(dispatcher.spawn(cancel.clone()))
    } else {
        None
    };

    let producer = role
        .produces()
        .then(|| Arc::new(Producer::new(Arc::clone(&channel))));
    let state = AppState {
        producer,
        log_store,
        circuits,
        audit_api_token,
    };

    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http listener ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    if let Some(workers) = workers
        && let Err(err) = workers.shutdown(SHUTDOWN_TIMEOUT).await
    {
        error!(error = %err, "workers did not stop cleanly");
    }

    pool.close().await;
    info!("webhook dispatcher stopped");

    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,webhook_dispatcher=debug"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()?;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to listen for ctrl-c");
                cancel.cancelled().await;
                return;
            }
            info!("shutdown signal received");
        }
        () = cancel.cancelled() => {}
    }
    cancel.cancel();
}
