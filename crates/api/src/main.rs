use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use mailqueue_api::app::{self, AppServices, SharedStore};
use mailqueue_infra::config::{AppConfig, QueueBackend};
use mailqueue_infra::mail::{EmailSender, SmtpMailer, TemplateRegistry};
use mailqueue_infra::queue::{EmailQueue, InMemoryQueueStore, QueueWorker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mailqueue_observability::init();

    let config = AppConfig::from_env().context("failed to load configuration")?;

    let registry = TemplateRegistry::builtin().context("failed to load email templates")?;
    info!(templates = ?registry.names(), "email templates loaded");

    let mailer = SmtpMailer::new(&config.smtp).context("failed to configure SMTP mailer")?;
    let store = build_store(&config).await?;
    let queue = EmailQueue::new(store);

    let worker = QueueWorker::new(
        queue.clone(),
        EmailSender::new(Arc::new(registry), mailer),
        WorkerConfig::default(),
    )
    .spawn()
    .context("failed to spawn email worker")?;

    let app = app::build_app(Arc::new(AppServices::new(queue)));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("stopping email worker");
    tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .context("email worker did not stop cleanly")?;
    info!("shutdown complete");
    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<SharedStore> {
    match config.queue_backend {
        QueueBackend::Memory => {
            warn!("using in-memory queue store; queued emails are lost on restart");
            let store: SharedStore = InMemoryQueueStore::arc();
            Ok(store)
        }
        QueueBackend::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &AppConfig) -> anyhow::Result<SharedStore> {
    use mailqueue_infra::queue::RedisQueueStore;

    let url = config.cache.redis_url();
    let store = tokio::task::spawn_blocking(move || RedisQueueStore::connect(url))
        .await?
        .context("failed to connect to redis")?;

    info!(
        host = %config.cache.host,
        port = config.cache.port,
        db = config.cache.database,
        "connected to redis"
    );
    let store: SharedStore = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &AppConfig) -> anyhow::Result<SharedStore> {
    anyhow::bail!("built without redis support; set QUEUE_BACKEND=memory")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
