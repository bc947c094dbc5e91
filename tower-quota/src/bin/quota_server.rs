use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use quota_limit::NewTask;
use quota_limit::SqliteCounterStore;
use tower_quota::HttpNotifier;
use tower_quota::NotificationDispatcher;
use tower_quota::QuotaEnforcer;
use tower_quota::Settings;
use tower_quota::http::router;
use tower_quota::logging::init_logging;
use tracing::info;

/// Serves the task catalogue and the quota-enforced submission endpoint.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Settings file (yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overrides the settings file
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Notification receiver; pass an empty string to disable notifications
    #[arg(long)]
    notify_url: Option<String>,

    /// Upper bound on one notification attempt, e.g. `5s`
    #[arg(long, value_parser = humantime::parse_duration)]
    notify_timeout: Option<Duration>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(listen) = self.listen {
            settings.listen = listen;
        }
        if let Some(database) = self.database {
            settings.database = database;
        }
        if let Some(url) = self.notify_url {
            settings.notify_url = Some(url);
        }
        if let Some(timeout) = self.notify_timeout {
            settings.notify_timeout = timeout;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    // 1. Open the store
    let store = SqliteCounterStore::open(&settings.database)
        .with_context(|| format!("opening {}", settings.database.display()))?;
    if settings.seed_sample_task {
        if let Some(task) = store.seed_if_empty(&NewTask::sample())? {
            info!(task_id = task.id, "seeded sample task");
        }
    }

    // 2. Wire the enforcer and the optional notification receiver
    let mut enforcer = QuotaEnforcer::new(Arc::new(store));
    match settings.notify_endpoint()? {
        Some(endpoint) => {
            info!(%endpoint, timeout = ?settings.notify_timeout, "notifications enabled");
            let notifier = HttpNotifier::new(endpoint)?;
            enforcer = enforcer.with_dispatcher(NotificationDispatcher::new(
                Arc::new(notifier),
                settings.notify_timeout,
            ));
        }
        None => info!("notifications disabled"),
    }

    // 3. Serve
    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(enforcer)).await?;
    Ok(())
}
