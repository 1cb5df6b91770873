/**
 * UPTIME KERNEL - boot binary
 *
 * ROLE: wires config, journal, directory and probe transport into the
 * scheduler, rollup job and retention loop, then serves the HTTP surface.
 * Ctrl-C / SIGTERM stops the server first, then the background tasks.
 */

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uptime_kernel::config::load_config;
use uptime_kernel::http::{build_router, AppState};
use uptime_kernel::scheduler::SchedulerSettings;
use uptime_kernel::state::{new_state, snapshot};
use uptime_kernel::transport::transport_for;
use uptime_kernel::{
    retention, ConfigDirectory, HealthTracker, HostDirectory, JournalStore, ProbeScheduler, RollupJob, SharedStore,
    UptimeAggregator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uptime_kernel=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = new_state(load_config().await);
    let conf = snapshot(&cfg);
    tracing::info!(hosts = conf.hosts.len(), data_dir = %conf.storage.data_dir.display(), "config loaded");

    let store: SharedStore = Arc::new(
        JournalStore::open(conf.storage.data_dir.clone())
            .with_context(|| format!("opening journal in {}", conf.storage.data_dir.display()))?,
    );
    let directory: Arc<dyn HostDirectory> = Arc::new(ConfigDirectory::new(cfg.clone()));
    let health = HealthTracker::new();

    let scheduler = Arc::new(ProbeScheduler::new(
        directory.clone(),
        Arc::from(transport_for(&conf.probe)),
        store.clone(),
        SchedulerSettings::from(&conf.probe),
        health.clone(),
    ));
    let aggregator = Arc::new(UptimeAggregator::new(store.clone(), directory));
    let rollups = Arc::new(RollupJob::new(aggregator.clone(), conf.rollup.manual_trigger, health.clone()));

    let cancel = CancellationToken::new();
    let mut tasks = vec![tokio::spawn(scheduler.run(cancel.child_token()))];

    if conf.rollup.enabled {
        tasks.push(tokio::spawn(rollups.clone().run_daily(
            conf.rollup.run_at_time(),
            conf.rollup.catch_up_on_start,
            cancel.child_token(),
        )));
    } else {
        tracing::warn!("scheduled daily rollups disabled");
    }

    tasks.push(tokio::spawn(retention::run(
        store,
        conf.storage.sample_retention_days,
        Duration::from_secs(conf.storage.retention_sweep_secs),
        cancel.child_token(),
    )));

    let app = build_router(AppState { aggregator, rollups, health });

    let addr: SocketAddr = conf
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid http.bind address {:?}", conf.http.bind))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    tracing::info!("server stopped, waiting for background tasks");
    cancel.cancel();
    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(10), task).await.is_err() {
            tracing::warn!("background task did not stop in time");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
