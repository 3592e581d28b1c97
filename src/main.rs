use anyhow::Result;
use metricsd::*;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let store = Arc::new(
        store::SqliteStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.busy_timeout,
        )
        .await?,
    );
    store.init().await?;

    let accessor = Arc::new(accessor::MetricsAccessor::new(
        store.clone(),
        app_config.query.forgiveness,
    ));
    let service = Arc::new(staging::Service::new(
        accessor,
        app_config.staging.flush_timeout,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let cleanup_handle = staging::spawn_cleanup(
        service.clone(),
        app_config.staging.cleanup_interval,
        shutdown_rx.clone(),
    );

    let rollup_handle = if app_config.rollup.enabled {
        let reaggregator = Arc::new(reaggregator::Reaggregator::new(
            store.clone(),
            app_config.rollup.buckets.clone(),
        ));
        Some(reaggregator::spawn(
            reaggregator,
            app_config.rollup.schedule(),
            shutdown_rx.clone(),
        ))
    } else {
        tracing::info!("rollups disabled");
        None
    };

    let app = routes::app(service, &app_config);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = cleanup_handle.await;
    if let Some(handle) = rollup_handle {
        let _ = handle.await;
    }

    Ok(())
}
