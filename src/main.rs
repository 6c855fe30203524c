use anyhow::Result;
use ats_backend::{
    build_service,
    config::{AppConfig, RunMode},
    db,
    routes::routes,
};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ats_backend=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting ats-backend with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url).await?;

    // The schema is idempotent, so every mode applies it.
    db::run_migrations(&pool).await?;
    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        pool.close().await;
        return Ok(());
    }

    let service = build_service(pool.clone(), &cfg.upload_dir, cfg.max_file_size).await?;
    tracing::info!(
        cv_dir = %service.files().paths().cv_dir.display(),
        temp_dir = %service.files().paths().temp_dir.display(),
        max_file_size = cfg.max_file_size,
        "CV storage ready"
    );

    if let RunMode::Reconcile { min_age } = mode {
        let report = service.reconcile(min_age).await?;
        tracing::info!(
            removed_cvs = report.removed_cvs.len(),
            removed_temp = report.removed_temp.len(),
            skipped_recent = report.skipped_recent,
            "Reconciliation complete."
        );
        pool.close().await;
        return Ok(());
    }

    let app = routes::app(service, cfg.is_development());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("Database pool closed");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }

    tracing::info!("Shutting down gracefully...");
}
