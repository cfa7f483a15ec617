use anyhow::Context;
use clap::Parser;
use repo_metadata::application::services::repo_metadata::RepoMetadataService;
use repo_metadata::infrastructures::adapters::primary::web::{AppState, create_router};
use repo_metadata::infrastructures::adapters::secondary::external_apis::github::GitHubApiAdapter;
use repo_metadata::infrastructures::config::Config;
use repo_metadata::infrastructures::telemetry;
use std::sync::Arc;
use tracing::{info, info_span};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let telemetry = telemetry::init().context("Failed to initialize tracing")?;

    let (service, app) = info_span!("initialize").in_scope(|| -> anyhow::Result<_> {
        info!("Application starting");

        // Build dependencies
        let github_api_adapter = Arc::new(
            GitHubApiAdapter::new(&config.github_api_url, config.github_token.clone())
                .context("Failed to create GitHub API client")?,
        );
        let service = Arc::new(RepoMetadataService::new(
            github_api_adapter,
            config.service_config(),
        ));
        let app_state = Arc::new(AppState {
            query: service.clone(),
        });

        Ok((service, create_router(app_state)))
    })?;

    info!(
        "Polling {} repositories of {} every {:?}",
        config.github_repo_type,
        config.github_org,
        service.poll_interval()
    );
    let mut poll_errors = service.start_polling();
    tokio::spawn(async move {
        while let Some(e) = poll_errors.recv().await {
            tracing::error!("Failed to refresh repository metadata: {}", e);
        }
    });

    // Start server
    let addr = config.listen_addr()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    telemetry.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
    info!("Shutdown signal received");
}
