use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filedrop::{
    api,
    cleaner::Cleaner,
    config::{Config, MetadataStore},
    data::{DataBackend, LocalDataBackend, StreamBackend},
    metadata::{FsMetadataBackend, MetadataBackend, RedbMetadataBackend},
    service::UploadService,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "filedrop starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize the metadata backend
    let metadata: Arc<dyn MetadataBackend> = match config.metadata_store {
        MetadataStore::Redb => {
            info!("Using redb metadata backend at: {}", config.data_dir);
            Arc::new(RedbMetadataBackend::open(&config.data_dir)?)
        }
        MetadataStore::Fs => {
            info!("Using filesystem metadata backend at: {}", config.data_dir);
            Arc::new(FsMetadataBackend::new(&config.data_dir)?)
        }
    };

    // Initialize the data backends
    let data: Arc<dyn DataBackend> = Arc::new(LocalDataBackend::new(&config.files_dir)?);
    info!("Using local data backend at: {}", config.files_dir);

    let stream_data: Option<Arc<dyn DataBackend>> = if config.enable_streaming {
        Some(Arc::new(StreamBackend::new(Duration::from_secs(
            config.stream_timeout,
        ))))
    } else {
        None
    };

    let service = UploadService::new(
        Arc::clone(&metadata),
        Arc::clone(&data),
        stream_data,
        config.default_ttl,
        config.max_ttl,
    );

    let cleaner = Arc::new(Cleaner::new(
        Arc::clone(&metadata),
        Arc::clone(&data),
        Duration::from_secs(config.clean_min_interval),
        Duration::from_secs(config.clean_max_interval),
    ));

    // Start the background cleaning routine
    let cleaner_handle = if config.auto_clean {
        Some(tokio::spawn(Arc::clone(&cleaner).run()))
    } else {
        info!("Automatic cleaning is disabled");
        None
    };

    // Create shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        service,
        cleaner,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on: {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down background tasks");
    if let Some(handle) = cleaner_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
