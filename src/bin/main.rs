use echarts_render::core::source::MemoryDataSource;
use echarts_render::settings::get_config;
use echarts_render::{AppState, init_openapi_route};
use poem::listener::TcpListener;
use tracing::Level;

use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config()?;

    let log_level: Level = config.log_level.parse().unwrap_or(Level::DEBUG);
    // Logging to File
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(log_level)
        .init();

    tracing::info!("Initializing Chart Render Service...");
    tracing::info!("run with config: {:?}", config);

    let source = MemoryDataSource::from_file(&config.data_file).await?;
    tracing::info!("loaded data snapshot from {}", config.data_file);

    // Init App State
    let app_state = Arc::new(AppState::with_chrome(&config, Arc::new(source)));

    let app = init_openapi_route(app_state.clone(), &config);
    tracing::info!("run server on {}:{}", config.host, config.port);
    poem::Server::new(TcpListener::bind(format!(
        "{}:{}",
        config.host, config.port
    )))
    .run(app)
    .await?;

    Ok(())
}
