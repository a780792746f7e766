use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use poem::{
    EndpointExt, Route,
    middleware::{AddData, AddDataEndpoint, Cors, CorsEndpoint},
};
use poem_openapi::OpenApiService;

use crate::core::dispatch::MessageDispatcher;
use crate::core::pipeline::RenderPipeline;
use crate::core::renderer::{ChartBackend, ChromeBackend, ChromeOptions};
use crate::core::sink::{FileStore, LocalFileStore};
use crate::core::source::DataSource;
use crate::routes::render::ApiRender;
use crate::settings::Config;

pub mod core;
pub mod error;
pub mod routes;
pub mod schemas;
pub mod settings;

pub struct AppState {
    pub dispatcher: Arc<MessageDispatcher>,
}

impl AppState {
    /// Wires the pipeline from its collaborators using `config` for the knobs.
    pub fn new(
        config: &Config,
        source: Arc<dyn DataSource>,
        backend: Arc<dyn ChartBackend>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        let pipeline = Arc::new(
            RenderPipeline::new(
                source,
                backend,
                files,
                config.namespace.clone(),
                config.max_concurrent_renders,
            )
            .with_disk_root(config.file_on_disk_root.as_ref().map(PathBuf::from)),
        );
        let dispatcher = MessageDispatcher::new(
            pipeline,
            Duration::from_millis(config.dedup_window_ms),
            config.allow_binary_messages,
        );
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Headless Chromium drawing, files stored under `files_dir`.
    pub fn with_chrome(config: &Config, source: Arc<dyn DataSource>) -> Self {
        let backend = ChromeBackend::new(ChromeOptions {
            echarts_url: config.echarts_url.clone(),
            chrome_path: config.chrome_path.as_ref().map(PathBuf::from),
            timeout: Duration::from_millis(config.render_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        });
        let files = LocalFileStore::new(&config.files_dir);
        Self::new(config, source, Arc::new(backend), Arc::new(files))
    }
}

pub fn init_openapi_route(
    app_state: Arc<AppState>,
    config: &Config,
) -> CorsEndpoint<AddDataEndpoint<Route, Arc<AppState>>> {
    let prefix = config.prefix.clone().unwrap_or("/".to_string());
    let openapi_route =
        OpenApiService::new(ApiRender, "Chart Render API", "1.0").server(prefix.clone());

    let openapi_json_endpoint = openapi_route.spec_endpoint();
    let ui = openapi_route.swagger_ui();
    Route::new()
        .nest(prefix, openapi_route)
        .nest("/docs", ui)
        .at("openapi.json", openapi_json_endpoint)
        .with(AddData::new(app_state))
        .with(Cors::new())
}
