mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::error::AppError;
pub use self::state::*;
pub use self::types::*;

#[derive(OpenApi)]
#[openapi(
    info(title = "Image Search Engine"),
    paths(
        api::upload_handler,
        api::search_image_handler,
        api::search_text_handler,
        api::status_handler,
    ),
    components(schemas(
        types::UploadForm,
        types::SearchImageForm,
        types::UploadResponse,
        types::SearchImageResponse,
        types::SearchTextResponse,
        types::StatusResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    let images = ServeDir::new(state.data_dir.images());
    let max_upload_size = state.max_upload_size;

    Router::new()
        .route("/upload-folder/", post(api::upload_handler))
        .route("/search-image/", post(api::search_image_handler))
        .route("/search-text/", get(api::search_text_handler))
        .route("/status", get(api::status_handler))
        .route("/metrics", get(api::metrics_handler))
        .nest_service("/images", images)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_size))
        .with_state(state)
}
