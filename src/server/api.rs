use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum_typed_multipart::{TypedMultipart, TypedMultipartError};
use indicatif::ProgressBar;
use log::{error, info};
use rand::distr::{Alphanumeric, SampleString};
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::ImageIndex;
use crate::config::{MAX_TOP_K, QUERY_PREFIX};
use crate::dataset::{
    allowed_image, clear_dataset_and_index, extract_zip, is_zip_name, remove_query_images,
    rewrite_path,
};
use crate::metrics::{self, SearchKind};

/// 将查询参数的解析错误转换为 JSON 格式的错误
fn query_params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query.map(|Query(query)| query).map_err(|e| AppError::new(e.status(), e.body_text()))
}

/// 将表单的解析错误转换为 JSON 格式的错误
fn multipart_form<T>(
    data: std::result::Result<TypedMultipart<T>, TypedMultipartError>,
) -> Result<T> {
    data.map(|TypedMultipart(data)| data).map_err(|e| AppError::new(e.get_status(), e))
}

fn check_top_k(top_k: usize) -> Result<usize> {
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(AppError::bad_request(format!("top_k must be between 1 and {MAX_TOP_K}")));
    }
    Ok(top_k)
}

/// 上传 zip 数据集，删除旧的数据集和索引后重新构建索引
#[utoipa::path(
    post,
    path = "/upload-folder/",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = UploadResponse),
        (status = 400, description = "不是 zip 文件或无法解压"),
        (status = 500, description = "索引构建失败"),
    )
)]
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    data: std::result::Result<TypedMultipart<UploadRequest>, TypedMultipartError>,
) -> Result<Json<UploadResponse>> {
    let data = multipart_form(data)?;
    let file_name = data.file.metadata.file_name.as_deref().unwrap_or_default();
    if !is_zip_name(file_name) {
        return Err(AppError::bad_request("Only .zip files allowed."));
    }

    // NOTE: 构建期间一直持有写锁，搜索请求会等待构建完成
    let mut lock = state.index.write().await;
    *lock = None;
    metrics::set_indexed_images(0);

    info!("正在清空旧的数据集和索引");
    block_in_place(|| clear_dataset_and_index(&state.data_dir))?;

    let images = state.data_dir.images();
    block_in_place(|| extract_zip(&data.file.contents, &images))
        .map_err(|e| AppError::bad_request(format!("Invalid zip file: {e}")))?;

    let start = Instant::now();
    let mut embedder = state.embedder.lock().await;
    let index = block_in_place(|| {
        ImageIndex::build(
            &images,
            state.data_dir.index(),
            embedder.as_mut(),
            state.embed.batch_size,
            &state.index_opts,
            &ProgressBar::hidden(),
        )
    })
    .map_err(|e| {
        error!("索引构建失败: {e:?}");
        AppError::internal(format!("Index build failed: {e}"))
    })?;
    let elapsed = start.elapsed().as_secs_f32();
    info!("索引构建完成，共 {} 张图片，耗时 {:.2}s", index.len(), elapsed);
    metrics::observe_build(elapsed);
    metrics::set_indexed_images(index.len());

    let total_images = index.len();
    *lock = Some(index);

    Ok(Json(UploadResponse { message: "Index created".to_string(), total_images }))
}

/// 上传一张查询图片，返回查询图片的 URL 和相似图片的 URL
#[utoipa::path(
    post,
    path = "/search-image/",
    params(TopKQuery),
    request_body(content = SearchImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchImageResponse),
        (status = 400, description = "参数或图片格式错误"),
        (status = 404, description = "尚未上传数据集"),
    )
)]
pub async fn search_image_handler(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<TopKQuery>, QueryRejection>,
    data: std::result::Result<TypedMultipart<SearchImageRequest>, TypedMultipartError>,
) -> Result<Json<SearchImageResponse>> {
    let top_k = check_top_k(query_params(query)?.top_k)?;
    let data = multipart_form(data)?;

    let file_name = data.file.metadata.file_name.as_deref().unwrap_or_default();
    if !allowed_image(file_name) {
        return Err(AppError::bad_request("Invalid image format."));
    }

    let index = state.loaded_index().await?;

    block_in_place(|| image::load_from_memory(&data.file.contents))
        .map_err(|e| AppError::bad_request(format!("Invalid image file: {e}")))?;

    let start = Instant::now();

    // 从删除旧查询图片到计算完向量期间必须持有模型锁
    let mut embedder = state.embedder.lock().await;

    let images = state.data_dir.images();
    let queries = state.data_dir.queries();
    block_in_place(|| remove_query_images(&queries));
    let ext = file_name.rsplit('.').next().unwrap_or("jpg").to_lowercase();
    let unique_name = format!(
        "{}{}.{}",
        QUERY_PREFIX,
        Alphanumeric.sample_string(&mut rand::rng(), 32),
        ext
    );
    tokio::fs::create_dir_all(&queries).await?;
    let query_path = queries.join(unique_name);
    tokio::fs::write(&query_path, &data.file.contents).await?;

    info!("正在搜索上传图片: {}", file_name);

    let results =
        block_in_place(|| index.search_by_image(embedder.as_mut(), &query_path, top_k))?;
    metrics::inc_search(SearchKind::Image, start.elapsed().as_secs_f32());

    Ok(Json(SearchImageResponse {
        query_image: rewrite_path(&query_path, &images),
        results: results.iter().map(|p| rewrite_path(p, &images)).collect(),
    }))
}

/// 使用文本搜索相似图片
#[utoipa::path(
    get,
    path = "/search-text/",
    params(TextQuery),
    responses(
        (status = 200, body = SearchTextResponse),
        (status = 400, description = "参数错误"),
        (status = 404, description = "尚未上传数据集"),
    )
)]
pub async fn search_text_handler(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<TextQuery>, QueryRejection>,
) -> Result<Json<SearchTextResponse>> {
    let query = query_params(query)?;
    if query.query.is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }
    let top_k = check_top_k(query.top_k)?;

    let index = state.loaded_index().await?;

    info!("正在搜索文本: {}", query.query);

    let start = Instant::now();
    let mut embedder = state.embedder.lock().await;
    let results = block_in_place(|| index.search_by_text(embedder.as_mut(), &query.query, top_k))?;
    metrics::inc_search(SearchKind::Text, start.elapsed().as_secs_f32());

    let images = state.data_dir.images();
    Ok(Json(SearchTextResponse {
        results: results.iter().map(|p| rewrite_path(p, &images)).collect(),
    }))
}

/// 获取服务状态
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, body = StatusResponse),
    )
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>> {
    let model = state.embedder.lock().await.model_name().to_string();
    let (total_images, dimension) = match state.index.read().await.as_ref() {
        Some(index) => (index.len(), index.dimension()),
        None => (0, 0),
    };
    Ok(Json(StatusResponse { total_images, dimension, model }))
}

/// 导出 prometheus 指标
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::render()?)
}
