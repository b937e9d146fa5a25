use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

fn default_top_k() -> usize {
    5
}

/// 上传数据集的请求
#[derive(TryFromMultipart)]
pub struct UploadRequest {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
}

/// 上传查询图片的请求
#[derive(TryFromMultipart)]
pub struct SearchImageRequest {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
}

/// 上传数据集表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct UploadForm {
    /// 包含图片的 zip 压缩包
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 上传查询图片表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchImageForm {
    /// jpg 或 png 格式的查询图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 返回结果数量
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TopKQuery {
    /// 返回的相似图片数量，范围从 1 到 100
    #[serde(default = "default_top_k")]
    #[param(default = 5, minimum = 1, maximum = 100)]
    pub top_k: usize,
}

/// 文本搜索参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TextQuery {
    /// 查询文本
    pub query: String,
    /// 返回的相似图片数量，范围从 1 到 100
    #[serde(default = "default_top_k")]
    #[param(default = 5, minimum = 1, maximum = 100)]
    pub top_k: usize,
}

/// 上传数据集的响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub message: String,
    /// 索引中的图片数量
    pub total_images: usize,
}

/// 图片搜索的响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchImageResponse {
    /// 查询图片的 URL
    pub query_image: String,
    /// 相似图片的 URL，按相似度从高到低排列
    pub results: Vec<String>,
}

/// 文本搜索的响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchTextResponse {
    /// 相似图片的 URL，按相似度从高到低排列
    pub results: Vec<String>,
}

/// 服务状态
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// 索引中的图片数量，未加载索引时为 0
    pub total_images: usize,
    /// 向量维度
    pub dimension: usize,
    /// 模型名称
    pub model: String,
}
