#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use clipsearch::DataDir;
use clipsearch::config::{EmbedOptions, IndexOptions, IndexType};
use clipsearch::embed::{Embedder, Embedding};
use clipsearch::server::{AppState, create_app};
use image::{ImageFormat, ImageReader, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// 使用图片平均颜色作为向量，文本中的颜色名映射到对应通道
pub struct ColorEmbedder;

impl Embedder for ColorEmbedder {
    fn embed_images(&mut self, paths: &[PathBuf]) -> Result<Vec<Embedding>> {
        paths
            .iter()
            .map(|path| -> Result<Embedding> {
                let img = ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgb8();
                let mut sum = [0f32; 3];
                for pixel in img.pixels() {
                    for (s, c) in sum.iter_mut().zip(pixel.0) {
                        *s += c as f32;
                    }
                }
                Ok(sum.to_vec())
            })
            .collect()
    }

    fn embed_text(&mut self, text: &str) -> Result<Embedding> {
        let mut v = vec![0.0; 3];
        for word in text.split_whitespace() {
            match word.to_lowercase().as_str() {
                "red" => v[0] += 1.0,
                "green" => v[1] += 1.0,
                "blue" => v[2] += 1.0,
                _ => {}
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "color"
    }
}

/// 每次计算图片向量前等待一段时间，用于测试并发请求
pub struct SlowEmbedder(pub Duration);

impl Embedder for SlowEmbedder {
    fn embed_images(&mut self, paths: &[PathBuf]) -> Result<Vec<Embedding>> {
        std::thread::sleep(self.0);
        ColorEmbedder.embed_images(paths)
    }

    fn embed_text(&mut self, text: &str) -> Result<Embedding> {
        ColorEmbedder.embed_text(text)
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "slow-color"
    }
}

/// 生成纯色 png 图片
pub fn png(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb(color));
    let mut data = Cursor::new(Vec::new());
    img.write_to(&mut data, ImageFormat::Png).unwrap();
    data.into_inner()
}

/// 将文件打包为 zip
pub fn zip(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// 红绿蓝三张图片和一个无关文件
pub fn rgb_dataset() -> Vec<u8> {
    zip(&[
        ("colors/red.png", png([255, 0, 0])),
        ("colors/green.png", png([0, 255, 0])),
        ("colors/blue.png", png([0, 0, 255])),
        ("colors/readme.txt", b"not an image".to_vec()),
    ])
}

/// 构建只有一个文件字段的 multipart 请求体，返回 (Content-Type, body)
pub fn multipart(filename: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "clipsearch-test-boundary";
    let mut body = Vec::new();
    write!(
        body,
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .unwrap();
    body.extend_from_slice(content);
    write!(body, "\r\n--{boundary}--\r\n").unwrap();
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// 使用临时数据目录的测试服务
pub struct TestServer {
    pub dir: TempDir,
    pub state: Arc<AppState>,
}

impl TestServer {
    pub fn new(dir: TempDir, index_type: IndexType) -> Self {
        Self::with_embedder(dir, index_type, Box::new(ColorEmbedder))
    }

    pub fn with_embedder(dir: TempDir, index_type: IndexType, embedder: Box<dyn Embedder>) -> Self {
        let data_dir = DataDir::new(dir.path());
        data_dir.ensure().unwrap();
        let state = AppState::new(
            data_dir,
            embedder,
            None,
            EmbedOptions::default(),
            IndexOptions { index_type, ..Default::default() },
            1024 * 1024,
        );
        Self { dir, state }
    }

    pub fn app(&self) -> Router {
        create_app(self.state.clone())
    }

    /// 使用同一个数据目录重新创建服务，模拟服务重启
    pub fn restart(self) -> Self {
        let index_type = self.state.index_opts.index_type;
        Self::new(self.dir, index_type)
    }

    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send_raw(request).await;
        (status, serde_json::from_str(&body).unwrap_or(Value::Null))
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_multipart(&self, uri: &str, filename: &str, data: &[u8]) -> (StatusCode, Value) {
        let (content_type, body) = multipart(filename, data);
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    pub async fn upload(&self, filename: &str, data: &[u8]) -> (StatusCode, Value) {
        self.post_multipart("/upload-folder/", filename, data).await
    }

    pub async fn search_image(&self, filename: &str, data: &[u8], top_k: usize) -> (StatusCode, Value) {
        self.post_multipart(&format!("/search-image/?top_k={top_k}"), filename, data).await
    }

    pub async fn search_text(&self, query: &str) -> (StatusCode, Value) {
        self.get(&format!("/search-text/?{query}")).await
    }
}

/// 取出响应中的结果 URL 列表
pub fn urls(value: &Value) -> Vec<&str> {
    value["results"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect()
}
