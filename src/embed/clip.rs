use std::path::PathBuf;

use anyhow::{Result, anyhow};
use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use log::info;

use super::{Embedder, Embedding};
use crate::config::EmbedOptions;

/// CLIP ViT-B/32 的输出维度
pub const CLIP_DIMS: usize = 512;

/// 使用 CLIP ViT-B/32 计算图片和文本向量
///
/// 视觉和文本两个编码器分别加载，首次使用时会下载模型。
pub struct ClipEmbedder {
    image: ImageEmbedding,
    text: TextEmbedding,
    batch_size: usize,
}

impl ClipEmbedder {
    pub fn new(opts: &EmbedOptions) -> Result<Self> {
        info!("正在加载 CLIP 模型 (clip-ViT-B-32)");

        let mut image_opts = ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
            .with_show_download_progress(!opts.no_download_progress);
        let mut text_opts = InitOptions::new(EmbeddingModel::ClipVitB32)
            .with_show_download_progress(!opts.no_download_progress);
        if let Some(dir) = &opts.model_cache {
            image_opts = image_opts.with_cache_dir(dir.clone());
            text_opts = text_opts.with_cache_dir(dir.clone());
        }

        let image = ImageEmbedding::try_new(image_opts)?;
        let text = TextEmbedding::try_new(text_opts)?;

        Ok(Self { image, text, batch_size: opts.batch_size.max(1) })
    }
}

impl Embedder for ClipEmbedder {
    fn embed_images(&mut self, paths: &[PathBuf]) -> Result<Vec<Embedding>> {
        if paths.is_empty() {
            return Ok(vec![]);
        }
        let embeddings = self.image.embed(paths.to_vec(), Some(self.batch_size))?;
        Ok(embeddings)
    }

    fn embed_text(&mut self, text: &str) -> Result<Embedding> {
        self.text
            .embed(vec![text], None)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("model returned no embeddings"))
    }

    fn dimension(&self) -> usize {
        CLIP_DIMS
    }

    fn model_name(&self) -> &str {
        "clip-ViT-B-32"
    }
}
