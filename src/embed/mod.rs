//! 图片与文本的向量化
//!
//! 图片和文本必须映射到同一个向量空间，这样才能用文本检索图片。
//! 默认实现为 [`ClipEmbedder`]，使用 fastembed 加载 CLIP ViT-B/32 的 ONNX 模型。

use std::path::PathBuf;

use anyhow::Result;

mod clip;

pub use clip::*;

/// 一个向量
pub type Embedding = Vec<f32>;

/// 多模态向量模型
pub trait Embedder: Send {
    /// 计算一组图片的向量，返回结果与输入顺序一致
    fn embed_images(&mut self, paths: &[PathBuf]) -> Result<Vec<Embedding>>;

    /// 计算一段查询文本的向量
    fn embed_text(&mut self, text: &str) -> Result<Embedding>;

    /// 向量维度
    fn dimension(&self) -> usize;

    /// 模型名称
    fn model_name(&self) -> &str;
}

/// 将向量归一化为单位长度，零向量保持不变
///
/// 归一化之后内积即为余弦相似度。
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero() {
        let mut v = vec![0.0; 4];
        normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }
}
