//! 向量索引
//!
//! 所有索引都使用内积作为相似度，向量在加入索引前需要归一化。

use std::path::Path;

use anyhow::Result;
use ndarray::Array2;

use crate::config::{IndexOptions, IndexType};

mod flat;
mod hnsw;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;

/// 搜索结果中没有匹配时使用的 ID
pub const NO_MATCH: i64 = -1;

/// 单条搜索结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 向量 ID，没有匹配时为 [`NO_MATCH`]
    pub id: i64,
    /// 内积相似度，越大越相似
    pub score: f32,
}

impl Neighbor {
    pub fn empty() -> Self {
        Self { id: NO_MATCH, score: f32::NEG_INFINITY }
    }

    pub fn is_match(&self) -> bool {
        self.id >= 0
    }
}

pub trait VectorIndex: Send + Sync {
    /// 向量维度
    fn dimension(&self) -> usize;

    /// 索引中的向量数量
    fn ntotal(&self) -> usize;

    /// 批量添加向量，`ids` 与 `vectors` 一一对应，ID 不能为负数
    fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()>;

    /// 搜索最相似的 k 个向量，按相似度从高到低排列
    ///
    /// 返回结果大小固定为 k，没有找到的位置填充 [`NO_MATCH`]
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// 按 ID 取回向量，返回 ids.len() * dimension 的矩阵
    fn reconstruct(&self, ids: &[i64]) -> Result<Array2<f32>>;

    /// 保存索引
    fn save(&self, path: &Path) -> Result<()>;
}

/// 创建一个空索引
pub fn new_index(dim: usize, opts: &IndexOptions) -> Result<Box<dyn VectorIndex>> {
    Ok(match opts.index_type {
        IndexType::Flat => Box::new(FlatIndex::new(dim)),
        IndexType::Hnsw => Box::new(HnswIndex::new(dim, opts)?),
    })
}

/// 从文件加载索引
pub fn open_index(path: &Path, opts: &IndexOptions) -> Result<Box<dyn VectorIndex>> {
    Ok(match opts.index_type {
        IndexType::Flat => Box::new(FlatIndex::open(path)?),
        IndexType::Hnsw => Box::new(HnswIndex::open(path, opts)?),
    })
}

/// 检查向量维度
fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        anyhow::bail!("dimension mismatch: index has {expected}, got {actual}");
    }
    Ok(())
}

/// 检查批量添加的参数
fn check_batch(dim: usize, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
    if ids.len() != vectors.len() {
        anyhow::bail!("got {} ids but {} vectors", ids.len(), vectors.len());
    }
    if let Some(id) = ids.iter().find(|&&id| id < 0) {
        anyhow::bail!("invalid vector id: {id}");
    }
    vectors.iter().try_for_each(|v| check_dimension(dim, v.len()))
}
