use std::path::Path;

use anyhow::{Result, anyhow, bail};
use ndarray::Array2;
use usearch::{Index, IndexOptions as USearchOptions, MetricKind, ScalarKind};

use super::{Neighbor, VectorIndex, check_batch, check_dimension};
use crate::config::IndexOptions;

/// 基于 usearch 的 HNSW 近似索引
pub struct HnswIndex {
    index: Index,
}

impl HnswIndex {
    fn options(dim: usize, opts: &IndexOptions) -> USearchOptions {
        USearchOptions {
            dimensions: dim,
            // usearch 中内积距离为 1 - dot
            metric: MetricKind::IP,
            quantization: ScalarKind::F32,
            connectivity: opts.connectivity,
            expansion_add: opts.expansion_add,
            expansion_search: opts.expansion_search,
            ..Default::default()
        }
    }

    pub fn new(dim: usize, opts: &IndexOptions) -> Result<Self> {
        let index = Index::new(&Self::options(dim, opts))?;
        Ok(Self { index })
    }

    /// 从文件加载索引，维度以文件中记录的为准
    pub fn open(path: &Path, opts: &IndexOptions) -> Result<Self> {
        if !path.exists() {
            bail!("{} does not exist", path.display());
        }
        let index = Index::new(&Self::options(1, opts))?;
        index.load(path_str(path)?)?;
        Ok(Self { index })
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| anyhow!("non UTF-8 path: {}", path.display()))
}

impl VectorIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.index.dimensions()
    }

    fn ntotal(&self) -> usize {
        self.index.size()
    }

    fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        check_batch(self.dimension(), ids, vectors)?;
        self.index.reserve(self.index.size() + vectors.len())?;
        for (&id, v) in ids.iter().zip(vectors) {
            self.index.add(id as u64, v.as_slice())?;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension(), query.len())?;
        if k == 0 {
            return Ok(vec![]);
        }

        let matches = self.index.search(query, k)?;
        let mut result = matches
            .keys
            .iter()
            .zip(&matches.distances)
            .map(|(&key, &distance)| Neighbor { id: key as i64, score: 1.0 - distance })
            .collect::<Vec<_>>();
        result.resize(k, Neighbor::empty());
        Ok(result)
    }

    fn reconstruct(&self, ids: &[i64]) -> Result<Array2<f32>> {
        let dim = self.dimension();
        let mut data = vec![0f32; ids.len() * dim];
        for (&id, row) in ids.iter().zip(data.chunks_exact_mut(dim)) {
            if self.index.get(id as u64, row)? == 0 {
                bail!("vector {id} not found");
            }
        }
        Ok(Array2::from_shape_vec((ids.len(), dim), data)?)
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.index.save(path_str(path)?)?;
        Ok(())
    }
}
