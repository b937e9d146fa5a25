use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Result, anyhow, bail};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use super::{Neighbor, VectorIndex, check_batch, check_dimension};

const MAGIC: [u8; 8] = *b"CSFLAT01";

/// 暴力搜索索引
///
/// 每次搜索都与所有向量计算内积，结果精确。
pub struct FlatIndex {
    ids: Vec<i64>,
    /// ntotal * dim
    vectors: Array2<f32>,
}

#[derive(Serialize, Deserialize)]
struct FlatIndexFile {
    magic: [u8; 8],
    dim: usize,
    ids: Vec<i64>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { ids: vec![], vectors: Array2::zeros((0, dim)) }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let file: FlatIndexFile = bincode::deserialize_from(reader)?;
        if file.magic != MAGIC {
            bail!("{} is not a flat index", path.display());
        }
        let vectors = Array2::from_shape_vec((file.ids.len(), file.dim), file.data)?;
        Ok(Self { ids: file.ids, vectors })
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    fn ntotal(&self) -> usize {
        self.ids.len()
    }

    fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        check_batch(self.dimension(), ids, vectors)?;
        for v in vectors {
            self.vectors.push(Axis(0), ArrayView1::from(v.as_slice()))?;
        }
        self.ids.extend_from_slice(ids);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension(), query.len())?;

        let scores = self.vectors.dot(&ArrayView1::from(query));
        let mut order = (0..self.ntotal()).collect::<Vec<_>>();
        let cmp = |a: &usize, b: &usize| scores[*b].total_cmp(&scores[*a]);
        if k < order.len() {
            order.select_nth_unstable_by(k, cmp);
            order.truncate(k);
        }
        order.sort_unstable_by(cmp);

        let mut result = order
            .into_iter()
            .map(|row| Neighbor { id: self.ids[row], score: scores[row] })
            .collect::<Vec<_>>();
        result.resize(k, Neighbor::empty());
        Ok(result)
    }

    fn reconstruct(&self, ids: &[i64]) -> Result<Array2<f32>> {
        let rows = ids
            .iter()
            .map(|id| {
                self.ids
                    .iter()
                    .position(|x| x == id)
                    .ok_or_else(|| anyhow!("vector {id} not found"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.vectors.select(Axis(0), &rows))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let file = FlatIndexFile {
            magic: MAGIC,
            dim: self.dimension(),
            ids: self.ids.clone(),
            data: self.vectors.iter().copied().collect(),
        };
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &file)?;
        Ok(())
    }
}
