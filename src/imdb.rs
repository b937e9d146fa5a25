use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Result, anyhow, bail};
use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::Array2;

use crate::config::IndexOptions;
use crate::dataset::find_image_files;
use crate::embed::{Embedder, Embedding, normalize};
use crate::index::{VectorIndex, new_index, open_index};

/// 返回索引对应的路径列表文件，即在索引文件名后追加 `.paths`
pub fn sidecar_path(index_path: impl AsRef<Path>) -> PathBuf {
    let mut path = index_path.as_ref().as_os_str().to_owned();
    path.push(".paths");
    PathBuf::from(path)
}

/// 图片向量索引
///
/// 图片 ID 即图片在 `paths` 中的位置，构建索引时按路径排序后依次分配。
/// 索引文件与路径列表文件必须同时写入、同时读取。
pub struct ImageIndex {
    index: Box<dyn VectorIndex>,
    paths: Vec<String>,
}

impl ImageIndex {
    /// 为目录中的所有图片构建索引，并保存索引文件和路径列表文件
    ///
    /// # Arguments
    ///
    /// * `images_dir` - 图片目录
    /// * `index_path` - 索引文件路径
    /// * `embedder` - 向量模型
    /// * `batch_size` - 每次送入模型的图片数量
    /// * `opts` - 索引参数
    /// * `pb` - 进度条
    pub fn build(
        images_dir: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        embedder: &mut dyn Embedder,
        batch_size: usize,
        opts: &IndexOptions,
        pb: &ProgressBar,
    ) -> Result<Self> {
        let paths = find_image_files(images_dir);
        if paths.is_empty() {
            bail!("No images found in dataset directory.");
        }

        info!("找到 {} 张图片，开始计算向量", paths.len());
        pb.set_length(paths.len() as u64);

        let start = Instant::now();
        let mut embeddings = Vec::with_capacity(paths.len());
        for chunk in paths.chunks(batch_size.max(1)) {
            let batch = chunk.iter().map(PathBuf::from).collect::<Vec<_>>();
            let mut vectors = embedder.embed_images(&batch)?;
            if vectors.len() != batch.len() {
                bail!("model returned {} embeddings for {} images", vectors.len(), batch.len());
            }
            vectors.iter_mut().for_each(|v| normalize(v));
            embeddings.append(&mut vectors);
            pb.inc(chunk.len() as u64);
        }
        debug!("向量计算耗时: {:.2}s", start.elapsed().as_secs_f32());

        let dim = embeddings[0].len();
        info!("向量形状: ({}, {})，创建 {:?} 索引", embeddings.len(), dim, opts.index_type);

        let mut index = new_index(dim, opts)?;
        let ids = (0..paths.len() as i64).collect::<Vec<_>>();
        index.add_with_ids(&ids, &embeddings)?;

        let this = Self { index, paths };
        this.save(index_path)?;
        info!("索引与路径列表已保存");

        Ok(this)
    }

    /// 加载索引文件和路径列表文件
    pub fn load(index_path: impl AsRef<Path>, opts: &IndexOptions) -> Result<Self> {
        let index_path = index_path.as_ref();
        if !index_path.exists() {
            bail!("Index file not found: {}", index_path.display());
        }

        let index = open_index(index_path, opts)?;
        let paths = fs::read_to_string(sidecar_path(index_path))?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        if index.ntotal() != paths.len() {
            bail!(
                "index holds {} vectors but the path list has {} entries",
                index.ntotal(),
                paths.len()
            );
        }

        debug!("索引中的图片数量: {}", paths.len());
        Ok(Self { index, paths })
    }

    /// 保存索引，先写入临时文件再重命名
    pub fn save(&self, index_path: impl AsRef<Path>) -> Result<()> {
        let index_path = index_path.as_ref();

        let tmp_index = index_path.with_extension("tmp");
        self.index.save(&tmp_index)?;

        let sidecar = sidecar_path(index_path);
        let tmp_sidecar = sidecar.with_extension("tmp");
        let mut writer = BufWriter::new(fs::File::create(&tmp_sidecar)?);
        for path in &self.paths {
            writeln!(writer, "{}", path)?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(tmp_index, index_path)?;
        fs::rename(tmp_sidecar, sidecar)?;
        Ok(())
    }

    /// 索引中的图片数量
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// 按 ID 顺序导出所有向量
    pub fn embeddings(&self) -> Result<Array2<f32>> {
        let ids = (0..self.len() as i64).collect::<Vec<_>>();
        self.index.reconstruct(&ids)
    }

    /// 使用向量搜索，返回 Vec<(相似度, 图片路径)>
    ///
    /// 结果最多 `top_k` 个，没有匹配的位置会被丢弃。
    pub fn search_vector(&self, mut query: Embedding, top_k: usize) -> Result<Vec<(f32, String)>> {
        normalize(&mut query);
        self.index
            .search(&query, top_k)?
            .into_iter()
            .filter(|neighbor| neighbor.is_match())
            .map(|neighbor| -> Result<(f32, String)> {
                let path = self
                    .paths
                    .get(neighbor.id as usize)
                    .ok_or_else(|| anyhow!("vector {} has no image path", neighbor.id))?;
                Ok((neighbor.score, path.clone()))
            })
            .collect()
    }

    /// 使用图片搜索，返回 Vec<(相似度, 图片路径)>
    pub fn query_image(
        &self,
        embedder: &mut dyn Embedder,
        image: impl AsRef<Path>,
        top_k: usize,
    ) -> Result<Vec<(f32, String)>> {
        let query = embedder
            .embed_images(&[image.as_ref().to_path_buf()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("model returned no embeddings"))?;
        self.search_vector(query, top_k)
    }

    /// 使用文本搜索，返回 Vec<(相似度, 图片路径)>
    pub fn query_text(
        &self,
        embedder: &mut dyn Embedder,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<(f32, String)>> {
        let query = embedder.embed_text(text)?;
        self.search_vector(query, top_k)
    }

    /// 使用图片搜索，只返回图片路径
    pub fn search_by_image(
        &self,
        embedder: &mut dyn Embedder,
        image: impl AsRef<Path>,
        top_k: usize,
    ) -> Result<Vec<String>> {
        Ok(self.query_image(embedder, image, top_k)?.into_iter().map(|(_, path)| path).collect())
    }

    /// 使用文本搜索，只返回图片路径
    pub fn search_by_text(
        &self,
        embedder: &mut dyn Embedder,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<String>> {
        Ok(self.query_text(embedder, text, top_k)?.into_iter().map(|(_, path)| path).collect())
    }
}
