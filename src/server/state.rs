use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tokio::task::block_in_place;

use super::error::{AppError, Result};
use crate::{ImageIndex, metrics};
use crate::config::{DataDir, EmbedOptions, IndexOptions};
use crate::embed::Embedder;

/// 应用状态
pub struct AppState {
    /// 数据目录
    pub data_dir: DataDir,
    /// 向量模型
    pub embedder: Mutex<Box<dyn Embedder>>,
    /// 图片索引，上传数据集之前为空
    pub index: RwLock<Option<ImageIndex>>,
    /// 向量计算配置
    pub embed: EmbedOptions,
    /// 索引配置
    pub index_opts: IndexOptions,
    /// 请求体大小限制
    pub max_upload_size: usize,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        data_dir: DataDir,
        embedder: Box<dyn Embedder>,
        index: Option<ImageIndex>,
        embed: EmbedOptions,
        index_opts: IndexOptions,
        max_upload_size: usize,
    ) -> Arc<Self> {
        Arc::new(AppState {
            data_dir,
            embedder: Mutex::new(embedder),
            index: RwLock::new(index),
            embed,
            index_opts,
            max_upload_size,
        })
    }

    /// 获取已加载的索引，内存中没有时尝试从磁盘加载
    pub async fn loaded_index(&self) -> Result<RwLockReadGuard<'_, ImageIndex>> {
        let guard = self.index.read().await;
        if let Ok(index) = RwLockReadGuard::try_map(guard, |index| index.as_ref()) {
            return Ok(index);
        }

        let mut guard = self.index.write().await;
        if guard.is_none() {
            let loaded = block_in_place(|| {
                ImageIndex::load(self.data_dir.index(), &self.index_opts)
            })
            .map_err(|e| {
                warn!("加载索引失败: {e}");
                AppError::not_found("No index found. Upload a dataset first.")
            })?;
            info!("已加载索引，共 {} 张图片", loaded.len());
            metrics::set_indexed_images(loaded.len());
            *guard = Some(loaded);
        }

        RwLockReadGuard::try_map(guard.downgrade(), |index| index.as_ref())
            .map_err(|_| AppError::not_found("No index found. Upload a dataset first."))
    }
}
