use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, IndexOptions};
use crate::dataset::{clear_dataset_and_index, copy_images, extract_tar, extract_zip, is_zip_name};
use crate::embed::ClipEmbedder;
use crate::utils::pb_style;
use crate::{ImageIndex, Opts};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    /// 图片目录、zip 压缩包或 tar 归档，会替换现有的数据集
    /// 不填则使用数据目录中现有的图片重新构建索引
    #[arg(verbatim_doc_comment)]
    pub path: Option<PathBuf>,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let data_dir = &opts.data_dir;
        let images = data_dir.images();

        if let Some(path) = &self.path {
            if !path.exists() {
                bail!("{} does not exist", path.display());
            }
            let name = path.to_string_lossy().to_lowercase();
            if !path.is_dir() && !is_zip_name(&name) && !name.ends_with(".tar") {
                bail!("unsupported dataset: {}", path.display());
            }
            if overlaps(path, &images)? {
                bail!(
                    "{} overlaps the image directory {}, which is cleared before building",
                    path.display(),
                    images.display()
                );
            }

            info!("正在清空旧的数据集和索引");
            clear_dataset_and_index(data_dir)?;

            if path.is_dir() {
                let count = block_in_place(|| copy_images(path, &images))?;
                info!("复制了 {} 张图片", count);
            } else if is_zip_name(&name) {
                let data = tokio::fs::read(path).await?;
                block_in_place(|| extract_zip(&data, &images))?;
            } else {
                extract_tar(path, &images).await?;
            }
        } else {
            data_dir.ensure()?;
        }

        let mut embedder = block_in_place(|| ClipEmbedder::new(&self.embed))?;

        let pb = ProgressBar::no_length().with_style(pb_style());
        let index = block_in_place(|| {
            ImageIndex::build(
                &images,
                data_dir.index(),
                &mut embedder,
                self.embed.batch_size,
                &self.index,
                &pb,
            )
        })?;
        pb.finish_with_message("索引构建完成");

        info!("索引构建完成，共 {} 张图片", index.len());
        Ok(())
    }
}

/// 判断数据集路径与图片目录是否互相包含
fn overlaps(path: &Path, images: &Path) -> Result<bool> {
    if !images.exists() {
        return Ok(false);
    }
    let path = path.canonicalize()?;
    let images = images.canonicalize()?;
    Ok(path.starts_with(&images) || (path.is_dir() && images.starts_with(&path)))
}
