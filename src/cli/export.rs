use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::IndexOptions;
use crate::{ImageIndex, Opts};

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    #[command(flatten)]
    pub index: IndexOptions,
    /// 输出文件，第 i 行为路径列表中第 i 张图片的向量
    #[arg(short, long, default_value = "embeddings.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        block_in_place(|| -> Result<()> {
            let index = ImageIndex::load(opts.data_dir.index(), &self.index)?;
            let data = index.embeddings()?;
            write_npy(&self.output, &data)?;
            info!("导出了 {} 个向量到 {}", data.nrows(), self.output.display());
            Ok(())
        })
    }
}
