use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, IndexOptions, MAX_TOP_K};
use crate::embed::ClipEmbedder;
use crate::{ImageIndex, Opts};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    /// 被搜索的图片路径
    #[arg(required_unless_present = "text", conflicts_with = "text")]
    pub image: Option<PathBuf>,
    /// 使用文本搜索
    #[arg(short, long)]
    pub text: Option<String>,
    /// 显示的结果数量
    #[arg(short = 'k', long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..=MAX_TOP_K as i64))]
    pub top_k: u16,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let index = block_in_place(|| ImageIndex::load(opts.data_dir.index(), &self.index))?;
        debug!("索引中的图片数量: {}", index.len());

        let mut embedder = block_in_place(|| ClipEmbedder::new(&self.embed))?;
        let top_k = self.top_k as usize;

        let result = block_in_place(|| match (&self.text, &self.image) {
            (Some(text), _) => index.query_text(&mut embedder, text, top_k),
            (None, Some(image)) => index.query_image(&mut embedder, image, top_k),
            (None, None) => unreachable!("clap requires a query"),
        })?;

        print_result(&result, self)
    }
}

fn print_result(result: &[(f32, String)], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for (k, v) in result {
                println!("{:.4}\t{}", k, v);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}
