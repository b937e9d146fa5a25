use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

/// 允许索引和上传的图片后缀，匹配时不区分大小写
pub const ALLOWED_IMAGE_EXTS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 查询图片文件名前缀
pub const QUERY_PREFIX: &str = "query_";

/// 查询图片所在的目录，位于图片目录下，以 `.` 开头因此不会被加入索引
pub const QUERY_DIR: &str = ".query";

/// 单次查询返回结果数量上限
pub const MAX_TOP_K: usize = 100;

static DATA_DIR: LazyLock<String> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "clipsearch", "clipsearch").expect("failed to get project dir");
    proj_dirs.data_dir().to_string_lossy().into_owned()
});

fn default_data_dir() -> &'static str {
    DATA_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 计算图片向量时每个批次的图片数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 16)]
    pub batch_size: usize,
    /// 模型缓存目录，默认使用 fastembed 的缓存位置
    #[arg(long, value_name = "DIR")]
    pub model_cache: Option<PathBuf>,
    /// 下载模型时不显示进度条
    #[arg(long)]
    pub no_download_progress: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self { batch_size: 16, model_cache: None, no_download_progress: false }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 索引类型
    #[arg(long, value_enum, default_value_t = IndexType::Flat)]
    pub index_type: IndexType,
    /// HNSW 每个节点的连接数
    #[arg(long, value_name = "M", default_value_t = 32)]
    pub connectivity: usize,
    /// HNSW 构建时的候选集大小
    #[arg(long, value_name = "EF", default_value_t = 128)]
    pub expansion_add: usize,
    /// HNSW 搜索时的候选集大小
    #[arg(long, value_name = "EF", default_value_t = 64)]
    pub expansion_search: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { index_type: IndexType::Flat, connectivity: 32, expansion_add: 128, expansion_search: 64 }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// 暴力搜索，结果精确
    Flat,
    /// usearch HNSW 近似搜索
    Hnsw,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "clipsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，保存上传的图片和索引文件
    #[arg(short, long, default_value = default_data_dir())]
    pub data_dir: DataDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 从目录或压缩包重新构建索引
    Build(BuildCommand),
    /// 使用图片或文本搜索相似图片
    Search(SearchCommand),
    /// 导出索引中的全部向量为 npy 文件
    Export(ExportCommand),
}

#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回图片目录的路径，也是 `/images` 静态文件的根目录
    pub fn images(&self) -> PathBuf {
        self.path.join("uploaded_images")
    }

    /// 返回查询图片目录的路径，通过 `/images/.query/` 访问
    pub fn queries(&self) -> PathBuf {
        self.images().join(QUERY_DIR)
    }

    /// 返回索引文件的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("vector.index")
    }

    /// 返回索引对应的图片路径列表文件
    pub fn index_paths(&self) -> PathBuf {
        crate::imdb::sidecar_path(self.index())
    }

    /// 创建数据目录和图片目录
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.images())
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
