use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "artsearch", "artsearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct EncoderOptions {
    /// CLIP 编码服务地址，文本和图片编码必须位于同一向量空间
    #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:8100")]
    pub encoder_url: String,
    /// 单次编码请求超时，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub encoder_timeout: u64,
}

impl EncoderOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_timeout)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 语义搜索的超时时间，超时后回退到全文搜索，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 3000)]
    pub semantic_timeout: u64,
    /// 查询文本最大字符数
    #[arg(long, value_name = "N", default_value_t = 200)]
    pub max_query_len: usize,
}

impl SearchOptions {
    pub fn semantic_timeout(&self) -> Duration {
        Duration::from_millis(self.semantic_timeout)
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { semantic_timeout: 3000, max_query_len: 200 }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct CacheOptions {
    /// 向量工作集缓存有效期，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub embedding_ttl: u64,
    /// 列表页缓存有效期，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub listing_ttl: u64,
    /// 精选推荐缓存有效期，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub featured_ttl: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { embedding_ttl: 300, listing_ttl: 60, featured_ttl: 60 }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// 多少件藏品为一个提交批次
    #[arg(short, long, value_name = "SIZE", default_value_t = 64)]
    pub batch_size: usize,
    /// 同时进行下载和编码的最大数量
    #[arg(short = 'j', long, value_name = "N", default_value_t = 8)]
    pub concurrency: usize,
    /// 下载图片的最大尝试次数
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub max_attempts: usize,
    /// 首次重试前的等待时间，单位为毫秒，之后指数增长
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub retry_base_delay: u64,
    /// 下载单张图片的超时时间，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 15000)]
    pub fetch_timeout: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            concurrency: 8,
            max_attempts: 4,
            retry_base_delay: 500,
            fetch_timeout: 15000,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "artsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// artsearch 数据目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从 JSON Lines 文件导入藏品记录
    Import(ImportCommand),
    /// 为缺少向量的藏品计算图片向量和焦点
    Embed(EmbedCommand),
    /// 搜索藏品
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 添加、重命名、启用或停用来源
    Source(SourceCommand),
    /// 显示数据库统计信息
    Stats(StatsCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("artsearch.db")
    }

    /// 返回向量索引文件的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("vectors.usearch")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
