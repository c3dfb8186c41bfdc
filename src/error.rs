use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 检索引擎的错误类型
///
/// 面向搜索的错误会在路由层被逐级降级吸收，只有存储层本身不可用时才会返回给调用方。
#[derive(Debug, Error)]
pub enum Error {
    /// 网络错误、超时、429 或 5xx，可以退避重试
    #[error("上游服务暂时不可用: {0}")]
    TransientUpstream(String),
    /// 图片在重试耗尽后仍无法获取或解码，应标记为损坏
    #[error("图片不可用: {0}")]
    PermanentAsset(String),
    /// 编码器未配置或返回了无法使用的结果
    #[error("编码器不可用: {0}")]
    EncoderUnavailable(String),
    /// 全文索引无法解析查询
    #[error("无法解析查询: {0}")]
    MalformedQuery(String),
    /// 分页参数无效，例如同时指定了游标和偏移量
    #[error("分页参数无效: {0}")]
    InvalidPaging(String),
    #[error("未找到: {0}")]
    NotFound(String),
    #[error("后台任务失败: {0}")]
    Task(String),
    #[error("向量索引错误: {0}")]
    Index(String),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Image(#[from] opencv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// 是否值得按退避策略重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream(_))
    }
}
