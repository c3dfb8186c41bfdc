use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{Error, Result};
use crate::retry::is_retryable_status;

/// 图片来源
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// 获取图片原始字节，只有值得重试的失败才返回 [`Error::TransientUpstream`]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// 通过 HTTP 获取图片，也支持 `file://` 开头的本地路径
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("artsearch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::TransientUpstream(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_file(path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut => {
                Error::TransientUpstream(format!("{path}: {e}"))
            }
            _ => Error::PermanentAsset(format!("{path}: {e}")),
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = url.strip_prefix("file://") {
            return Self::fetch_file(path).await;
        }

        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                // URL 本身无效
                Error::PermanentAsset(format!("{url}: {e}"))
            } else {
                Error::TransientUpstream(format!("{url}: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let msg = format!("{url}: {status}");
            return Err(if is_retryable_status(status) {
                Error::TransientUpstream(msg)
            } else {
                Error::PermanentAsset(msg)
            });
        }

        let bytes = resp.bytes().await.map_err(|e| Error::TransientUpstream(format!("{url}: {e}")))?;
        if bytes.is_empty() {
            return Err(Error::PermanentAsset(format!("{url}: 响应为空")));
        }
        Ok(bytes.to_vec())
    }
}
