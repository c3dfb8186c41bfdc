//! 文本与图片编码器
//!
//! 文本编码器和图片编码器必须输出同一向量空间、同一维度的向量，跨模态搜索依赖这一点。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::EncoderOptions;
use crate::error::{Error, Result};
use crate::retry::is_retryable_status;
use crate::similarity::l2_normalize;

/// CLIP 向量维度
pub const EMBEDDING_DIM: usize = 512;

#[async_trait]
pub trait Encoder: Send + Sync {
    /// 编码一段文本，返回单位向量
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>>;

    /// 编码一张图片，返回单位向量
    async fn encode_image(&self, image: &[u8]) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EncodeResponse {
    embedding: Vec<f32>,
}

/// 通过 HTTP 调用的 CLIP 编码服务
///
/// - `POST {base}/encode/text`，请求体为 `{"text": "..."}`
/// - `POST {base}/encode/image`，请求体为图片原始字节
///
/// 两者都返回 `{"embedding": [...]}`。
pub struct HttpEncoder {
    client: Client,
    base_url: String,
    dimension: usize,
}

impl HttpEncoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::EncoderUnavailable(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, dimension: EMBEDDING_DIM })
    }

    pub fn from_options(opts: &EncoderOptions) -> Result<Self> {
        Self::new(opts.encoder_url.clone(), opts.timeout())
    }

    async fn parse(&self, resp: reqwest::Response, rejected: fn(String) -> Error) -> Result<Vec<f32>> {
        let status = resp.status();
        if is_retryable_status(status) {
            return Err(Error::TransientUpstream(format!("编码服务返回 {status}")));
        }
        if status != StatusCode::OK {
            return Err(rejected(format!("编码服务返回 {status}")));
        }
        let body: EncodeResponse = resp.json().await.map_err(transport_error)?;
        self.finish(body.embedding)
    }

    fn finish(&self, mut embedding: Vec<f32>) -> Result<Vec<f32>> {
        if embedding.len() != self.dimension {
            return Err(Error::EncoderUnavailable(format!(
                "向量维度错误: 期望 {}，实际 {}",
                self.dimension,
                embedding.len()
            )));
        }
        if embedding.iter().all(|x| *x == 0.0) {
            return Err(Error::EncoderUnavailable("编码服务返回了零向量".to_string()));
        }
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_decode() {
        Error::EncoderUnavailable(err.to_string())
    } else {
        Error::TransientUpstream(err.to_string())
    }
}

#[async_trait]
impl Encoder for HttpEncoder {
    async fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/encode/text", self.base_url))
            .json(&TextRequest { text })
            .send()
            .await
            .map_err(transport_error)?;
        self.parse(resp, Error::EncoderUnavailable).await
    }

    async fn encode_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/encode/image", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(transport_error)?;
        // 编码服务拒绝图片说明图片本身无法解码
        self.parse(resp, Error::PermanentAsset).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
