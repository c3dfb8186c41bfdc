//! 图片向量预计算
//!
//! 只处理缺少向量且未标记损坏的藏品，因此可以随时中断后继续。
//! 每一批在一个事务中提交，崩溃时最多丢失正在处理的一批。

mod fetch;
mod image;

use std::path::Path;
use std::sync::Arc;

use futures::{StreamExt, stream};
use indicatif::ProgressBar;
use log::{info, warn};
use serde::Serialize;
use tokio::task::spawn_blocking;

pub use self::fetch::{HttpFetcher, ImageFetcher};
pub use self::image::{INPUT_SIZE, PreparedImage, focal_point, prepare};
use crate::config::PipelineOptions;
use crate::db::{Database, NewEmbedding, PendingRow, crud};
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::similarity::l2_normalize;

/// 一次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// 成功保存向量的数量
    pub embedded: usize,
    /// 新标记为损坏的数量
    pub broken: usize,
    /// 暂时失败、下次运行会重试的数量
    pub failed: usize,
}

impl PipelineReport {
    fn merge(&mut self, other: PipelineReport) {
        self.embedded += other.embedded;
        self.broken += other.broken;
        self.failed += other.failed;
    }
}

/// 单件藏品的处理结果
enum Outcome {
    Embedded(NewEmbedding),
    Broken(i64, String),
    Failed(i64, String),
}

/// 获取、解码或处理图片的失败在重试耗尽后都视为图片损坏，其余失败下次运行时重试
fn classify(id: i64, result: Result<NewEmbedding>) -> Outcome {
    match result {
        Ok(embedding) => Outcome::Embedded(embedding),
        Err(Error::PermanentAsset(reason) | Error::TransientUpstream(reason)) => {
            Outcome::Broken(id, reason)
        }
        Err(e @ Error::Image(_)) => Outcome::Broken(id, e.to_string()),
        Err(e) => Outcome::Failed(id, e.to_string()),
    }
}

pub struct Pipeline {
    db: Database,
    fetcher: Arc<dyn ImageFetcher>,
    encoder: Arc<dyn Encoder>,
    retry: RetryPolicy,
    batch_size: usize,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        db: Database,
        fetcher: Arc<dyn ImageFetcher>,
        encoder: Arc<dyn Encoder>,
        opts: &PipelineOptions,
    ) -> Self {
        Self {
            db,
            fetcher,
            encoder,
            retry: RetryPolicy::from(opts),
            batch_size: opts.batch_size.max(1),
            concurrency: opts.concurrency.max(1),
        }
    }

    /// 删除所有向量和索引文件，之后需要从空索引重新运行
    pub async fn clean(&self, index_path: &Path) -> Result<()> {
        crud::clear_embeddings(&self.db).await?;
        if index_path.exists() {
            tokio::fs::remove_file(index_path).await?;
        }
        info!("已清空所有向量和向量索引");
        Ok(())
    }

    /// 为所有待处理的藏品计算向量，每批提交后追加到向量索引并保存
    pub async fn run(
        &self,
        index: &mut dyn VectorIndex,
        index_path: &Path,
        pb: &ProgressBar,
    ) -> Result<PipelineReport> {
        let pending = crud::pending_embeddings(&self.db).await?;
        info!("待计算向量的藏品: {}", pending.len());
        pb.set_length(pending.len() as u64);

        let mut report = PipelineReport::default();
        for batch in pending.chunks(self.batch_size) {
            let batch_report = self.run_batch(batch, index, index_path, pb).await?;
            report.merge(batch_report);
        }

        metrics::inc_pipeline("embedded", report.embedded as u64);
        metrics::inc_pipeline("broken", report.broken as u64);
        metrics::inc_pipeline("failed", report.failed as u64);
        info!(
            "向量计算完成: 成功 {}，损坏 {}，失败 {}",
            report.embedded, report.broken, report.failed
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        batch: &[PendingRow],
        index: &mut dyn VectorIndex,
        index_path: &Path,
        pb: &ProgressBar,
    ) -> Result<PipelineReport> {
        let outcomes = stream::iter(batch.iter().cloned())
            .map(|row| async move {
                let outcome = self.process(row).await;
                pb.inc(1);
                outcome
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut report = PipelineReport::default();
        let mut embeddings = vec![];
        let mut broken = vec![];
        for outcome in outcomes {
            match outcome {
                Outcome::Embedded(embedding) => embeddings.push(embedding),
                Outcome::Broken(id, reason) => {
                    warn!("标记损坏图片 {id}: {reason}");
                    broken.push((id, reason));
                }
                Outcome::Failed(id, reason) => {
                    warn!("计算向量失败 {id}: {reason}");
                    report.failed += 1;
                }
            }
        }

        if !broken.is_empty() {
            let mut tx = self.db.begin().await?;
            for (id, reason) in &broken {
                crud::mark_broken(&mut *tx, *id, reason).await?;
            }
            tx.commit().await?;
            report.broken = broken.len();
        }

        // 先提交数据库再写索引文件，两者不一致时由加载索引时的检查修复
        let saved = crud::save_embedding_batch(&self.db, &embeddings).await?;
        for (row_id, embedding) in &saved {
            index.add(*row_id as u64, &embedding.vector)?;
        }
        if !saved.is_empty() {
            index.save(index_path)?;
        }
        report.embedded = saved.len();

        pb.set_message(format!("已提交 {} 条向量", saved.len()));
        info!("批次提交: 成功 {}，损坏 {}，失败 {}", report.embedded, report.broken, report.failed);
        Ok(report)
    }

    async fn process(&self, row: PendingRow) -> Outcome {
        classify(row.id, self.embed(&row).await)
    }

    async fn embed(&self, row: &PendingRow) -> Result<NewEmbedding> {
        let url = row.image_url.trim();
        let bytes = self.retry.run(|| self.fetcher.fetch(url)).await?;

        let prepared = spawn_blocking(move || prepare(&bytes))
            .await
            .map_err(|e| Error::Task(e.to_string()))??;

        // 编码器的暂时故障不是图片的问题，下次运行时重试
        let mut vector = self
            .retry
            .run(|| self.encoder.encode_image(&prepared.jpeg))
            .await
            .map_err(|e| match e {
                Error::TransientUpstream(msg) => Error::EncoderUnavailable(msg),
                e => e,
            })?;
        l2_normalize(&mut vector);

        Ok(NewEmbedding { artwork_id: row.id, vector, focal_point: prepared.focal_point })
    }
}
