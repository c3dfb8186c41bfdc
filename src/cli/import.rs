use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::{ArtworkRecord, crud, init_db};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct ImportCommand {
    /// JSON Lines 文件，每行一条藏品记录
    pub path: PathBuf,
    /// 多少条记录为一个事务
    #[arg(short, long, value_name = "SIZE", default_value_t = 1000)]
    pub batch_size: usize,
}

impl SubCommandExtend for ImportCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("无法打开 {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let pb = ProgressBar::no_length().with_style(pb_style());
        let batch_size = self.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let (mut imported, mut skipped, mut lineno) = (0usize, 0usize, 0usize);

        while let Some(line) = lines.next_line().await? {
            lineno += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ArtworkRecord>(line) {
                Ok(record) => batch.push(record),
                Err(e) => {
                    warn!("第 {lineno} 行格式错误，已跳过: {e}");
                    skipped += 1;
                }
            }
            if batch.len() >= batch_size {
                imported += write_batch(&db, &mut batch).await?;
                pb.set_position(imported as u64);
            }
        }
        imported += write_batch(&db, &mut batch).await?;

        pb.finish_with_message("导入完成");
        info!("导入 {imported} 条藏品记录，跳过 {skipped} 行");
        Ok(())
    }
}

async fn write_batch(db: &crate::db::Database, batch: &mut Vec<ArtworkRecord>) -> anyhow::Result<usize> {
    if batch.is_empty() {
        return Ok(0);
    }
    let mut tx = db.begin().await?;
    for record in batch.iter() {
        crud::ensure_source(&mut *tx, record.source_id).await?;
        crud::upsert_artwork(&mut *tx, record).await?;
    }
    tx.commit().await?;
    let n = batch.len();
    batch.clear();
    Ok(n)
}
