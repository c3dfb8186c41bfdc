use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{EncoderOptions, Opts, PipelineOptions};
use crate::db::init_db;
use crate::encoder::{Encoder, HttpEncoder};
use crate::index::UsearchIndex;
use crate::pipeline::{HttpFetcher, Pipeline};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct EmbedCommand {
    #[command(flatten)]
    pub encoder: EncoderOptions,
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    /// 删除所有已有向量并从头重建向量索引
    #[arg(long)]
    pub clean: bool,
}

impl SubCommandExtend for EmbedCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let encoder = Arc::new(HttpEncoder::from_options(&self.encoder)?);
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_millis(self.pipeline.fetch_timeout))?);
        let pipeline = Pipeline::new(db.clone(), fetcher, encoder.clone(), &self.pipeline);

        let index_path = opts.conf_dir.index();
        let mut index = if self.clean {
            pipeline.clean(&index_path).await?;
            UsearchIndex::new(encoder.dimension())?
        } else {
            UsearchIndex::load_or_rebuild(&index_path, &db, encoder.dimension()).await?
        };

        let pb = ProgressBar::no_length().with_style(pb_style());
        let report = pipeline.run(&mut index, &index_path, &pb).await?;
        pb.finish_with_message("向量计算完成");

        info!("{}", serde_json::to_string(&report)?);
        Ok(())
    }
}
