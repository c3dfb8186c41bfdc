use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;

use crate::cache::CacheService;
use crate::cli::SubCommandExtend;
use crate::config::{EncoderOptions, Opts, SearchOptions};
use crate::db::init_db;
use crate::encoder::{Encoder, HttpEncoder};
use crate::index::{UsearchIndex, shared};
use crate::search::{QueryRouter, Routed, SearchQuery};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub encoder: EncoderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 查询文本，可以是颜色、自然语言描述或关键词
    pub text: String,
    /// 仅搜索该来源
    #[arg(short, long, value_name = "ID")]
    pub source: Option<i64>,
    #[arg(short, long, default_value_t = 24)]
    pub limit: usize,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let encoder = Arc::new(HttpEncoder::from_options(&self.encoder)?);
        let index =
            UsearchIndex::load_or_rebuild(&opts.conf_dir.index(), &db, encoder.dimension()).await?;
        let router = QueryRouter::new(
            db,
            shared(index),
            encoder,
            Arc::new(CacheService::default()),
            self.search.clone(),
        );

        let query = SearchQuery::new(&self.text)
            .with_page(self.limit, self.offset)
            .with_source(self.source);
        let routed = router.search(&query).await?;
        debug!("搜索模式: {}", routed.mode.as_str());

        print_result(&routed, self)
    }
}

fn print_result(routed: &Routed, opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(routed)?)
        }
        OutputFormat::Table => {
            for hit in &routed.hits {
                println!("{:.2}\t{}\t{}", hit.score, hit.artwork.id, hit.artwork.title);
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
