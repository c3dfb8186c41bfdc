use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::{crud, init_db};

#[derive(Parser, Debug, Clone)]
pub struct SourceCommand {
    /// 来源 ID
    pub id: i64,
    /// 来源名称
    #[arg(long)]
    pub name: Option<String>,
    /// 停用该来源，停用后不会出现在不限来源的搜索结果中
    #[arg(long)]
    pub disable: bool,
}

impl SubCommandExtend for SourceCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let name = self.name.clone().unwrap_or_else(|| format!("source-{}", self.id));
        crud::upsert_source(&db, self.id, &name, !self.disable).await?;
        info!("来源 {} ({name}) 已{}", self.id, if self.disable { "停用" } else { "启用" });
        Ok(())
    }
}
