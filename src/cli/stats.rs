use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::{crud, init_db};

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let counts = crud::get_counts(&db).await?;
        let indexed = crud::count_vector_rows(&db).await?;
        println!("artworks  : {}", counts.artworks);
        println!("embeddings: {}", counts.embeddings);
        println!("indexed   : {indexed}");
        println!("broken    : {}", counts.broken);
        Ok(())
    }
}
