mod embed;
mod import;
mod search;
mod server;
mod source;
mod stats;

pub use embed::*;
pub use import::*;
pub use search::*;
pub use server::*;
pub use source::*;
pub use stats::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
