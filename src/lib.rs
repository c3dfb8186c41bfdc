pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod encoder;
pub mod error;
pub mod index;
pub mod listing;
mod metrics;
pub mod pipeline;
pub mod retry;
pub mod search;
pub mod server;
pub mod similarity;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
