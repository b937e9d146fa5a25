pub mod cli;
pub mod config;
pub mod dataset;
pub mod embed;
pub mod imdb;
pub mod index;
mod metrics;
pub mod server;
pub mod utils;

pub use config::{DataDir, Opts};
pub use imdb::ImageIndex;
