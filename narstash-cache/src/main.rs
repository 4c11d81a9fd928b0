#![warn(clippy::dbg_macro)]

use clap::Parser;
use narstash_cache::cli::{self, Cli};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    cli::run(cli).await.map_err(std::io::Error::other)
}
