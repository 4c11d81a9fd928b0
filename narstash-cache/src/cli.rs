//! Command line interface.
//!
//! Without a subcommand the binary serves the cache over HTTP, like it
//! always did. The other commands are maintenance jobs meant for cron or
//! CI and exit when done.

use std::path::PathBuf;
use std::time::Duration;

use actix_web::{App, HttpServer, middleware, web};
use clap::{Parser, Subcommand};
use narstash_storage::{Backend, GithubBackend, PruneOptions};
use narstash_store_core::SigningKey;

use crate::config::{self, Config};
use crate::error::{IoErrorContext, Result, ServerError};
use crate::generate::generate;

/// Nix binary cache on local disk, S3 or GitHub Releases.
#[derive(Parser, Debug)]
#[command(name = "narstash-cache")]
#[command(version, about)]
#[command(after_help = concat!(
    "CONFIGURATION:\n",
    "  Read from $CONFIG_FILE, else ./settings.toml, else built-in defaults.\n",
    "  SIGN_KEY_PATH, UPLOAD_TOKEN, NIX_STORE_DIR and GITHUB_TOKEN override the file.",
))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the cache over HTTP (default when no subcommand given).
    Serve,

    /// Write a static copy of the cache to a directory.
    Generate {
        /// Output directory.
        #[arg(short, long, value_name = "DIR")]
        out: PathBuf,

        /// Address the copy will be published at, shown on the landing page.
        #[arg(long, value_name = "URL", default_value = ".")]
        base_url: String,
    },

    /// Copy narinfo records mirrored into the release by other writers.
    FetchNarinfo,

    /// Delete release assets no narinfo refers to.
    Prune {
        /// Keep orphaned assets younger than this many days.
        #[arg(long, value_name = "DAYS", default_value_t = 7)]
        retention_days: u32,
    },

    /// Print a fresh secret key and its public key.
    GenerateKey {
        /// Key name, conventionally `<cache host>-<n>`.
        name: String,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = config::load()?;
            let backend = Backend::open(&config.storage).await?;
            serve(config, backend).await
        }
        Command::Generate { out, base_url } => {
            let config = config::load()?;
            let backend = Backend::open(&config.storage).await?;
            if let Some(github) = backend.as_github() {
                github.fetch_all_narinfo().await?;
            }
            let report = generate(&config, &backend, &out, &base_url).await?;
            println!(
                "{} narinfo, {} NARs copied, {} skipped",
                report.narinfo,
                report.nars_copied,
                report.skipped.len()
            );
            Ok(())
        }
        Command::FetchNarinfo => {
            let config = config::load()?;
            let backend = Backend::open(&config.storage).await?;
            let fetched = require_github(&backend, "fetch-narinfo")?
                .fetch_all_narinfo()
                .await?;
            println!("fetched {fetched} narinfo records");
            Ok(())
        }
        Command::Prune { retention_days } => {
            let config = config::load()?;
            let backend = Backend::open(&config.storage).await?;
            let report = require_github(&backend, "prune")?
                .fetch_and_prune(PruneOptions { retention_days })
                .await?;
            for name in &report.deleted {
                println!("deleted {name}");
            }
            for name in &report.kept {
                println!("kept {name}");
            }
            println!(
                "{} deleted, {} kept, {} referenced",
                report.deleted.len(),
                report.kept.len(),
                report.referenced.len()
            );
            Ok(())
        }
        Command::GenerateKey { name } => {
            let key = SigningKey::generate(&name)?;
            println!("{}", key.to_text());
            println!("{}", key.public_key().to_text());
            Ok(())
        }
    }
}

fn require_github<'a>(backend: &'a Backend, command: &'static str) -> Result<&'a GithubBackend> {
    backend.as_github().ok_or_else(|| {
        ServerError::UnsupportedBackend {
            command,
            backend: backend.kind(),
        }
        .into()
    })
}

pub async fn serve(config: Config, backend: Backend) -> Result<()> {
    let config = web::Data::new(config);
    let backend = web::Data::new(backend);
    let bind = config.bind.clone();
    let workers = config.workers;

    log::info!("listening on {bind} ({} storage)", backend.kind());
    let config_data = config.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(config_data.clone())
            .app_data(backend.clone())
            .configure(crate::routes)
    })
    // default is 5 seconds, which is too small for large uploads on slow links
    .client_request_timeout(Duration::from_secs(30))
    .workers(workers)
    .bind(bind)
    .io_context("Failed to bind server")?
    .run()
    .await
    .io_context("Failed to start server")
}
