//! Synergym Media CLI
//!
//! Command-line access to the authenticated image loader:
//! - Fetch protected images through the cache
//! - Create upload previews from local files
//! - Generate a default config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synergym_media::{
    create_image_preview, Blob, Config, HandleRegistry, HttpImageSource, ImageLoader, LocalHandle,
    LoggingConfig, SelectedFile, StaticToken,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "synergym-media")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Authenticated image loading for Synergym")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend API URL (overrides config)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Bearer token (overrides config)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch protected images by resource key
    Fetch {
        /// Resource keys (e.g. /users/204/profile-image)
        #[arg(required = true)]
        keys: Vec<String>,
        /// Fetch every key this many times (later rounds hit the cache)
        #[arg(short, long, default_value = "1")]
        repeat: usize,
        /// Save fetched images into this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Create an upload preview handle for a local file
    Preview {
        /// Image file
        path: PathBuf,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(url) = &cli.api_url {
        config.backend.base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.backend.token = Some(token.clone());
    }

    init_tracing(&config.logging);

    match cli.command {
        Commands::Fetch {
            keys,
            repeat,
            output_dir,
        } => fetch(&config, &keys, repeat, output_dir.as_deref(), &cli.format).await,
        Commands::Preview { path } => preview(&config, &path, &cli.format).await,
        Commands::Config { output } => {
            let content = synergym_media::config::generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("synergym_media={}", logging.level).into());

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_loader(config: &Config) -> anyhow::Result<ImageLoader> {
    let tokens = Arc::new(StaticToken::new(config.backend.token.clone()));
    let source = HttpImageSource::new(&config.backend.source_config(), tokens)?;
    let registry = Arc::new(HandleRegistry::new(config.media.origin.clone()));

    tracing::info!(base_url = %config.backend.base_url, "Image loader ready");
    Ok(ImageLoader::new(Arc::new(source), registry))
}

async fn fetch(
    config: &Config,
    keys: &[String],
    repeat: usize,
    output_dir: Option<&Path>,
    format: &str,
) -> anyhow::Result<()> {
    let loader = build_loader(config)?;
    if let Some(dir) = output_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut rows = Vec::new();
    let mut failures = 0;

    for round in 1..=repeat.max(1) {
        let outcomes = join_all(keys.iter().map(|key| loader.fetch(key))).await;

        for (key, outcome) in keys.iter().zip(outcomes) {
            match outcome {
                Ok(handle) => {
                    let blob = loader
                        .registry()
                        .resolve(&handle)
                        .context("handle revoked while in use")?;

                    if let (Some(dir), 1) = (output_dir, round) {
                        let path = dir.join(file_name_for(key, &blob.content_type));
                        tokio::fs::write(&path, &*blob.bytes).await?;
                        tracing::info!(key = %key, path = %path.display(), "Image saved");
                    }

                    rows.push(loaded_row(round, key, &handle, &blob));
                }
                Err(e) => {
                    failures += 1;
                    rows.push(serde_json::json!({
                        "round": round,
                        "key": key,
                        "error": e.to_string(),
                    }));
                }
            }
        }
    }

    let stats = loader.stats();

    if format == "json" {
        let output = serde_json::json!({ "results": rows, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{:<6} {:<40} RESULT", "ROUND", "KEY");
        println!("{}", "-".repeat(90));
        for row in &rows {
            let result = match row.get("error") {
                Some(error) => format!("error: {}", error.as_str().unwrap_or_default()),
                None => format!(
                    "{} ({}, {} bytes, loaded {})",
                    row["handle"].as_str().unwrap_or_default(),
                    row["content_type"].as_str().unwrap_or_default(),
                    row["bytes"],
                    row["created_at"].as_str().unwrap_or_default()
                ),
            };
            println!(
                "{:<6} {:<40} {}",
                row["round"].to_string(),
                row["key"].as_str().unwrap_or_default(),
                result
            );
        }
        println!();
        println!("{}", stats);
    }

    loader.clear_cache();

    if failures > 0 {
        anyhow::bail!("{} of {} fetches failed", failures, rows.len());
    }
    Ok(())
}

async fn preview(config: &Config, path: &Path, format: &str) -> anyhow::Result<()> {
    let file = SelectedFile::from_path(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if !file.is_image() {
        anyhow::bail!("{} is not an image ({})", file.name, file.content_type);
    }

    let registry = HandleRegistry::new(config.media.origin.clone());
    let handle = create_image_preview(&registry, &file);

    if format == "json" {
        let output = serde_json::json!({
            "file": file.name,
            "handle": handle.to_string(),
            "content_type": file.content_type,
            "bytes": file.len(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("File:         {}", file.name);
        println!("Handle:       {}", handle);
        println!("Content type: {}", file.content_type);
        println!("Size:         {} bytes", file.len());
    }

    registry.revoke(&handle);
    Ok(())
}

/// Output row for a key that resolved to a live handle
fn loaded_row(round: usize, key: &str, handle: &LocalHandle, blob: &Blob) -> serde_json::Value {
    serde_json::json!({
        "round": round,
        "key": key,
        "handle": handle.to_string(),
        "content_type": blob.content_type,
        "bytes": blob.len(),
        "created_at": blob.created_at.to_rfc3339(),
    })
}

/// File name for a saved image, derived from its resource key
fn file_name_for(key: &str, content_type: &str) -> String {
    let stem: String = key
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();

    let ext = match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "bin",
    };

    format!("{}.{}", if stem.is_empty() { "image" } else { stem.as_str() }, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_for() {
        assert_eq!(
            file_name_for("/users/204/profile-image", "image/png"),
            "users_204_profile-image.png"
        );
        assert_eq!(file_name_for("/", "application/pdf"), "image.bin");
    }

    #[test]
    fn test_loaded_row_reports_load_time() {
        let registry = HandleRegistry::new("http://localhost:3000");
        let handle = registry.create(
            Arc::from(&b"img"[..]),
            "image/png",
            synergym_media::Provenance::Remote("/posts/1/images/1".into()),
        );
        let blob = registry.resolve(&handle).unwrap();

        let row = loaded_row(2, "/posts/1/images/1", &handle, &blob);
        assert_eq!(row["round"], 2);
        assert_eq!(row["handle"], handle.to_string());
        assert_eq!(row["bytes"], 3);
        assert_eq!(row["created_at"], blob.created_at.to_rfc3339());
    }

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::parse_from([
            "synergym-media",
            "fetch",
            "/users/204/profile-image",
            "/posts/1/images/1",
            "--repeat",
            "2",
            "--format",
            "json",
        ]);

        assert_eq!(cli.format, "json");
        match cli.command {
            Commands::Fetch { keys, repeat, .. } => {
                assert_eq!(keys.len(), 2);
                assert_eq!(repeat, 2);
            }
            _ => panic!("expected fetch"),
        }
    }
}
