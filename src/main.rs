//! # PDF Explainer CLI (`explainer`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `explainer serve` | Start the HTTP server |
//! | `explainer check` | Validate configuration and credential (no network) |
//! | `explainer explain` | Run one request through the pipeline and print the envelope |
//!
//! ## Examples
//!
//! ```bash
//! # Serve on the configured bind address
//! explainer serve --config ./config/explainer.toml
//!
//! # Serve on a different address
//! explainer serve --bind 0.0.0.0:8080
//!
//! # Explain page 3 of a document from an extracted text file
//! explainer explain --file page3.txt --page 3
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use pdf_explainer::config::{self, CredentialStatus, DEFAULT_CONFIG_PATH};
use pdf_explainer::pipeline::{InboundRequest, Pipeline};
use pdf_explainer::{logging, server};
use std::path::PathBuf;
use std::sync::Arc;

/// PDF Explainer: explain PDF page text with an LLM provider.
#[derive(Parser)]
#[command(
    name = "explainer",
    about = "PDF Explainer: validate PDF page text and explain it through an LLM provider",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When omitted and `./config/explainer.toml` does not exist, built-in
    /// defaults are used. Environment variables override file values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Serves `POST /api/explain-pdf` and `GET /health`.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Validate configuration and report credential status.
    ///
    /// Exits non-zero when the configuration is invalid or the provider
    /// credential is missing or malformed. Makes no network calls.
    Check,

    /// Explain a single piece of text and print the response envelope.
    Explain {
        /// Read the text from this file.
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,

        /// Text to explain.
        #[arg(long)]
        text: Option<String>,

        /// Page number the text came from.
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = match &cli.config {
        Some(path) => config::load_config(path, true)?,
        None => config::load_config(&PathBuf::from(DEFAULT_CONFIG_PATH), false)?,
    };

    match cli.command {
        Commands::Serve { bind } => {
            let mut cfg = cfg;
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            tracing::info!(
                model = %cfg.provider.model,
                key = %cfg.provider.masked_key(),
                rate_limit = cfg.rate_limit.enabled,
                "starting explainer"
            );
            server::run_server(&cfg).await?;
        }
        Commands::Check => {
            println!("provider:    {}", cfg.provider.base_url);
            println!("model:       {}", cfg.provider.model);
            println!("bind:        {}", cfg.server.bind);
            println!(
                "text length: {}..={} chars",
                cfg.limits.min_text_len, cfg.limits.max_text_len
            );
            println!(
                "dispatch:    {} ms per attempt, {} retries",
                cfg.dispatch.attempt_timeout_ms, cfg.dispatch.max_retries
            );
            if cfg.rate_limit.enabled {
                println!(
                    "rate limit:  {} requests / {} s",
                    cfg.rate_limit.max_requests, cfg.rate_limit.window_secs
                );
            } else {
                println!("rate limit:  disabled");
            }
            match cfg.provider.credential_status() {
                CredentialStatus::Valid => {
                    println!("credential:  ok ({})", cfg.provider.masked_key());
                }
                CredentialStatus::Missing => {
                    anyhow::bail!("{} is not set", cfg.provider.api_key_env);
                }
                CredentialStatus::Malformed => {
                    anyhow::bail!(
                        "{} does not start with \"{}\"",
                        cfg.provider.api_key_env,
                        cfg.provider.key_prefix
                    );
                }
            }
        }
        Commands::Explain { file, text, page } => {
            let text = match (file, text) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, Some(text)) => text,
                (None, None) => anyhow::bail!("either --file or --text is required"),
            };

            let mut cfg = cfg;
            cfg.rate_limit.enabled = false;
            let pipeline = Pipeline::from_config(Arc::new(cfg))?;

            let body = serde_json::json!({ "text": text, "page_number": page });
            let response = pipeline
                .handle(InboundRequest::post_json(body.to_string()))
                .await;

            let envelope = response
                .envelope
                .context("pipeline returned no envelope for a POST")?;
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            if !envelope.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
