use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::impls::{HtmlDocument, MarkdownDocument, TracingProgressSink};
use ferry_core::{FerryError, RewriteManifest, RewriterBuilder, UploadConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DocumentFormat {
    Html,
    Markdown,
}

impl DocumentFormat {
    /// `.md` / `.markdown` are Markdown, everything else is treated as HTML.
    fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown") => {
                Self::Markdown
            }
            _ => Self::Html,
        }
    }
}

/// Re-host external images on the destination platform and rewrite the document.
#[derive(Debug, Parser)]
#[command(name = "ferry", version)]
struct Args {
    /// Document to rewrite
    input: PathBuf,

    /// Upload configuration (TOML)
    #[arg(short, long, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `platform.token` from the config file
    #[arg(long, env = "FERRY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Document format; detected from the file extension when omitted
    #[arg(short, long, value_enum)]
    format: Option<DocumentFormat>,

    /// Where to write the rewritten document (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Where to write the JSON manifest (stderr when omitted)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the document
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    tracing_subscriber::registry().with(filter).with(layer).init();
}

fn load_config(args: &Args) -> Result<UploadConfig, FerryError> {
    let mut config = match &args.config {
        Some(path) => UploadConfig::load(path)?,
        None => UploadConfig::default(),
    };
    if let Some(token) = &args.token {
        config.platform.token = Some(token.clone());
    }
    Ok(config)
}

async fn write_manifest(manifest: &RewriteManifest, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    match path {
        Some(path) => tokio::fs::write(path, json)
            .await
            .wrap_err_with(|| format!("failed to write manifest {}", path.display()))?,
        None => eprintln!("{json}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    let rewriter = RewriterBuilder::new(config)
        .http_uploader()
        .map_err(FerryError::from)?
        .progress_sink(Arc::new(TracingProgressSink))
        .build()
        .map_err(FerryError::from)?;

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .wrap_err_with(|| format!("failed to read {}", args.input.display()))?;
    let format = args
        .format
        .unwrap_or_else(|| DocumentFormat::detect(&args.input));
    info!(input = %args.input.display(), ?format, "rewriting document");

    let (document, manifest, stats) = match format {
        DocumentFormat::Html => {
            let outcome = rewriter.rewrite(HtmlDocument::new(raw)).await;
            (outcome.document.into_string(), outcome.manifest, outcome.stats)
        }
        DocumentFormat::Markdown => {
            let outcome = rewriter.rewrite(MarkdownDocument::new(raw)).await;
            (outcome.document.into_string(), outcome.manifest, outcome.stats)
        }
    };

    match &args.output {
        Some(path) => tokio::fs::write(path, &document)
            .await
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{document}"),
    }
    write_manifest(&manifest, args.manifest.as_deref()).await?;

    info!(
        total = stats.total,
        succeeded = stats.succeeded,
        failed = stats.failed,
        cached = stats.cached,
        cache_hits = stats.cache_hits,
        "done"
    );
    Ok(())
}
