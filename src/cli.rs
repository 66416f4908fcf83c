use crate::{
    config::Config,
    options::{ConversionOptions, PdfA},
    provider::{LibreOfficeFactory, Provider},
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "officegate")]
#[command(about = "Supervised headless office engine gateway (crash recovery + serialized conversions)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./officegate.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the engine binaries are installed and usable.
    Doctor {},
    /// List the input extensions the engine accepts.
    Extensions {},
    /// Convert a document to PDF or another format.
    Convert {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Target extension; omit for PDF.
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        page_ranges: Option<String>,
        /// PDF/A-1b, PDF/A-2b or PDF/A-3b.
        #[arg(long)]
        pdfa: Option<String>,
        #[arg(long)]
        pdfua: bool,
        #[arg(long)]
        landscape: bool,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        lossless: bool,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;
    let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg).await,
        Command::Extensions {} => extensions(&cfg),
        Command::Convert {
            input,
            output,
            format,
            page_ranges,
            pdfa,
            pdfua,
            landscape,
            password,
            lossless,
        } => {
            let options = ConversionOptions {
                page_ranges: page_ranges.clone(),
                pdfa: pdfa.as_deref().map(PdfA::parse).transpose()?,
                pdfua: *pdfua,
                landscape: *landscape,
                password: password.clone(),
                lossless_image_compression: *lossless,
                ..Default::default()
            };
            convert(&cfg, input, output, format.as_deref(), options).await
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("officegate.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("officegate.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from("officegate.log"))
}

async fn doctor(cfg: &Config) -> Result<()> {
    if cfg.debug.dump_effective_config {
        eprintln!("{}", toml::to_string(cfg).unwrap_or_default());
    }
    let diag = LibreOfficeFactory::new(cfg).doctor().await;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    if !diag.ok {
        return Err(anyhow!("engine is not usable"));
    }
    Ok(())
}

fn extensions(cfg: &Config) -> Result<()> {
    for ext in crate::engine::extensions::resolve(cfg) {
        println!("{ext}");
    }
    Ok(())
}

async fn convert(
    cfg: &Config,
    input: &Path,
    output: &Path,
    format: Option<&str>,
    options: ConversionOptions,
) -> Result<()> {
    validate_input(input)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling conversion");
            on_signal.cancel();
        }
    });

    let provider = Provider::libreoffice(cfg);
    let converter = provider.acquire().await?;

    let started = now_rfc3339();
    let result = match format {
        None | Some("pdf") => {
            converter
                .convert_to_pdf(&cancel, input, output, options)
                .await
        }
        Some(ext) => converter.convert_format(&cancel, input, output, ext).await,
    };

    if let Err(e) = converter.shutdown().await {
        warn!("engine shutdown failed: {e}");
    }
    result.with_context(|| format!("converting {}", input.display()))?;
    info!(output = %output.display(), "conversion finished");

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "output": output,
            "started": started,
            "finished": now_rfc3339(),
            "status": "ok"
        }))?
    );
    Ok(())
}

fn validate_input(input: &Path) -> Result<()> {
    let input_str = input.display().to_string();
    if looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are not supported: {input_str}"));
    }
    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }
    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}
