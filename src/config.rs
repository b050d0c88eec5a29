use crate::services::{
    key_router::{DEFAULT_ORIGINAL_PREFIX, DEFAULT_RESIZED_PREFIX, RoutingRules},
    resize_service::{DEFAULT_THUMBNAIL_WIDTH, MAX_THUMBNAIL_WIDTH},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Run the pipeline for objects uploaded through this service.
    pub notify_on_upload: bool,
    pub pipeline: PipelineConfig,
}

/// Everything a pipeline invocation needs to know.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub destination_bucket: String,
    pub thumbnail_width: u32,
    pub rules: RoutingRules,
}

/// Command-line overrides for the environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Event-driven image thumbnailer")]
pub struct Args {
    /// Host to bind to (overrides THUMBNAILER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides THUMBNAILER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides THUMBNAILER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides THUMBNAILER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket thumbnails are written to (overrides DEST_BUCKET)
    #[arg(long)]
    pub dest_bucket: Option<String>,

    /// Thumbnail width in pixels (overrides THUMBNAIL_WIDTH)
    #[arg(long)]
    pub thumbnail_width: Option<u32>,

    /// Apply the metadata schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables returned by `lookup`, then validate.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("THUMBNAILER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "THUMBNAILER_PORT", 3000u16)?;
        let env_storage =
            lookup("THUMBNAILER_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("THUMBNAILER_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/thumbnailer.db".into());
        let env_width = parse_var(&lookup, "THUMBNAIL_WIDTH", DEFAULT_THUMBNAIL_WIDTH)?;
        let notify_on_upload = parse_flag(&lookup, "THUMBNAILER_NOTIFY_ON_UPLOAD", true)?;

        let destination_bucket = args
            .dest_bucket
            .or_else(|| lookup("DEST_BUCKET"))
            .map(|bucket| bucket.trim().to_string())
            .filter(|bucket| !bucket.is_empty())
            .context("DEST_BUCKET is not set")?;

        let rules = RoutingRules {
            resized_prefix: lookup("THUMBNAILER_RESIZED_PREFIX")
                .unwrap_or_else(|| DEFAULT_RESIZED_PREFIX.into()),
            original_prefix: lookup("THUMBNAILER_ORIGINAL_PREFIX")
                .unwrap_or_else(|| DEFAULT_ORIGINAL_PREFIX.into()),
            supported_extensions: match lookup("THUMBNAILER_EXTENSIONS") {
                Some(list) => parse_extensions(&list),
                None => RoutingRules::default().supported_extensions,
            },
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            notify_on_upload,
            pipeline: PipelineConfig {
                destination_bucket,
                thumbnail_width: args.thumbnail_width.unwrap_or(env_width),
                rules,
            },
        };
        cfg.pipeline.validate()?;
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.thumbnail_width == 0 || self.thumbnail_width > MAX_THUMBNAIL_WIDTH {
            bail!(
                "THUMBNAIL_WIDTH must be 1-{}, got {}",
                MAX_THUMBNAIL_WIDTH,
                self.thumbnail_width
            );
        }
        if self.rules.resized_prefix.is_empty() {
            bail!("THUMBNAILER_RESIZED_PREFIX must not be empty");
        }
        if self.rules.resized_prefix == self.rules.original_prefix {
            bail!(
                "resized and original prefixes must differ (both `{}`)",
                self.rules.resized_prefix
            );
        }
        if self.rules.supported_extensions.is_empty() {
            bail!("THUMBNAILER_EXTENSIONS must list at least one extension");
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("parsing {} value `{}`: expected a boolean", name, value),
        },
        None => Ok(default),
    }
}

/// Comma-separated list; entries are trimmed, lower-cased and lose a leading dot.
fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
