use crate::{errors::StagingError, services::asset_service::UploadLimits};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const ENV_PREFIX: &str = "THEME_STORE_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_root: String,
    pub public_base: String,
    pub database_url: String,
    pub max_upload_bytes: usize,
    pub max_image_dimension: u32,
    pub image_quality: u8,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Theme asset staging and promotion service")]
pub struct Args {
    /// Host to bind to (overrides THEME_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides THEME_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where theme images are stored (overrides THEME_STORE_STORAGE_ROOT)
    #[arg(long)]
    pub storage_root: Option<String>,

    /// Public path or URL prefix stored files are served under (overrides THEME_STORE_PUBLIC_BASE)
    #[arg(long)]
    pub public_base: Option<String>,

    /// Database URL (overrides THEME_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload in bytes (overrides THEME_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Longest stored image side in pixels (overrides THEME_STORE_MAX_IMAGE_DIMENSION)
    #[arg(long)]
    pub max_image_dimension: Option<u32>,

    /// WebP quality of stored images, 1-100 (overrides THEME_STORE_IMAGE_QUALITY)
    #[arg(long)]
    pub image_quality: Option<u8>,

    /// Run migrations and exit
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

    /// Merge CLI args over variables read through `lookup`, then defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let defaults = UploadLimits::default();

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(port) => port,
                None => parse_var(&var, "PORT")?.unwrap_or(3000),
            },
            storage_root: args
                .storage_root
                .or_else(|| var("STORAGE_ROOT"))
                .unwrap_or_else(|| "./data/storage".into()),
            public_base: args
                .public_base
                .or_else(|| var("PUBLIC_BASE"))
                .unwrap_or_else(|| "/media".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/theme_store.db".into()),
            max_upload_bytes: match args.max_upload_bytes {
                Some(limit) => limit,
                None => parse_var(&var, "MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes),
            },
            max_image_dimension: match args.max_image_dimension {
                Some(limit) => limit,
                None => parse_var(&var, "MAX_IMAGE_DIMENSION")?
                    .unwrap_or(defaults.max_image_dimension),
            },
            image_quality: match args.image_quality {
                Some(quality) => quality,
                None => parse_var(&var, "IMAGE_QUALITY")?.unwrap_or(defaults.image_quality),
            },
        };

        if cfg.storage_root.trim().is_empty() {
            return Err(StagingError::StorageMisconfigured("storage root is blank".into()).into());
        }
        if cfg.public_base.trim().trim_end_matches('/').is_empty() {
            return Err(StagingError::StorageMisconfigured("public base is blank".into()).into());
        }
        if cfg.max_upload_bytes == 0 || cfg.max_image_dimension == 0 {
            return Err(StagingError::StorageMisconfigured(
                "upload limits must be greater than zero".into(),
            )
            .into());
        }
        if !(1..=100).contains(&cfg.image_quality) {
            return Err(StagingError::StorageMisconfigured(
                "image quality must be between 1 and 100".into(),
            )
            .into());
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            max_upload_bytes: self.max_upload_bytes,
            max_image_dimension: self.max_image_dimension,
            image_quality: self.image_quality,
        }
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{}`", value))
        })
        .transpose()
}
