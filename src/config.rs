use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::services::upload_policy::DEFAULT_MAX_FILE_SIZE;

const DEFAULT_TEMP_MAX_AGE_SECS: u64 = 3600;

/// Centralized application configuration.
/// CLI arguments take precedence over `ATS_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub upload_dir: String,
    pub max_file_size: u64,
    pub environment: String,
}

/// What the process should do once configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    /// Sweep unreferenced CVs and stale temp files older than the given age.
    Reconcile { min_age: Duration },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Applicant tracking REST API")]
pub struct Args {
    /// Host to bind to (overrides ATS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ATS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides ATS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory holding `cvs/` and `temp/` (overrides ATS_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Maximum CV size in bytes (overrides ATS_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "reconcile")]
    pub migrate: bool,

    /// Remove orphaned CV and temp files, then exit
    #[arg(long)]
    pub reconcile: bool,

    /// Files younger than this are left alone by --reconcile
    #[arg(long, default_value_t = DEFAULT_TEMP_MAX_AGE_SECS)]
    pub temp_max_age_secs: u64,
}

impl AppConfig {
    /// Load `.env` if present, then merge environment variables and CLI args.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        // A missing .env is normal outside development.
        let _ = dotenvy::dotenv();
        let args = Args::parse();
        Self::from_args(args)
    }

    pub fn from_args(args: Args) -> Result<(Self, RunMode)> {
        let env_host = env::var("ATS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("ATS_PORT", 3010u16)?;
        let env_db =
            env::var("ATS_DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/ats.db".into());
        let env_upload = env::var("ATS_UPLOAD_DIR").unwrap_or_else(|_| "./data/ats-files".into());
        let env_max = parse_env("ATS_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?;
        let environment = env::var("ATS_ENV").unwrap_or_else(|_| "development".into());

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            upload_dir: args.upload_dir.unwrap_or(env_upload),
            max_file_size: args.max_file_size.unwrap_or(env_max),
            environment,
        };
        if cfg.max_file_size == 0 {
            anyhow::bail!("max file size must be greater than zero");
        }

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile {
                min_age: Duration::from_secs(args.temp_max_age_secs),
            }
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {key}")),
    }
}
