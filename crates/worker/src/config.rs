//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pix360_core::http::{RetryPolicy, DEFAULT_RETRIES, DEFAULT_TIMEOUT};
use pix360_core::stitching::compositor::ImageCompositor;
use pix360_core::stitching::projection::SoftwareProjector;
use pix360_core::stitching::renderer::{ExternalRenderer, DEFAULT_BINARY};
use pix360_core::stitching::{CubemapProjector, StitchingEngine};

use crate::dispatcher::DEFAULT_POLL_INTERVAL;

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Which cubemap projector the stitching engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StitcherKind {
    /// The `cube2sphere` binary.
    #[default]
    External,
    /// The built-in software projector.
    Software,
}

impl FromStr for StitcherKind {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "external" | "cube2sphere" => Ok(Self::External),
            "software" => Ok(Self::Software),
            _ => Err(()),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Sleep between claim attempts while the queue is empty.
    pub poll_interval: Duration,
    /// Cubemap projection strategy.
    pub stitcher: StitcherKind,
    /// Renderer binary, looked up on `PATH` unless it contains a separator.
    pub cube2sphere_path: PathBuf,
    /// Optional pause after a failed render.
    pub renderer_failure_backoff: Option<Duration>,
    /// Fetch attempts per URL.
    pub http_retries: u32,
    /// Per-attempt fetch timeout.
    pub http_timeout: Duration,
    /// Plugin manifest; `None` installs every built-in downloader.
    pub modules_manifest: Option<PathBuf>,
    /// Persist raw faces and tiles as non-result assets.
    pub keep_intermediate_assets: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default        |
    /// |---------------------------------|----------------|
    /// | `DATABASE_URL`                  | required       |
    /// | `WORKER_POLL_INTERVAL_MS`       | `1000`         |
    /// | `STITCHER`                      | `external`     |
    /// | `CUBE2SPHERE_PATH`              | `cube2sphere`  |
    /// | `RENDERER_FAILURE_BACKOFF_SECS` | unset          |
    /// | `HTTP_RETRIES`                  | `3`            |
    /// | `HTTP_TIMEOUT_SECS`             | `10`           |
    /// | `MODULES_MANIFEST`              | unset          |
    /// | `KEEP_INTERMEDIATE_ASSETS`      | `false`        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let poll_interval = match get("WORKER_POLL_INTERVAL_MS") {
            Some(v) => Duration::from_millis(parse(
                "WORKER_POLL_INTERVAL_MS",
                &v,
                "a number of milliseconds",
            )?),
            None => DEFAULT_POLL_INTERVAL,
        };

        let stitcher = match get("STITCHER") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                name: "STITCHER",
                expected: "'external' or 'software'",
                value: v.clone(),
            })?,
            None => StitcherKind::default(),
        };

        let cube2sphere_path = get("CUBE2SPHERE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY));

        let renderer_failure_backoff = get("RENDERER_FAILURE_BACKOFF_SECS")
            .map(|v| parse("RENDERER_FAILURE_BACKOFF_SECS", &v, "a number of seconds"))
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let http_retries = match get("HTTP_RETRIES") {
            Some(v) => parse::<u32>("HTTP_RETRIES", &v, "a positive integer")?.max(1),
            None => DEFAULT_RETRIES,
        };

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse("HTTP_TIMEOUT_SECS", &v, "a number of seconds")?),
            None => DEFAULT_TIMEOUT,
        };

        let modules_manifest = get("MODULES_MANIFEST").map(PathBuf::from);

        let keep_intermediate_assets = match get("KEEP_INTERMEDIATE_ASSETS") {
            Some(v) => parse_bool("KEEP_INTERMEDIATE_ASSETS", &v)?,
            None => false,
        };

        Ok(Self {
            database_url,
            poll_interval,
            stitcher,
            cube2sphere_path,
            renderer_failure_backoff,
            http_retries,
            http_timeout,
            modules_manifest,
            keep_intermediate_assets,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.http_retries,
            timeout: self.http_timeout,
        }
    }

    /// Build the stitching engine for the configured projector.
    pub fn stitching_engine(&self) -> StitchingEngine {
        let projector: Arc<dyn CubemapProjector> = match self.stitcher {
            StitcherKind::External => Arc::new(
                ExternalRenderer::new(Some(self.cube2sphere_path.clone()))
                    .with_failure_backoff(self.renderer_failure_backoff),
            ),
            StitcherKind::Software => Arc::new(SoftwareProjector),
        };
        StitchingEngine::new(Arc::new(ImageCompositor), projector)
    }
}

fn parse<T: FromStr>(
    name: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value: value.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a boolean",
            value: value.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
