use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::trace::{JsonLinesTracer, LogTracer, Tracer};

pub const DEFAULT_MAX_DEPTH: u32 = 25;
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 32;

/// What a "continue" decision does once the depth ceiling was reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContinuePolicy {
    /// Depth goes back to zero; the ceiling is unchanged.
    #[default]
    Reset,
    /// Depth is kept and the ceiling is raised by `by` rounds.
    Extend { by: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_depth: u32,
    pub continue_policy: ContinuePolicy,
    pub batch_timeout_ms: Option<u64>,
    pub max_concurrent_tools: usize,
    pub trace_log_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            continue_policy: ContinuePolicy::Reset,
            batch_timeout_ms: None,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
            trace_log_file: None,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the process environment, loading `.env` first if present.
    ///
    /// Unset, unparsable, or zero values keep their defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let continue_policy = match read_positive::<u32>(&lookup, "AURORA_DEPTH_EXTEND_BY") {
            Some(by) => ContinuePolicy::Extend { by },
            None => defaults.continue_policy,
        };
        Self {
            max_depth: read_positive(&lookup, "AURORA_MAX_DEPTH").unwrap_or(defaults.max_depth),
            continue_policy,
            batch_timeout_ms: read_positive(&lookup, "AURORA_BATCH_TIMEOUT_MS"),
            max_concurrent_tools: read_positive(&lookup, "AURORA_MAX_CONCURRENT_TOOLS")
                .unwrap_or(defaults.max_concurrent_tools),
            trace_log_file: lookup("TRACE_LOG_FILE")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|error| CoreError::Config(format!("{}: {error}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_depth == 0 {
            return Err(CoreError::Config("max_depth must be at least 1".to_string()));
        }
        if self.max_concurrent_tools == 0 {
            return Err(CoreError::Config(
                "max_concurrent_tools must be at least 1".to_string(),
            ));
        }
        if let ContinuePolicy::Extend { by: 0 } = self.continue_policy {
            return Err(CoreError::Config(
                "continue_policy extend must add at least 1 round".to_string(),
            ));
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }

    /// Tracer for this configuration: a JSON-lines file when `trace_log_file` is set,
    /// otherwise events go to the `tracing` subscriber.
    pub fn tracer(&self) -> Arc<dyn Tracer> {
        let Some(path) = &self.trace_log_file else {
            return Arc::new(LogTracer);
        };
        match JsonLinesTracer::open(path) {
            Ok(tracer) => Arc::new(tracer),
            Err(error) => {
                tracing::warn!(
                    "failed to open trace log {}: {}; falling back to log tracer",
                    path.display(),
                    error
                );
                Arc::new(LogTracer)
            }
        }
    }
}

fn read_positive<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}
