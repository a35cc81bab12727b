//! Logging setup for master and render nodes
//!
//! Every process logs through `tracing`. The master usually runs attended and
//! logs compact lines to the console; render nodes run headless, so they
//! default to JSON on the console plus a daily rolling file named after the
//! node. The startup event carries the role and node name so merged logs from
//! a whole cluster can be told apart.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::context::Role;

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

/// Console output style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleFormat {
    #[default]
    Compact,
    Json,
    Off,
}

impl ConsoleFormat {
    /// `CLUSTER_LOG_FORMAT` value, if it names a format
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(ConsoleFormat::Compact),
            "json" => Some(ConsoleFormat::Json),
            "off" | "none" => Some(ConsoleFormat::Off),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("cannot create log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("a global subscriber is already installed: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub role: Role,
    /// Shown in the startup event and used for the log file name
    pub node_name: String,
    pub console: ConsoleFormat,
    /// Directory for the rolling log file; no file output when `None`
    pub file_dir: Option<PathBuf>,
    /// Filter used when neither `CLUSTER_LOG` nor `RUST_LOG` is set
    pub default_level: String,
}

impl LogConfig {
    /// Defaults for a role: the master logs compact lines to the console,
    /// nodes log JSON and keep a file in the local data directory.
    pub fn for_role(role: Role, node_name: impl Into<String>) -> Self {
        let (console, file_dir) = match role {
            Role::Master => (ConsoleFormat::Compact, None),
            Role::Node => (ConsoleFormat::Json, Some(Self::default_log_dir())),
        };
        Self {
            role,
            node_name: node_name.into(),
            console,
            file_dir,
            default_level: "info".to_string(),
        }
    }

    pub fn default_log_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("immersive-cluster")
            .join("logs")
    }

    /// Base name of the rolling file; the appender adds the date
    pub fn file_prefix(&self) -> String {
        let node: String = self
            .node_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        if node.is_empty() {
            format!("{}.log", role_name(self.role))
        } else {
            format!("{}-{}.log", role_name(self.role), node)
        }
    }

    /// Console format after the `CLUSTER_LOG_FORMAT` override
    pub fn effective_console(&self) -> ConsoleFormat {
        std::env::var("CLUSTER_LOG_FORMAT")
            .ok()
            .and_then(|v| ConsoleFormat::parse(&v))
            .unwrap_or(self.console)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env("CLUSTER_LOG")
            .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
            .unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::for_role(Role::Master, "")
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Master => "master",
        Role::Node => "node",
    }
}

fn rolling_file(dir: &Path, prefix: &str) -> Result<RollingFileAppender, LogInitError> {
    std::fs::create_dir_all(dir).map_err(|source| LogInitError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(RollingFileAppender::new(Rotation::DAILY, dir, prefix))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until shutdown so buffered file output is
/// flushed. `CLUSTER_LOG` (then `RUST_LOG`) overrides the level filter, e.g.
/// `CLUSTER_LOG=info,immersive_cluster::sync=trace`.
///
/// ```no_run
/// use immersive_cluster::telemetry::{init_logging, LogConfig};
/// use immersive_cluster::Role;
///
/// let _guard = init_logging(&LogConfig::for_role(Role::Node, "dome-left")).expect("logging");
/// ```
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LogInitError> {
    let console = config.effective_console();

    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling_file(dir, &config.file_prefix())?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let compact_layer = (console == ConsoleFormat::Compact).then(|| fmt::layer().compact());
    let json_layer = (console == ConsoleFormat::Json).then(|| fmt::layer().json().with_thread_names(true));

    tracing_subscriber::registry()
        .with(config.filter())
        .with(file_layer)
        .with(compact_layer)
        .with(json_layer)
        .try_init()?;

    tracing::info!(
        target: "immersive_cluster",
        version = env!("CARGO_PKG_VERSION"),
        role = role_name(config.role),
        node = %config.node_name,
        console = ?console,
        file = config.file_dir.is_some(),
        "Logging initialized"
    );
    Ok(guard)
}
