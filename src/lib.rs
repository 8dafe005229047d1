pub mod commands;
pub mod config;
pub mod providers;

use std::path::{Path, PathBuf};

pub use config::HostSettings;
pub use providers::{
    Catalog, ErrorKind, ProviderConfig, ProviderError, ProviderManager, Registry, ToolRouter,
};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TOOLBRIDGE_DATA_DIR";

/// Return the directory holding the provider store, settings and logs.
///
/// - `$TOOLBRIDGE_DATA_DIR` when set
/// - macOS: `~/Library/Application Support/toolbridge/`
/// - Windows: `{FOLDERID_RoamingAppData}\toolbridge\`
/// - Linux: `$XDG_DATA_HOME/toolbridge/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.toolbridge/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolbridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolbridge")
}

/// Initialize the tracing subscriber, writing to `toolbridge.log` in `log_dir`.
///
/// On each start:
/// 1. Rotates existing logs (toolbridge.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh toolbridge.log with a line-flushing writer.
/// 3. Logs a startup banner with the log file path.
///
/// `RUST_LOG` overrides the default filter. `TOOLBRIDGE_LOG_FORMAT=json`
/// switches to JSON lines. Returns the log file path.
pub fn init_tracing(log_dir: &Path) -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("toolbridge.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("toolbridge=info,warn"));

    let json = std::env::var("TOOLBRIDGE_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let installed = if json {
        fmt::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .try_init()
    } else {
        fmt::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .try_init()
    };
    installed.map_err(|e| std::io::Error::other(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== toolbridge starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `toolbridge.log` → `toolbridge.log.1` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer over `std::fs::File` that flushes after every write, so each log
/// line is on disk even if the process is killed.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
