//! Host settings command.
//!
//! Prints the effective settings (file values with defaults filled in) and
//! optionally writes them back so the file lists every knob.

use std::path::Path;

use crate::config::HostSettings;

pub fn show(settings: &HostSettings, path: &Path, init: bool) -> anyhow::Result<String> {
    if init {
        settings.save(path)?;
        tracing::info!(path = %path.display(), "wrote host settings");
    }

    let mut out = format!("# {}\n", path.display());
    out.push_str(&serde_json::to_string_pretty(settings)?);
    out.push('\n');
    Ok(out)
}
