use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::storage::{ensure_dir, restrict_file};

pub const LOG_ENV: &str = "KEEPASSWORD_LOG";
const DEFAULT_FILTER: &str = "keepassword=info";

/// Sends tracing output to `path`; the terminal itself belongs to the UI.
/// Verbosity comes from `KEEPASSWORD_LOG` in env-filter syntax.
pub fn init(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    restrict_file(path)?;

    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("Could not initialise logging: {e}"))
}
