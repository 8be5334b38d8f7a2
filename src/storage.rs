use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::clipboard::DEFAULT_CLEAR_SECS;
use crate::generator::GeneratorOptions;

pub const APP_DIR: &str = ".keepassword";
pub const CONFIG_FILE: &str = "config.json";
pub const LOG_FILE: &str = "keepassword.log";
pub const UPDATES_DIR: &str = "updates";
pub const DATABASE_EXTENSION: &str = "kdbx";
pub const DEFAULT_IDLE_LOCK_SECS: u64 = 300;
const MAX_SCAN_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory scanned for databases and used for new ones. Relative paths
    /// are taken from the home directory.
    pub database_dir: Option<PathBuf>,
    pub last_database: Option<PathBuf>,
    pub clipboard_clear_secs: u64,
    /// Zero disables the idle lock.
    pub idle_lock_secs: u64,
    pub update_manifest_url: Option<String>,
    pub generator: GeneratorOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_dir: None,
            last_database: None,
            clipboard_clear_secs: DEFAULT_CLEAR_SECS,
            idle_lock_secs: DEFAULT_IDLE_LOCK_SECS,
            update_manifest_url: None,
            generator: GeneratorOptions::default(),
        }
    }
}

impl Config {
    pub fn database_dir(&self) -> Result<PathBuf> {
        match &self.database_dir {
            Some(dir) => resolve_under_home(dir),
            None => default_base_dir(),
        }
    }
}

pub fn default_base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(default_base_dir()?.join(CONFIG_FILE))
}

pub fn log_path() -> Result<PathBuf> {
    Ok(default_base_dir()?.join(LOG_FILE))
}

pub fn updates_dir() -> Result<PathBuf> {
    Ok(default_base_dir()?.join(UPDATES_DIR))
}

fn resolve_under_home(raw: &Path) -> Result<PathBuf> {
    if raw.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(anyhow!(
            "Configured database directory cannot contain '..' components"
        ));
    }
    if raw.is_absolute() {
        return Ok(raw.to_path_buf());
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(raw))
}

/// Missing file means defaults; a present but unreadable file is an error.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)?;
    let cfg: Config = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("Invalid config {}: {e}", path.display()))?;
    Ok(cfg)
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<()> {
    let data = serde_json::to_string_pretty(cfg)?;
    atomic_write(path, data.as_bytes())?;
    restrict_file(path)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<()> {
    save_config_to(&config_path()?, cfg)
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    restrict_dir(path)
}

/// Writes through a sibling temp file renamed over `path`, so readers see
/// either the old or the new content.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent)?;
        restrict_dir(parent)?;
    }

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn restrict_file(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
    }
    Ok(())
}

pub fn restrict_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}

/// Database files under `dir`, recursively, sorted. Unreadable directories
/// are skipped.
pub fn scan_database_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    scan_into(dir, 0, &mut found);
    found.sort();
    found
}

fn scan_into(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_into(&path, depth + 1, found);
        } else if path.extension().is_some_and(|e| e == DATABASE_EXTENSION) {
            found.push(path);
        }
    }
}

/// Resolves user input to a database path: empty means `database.kdbx` in
/// `dir`, relative paths are joined onto `dir`, and the extension is added
/// when missing.
pub fn resolve_database_path(dir: &Path, input: &str) -> PathBuf {
    let input = input.trim();
    let mut path = if input.is_empty() {
        dir.join(format!("database.{DATABASE_EXTENSION}"))
    } else {
        let raw = PathBuf::from(input);
        if raw.is_absolute() { raw } else { dir.join(raw) }
    };
    if path.extension().is_none_or(|e| e != DATABASE_EXTENSION) {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(DATABASE_EXTENSION);
        path.set_file_name(name);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.clipboard_clear_secs, 30);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{ "idle_lock_secs": 60 }"#).unwrap();
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.idle_lock_secs, 60);
        assert_eq!(cfg.clipboard_clear_secs, DEFAULT_CLEAR_SECS);
        assert!(cfg.update_manifest_url.is_none());
    }

    #[test]
    fn config_survives_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let cfg = Config {
            last_database: Some(PathBuf::from("/tmp/a.kdbx")),
            update_manifest_url: Some("file:///tmp/m.json".into()),
            ..Config::default()
        };
        save_config_to(&path, &cfg).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), cfg);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.kdbx");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn scan_finds_nested_databases_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("work")).unwrap();
        fs::write(dir.path().join("b.kdbx"), b"").unwrap();
        fs::write(dir.path().join("work").join("a.kdbx"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let found = scan_database_files(dir.path());
        assert_eq!(
            found,
            vec![dir.path().join("b.kdbx"), dir.path().join("work").join("a.kdbx")]
        );
        assert!(scan_database_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn database_path_resolution() {
        let dir = Path::new("/home/u/.keepassword");
        assert_eq!(resolve_database_path(dir, ""), dir.join("database.kdbx"));
        assert_eq!(resolve_database_path(dir, "work"), dir.join("work.kdbx"));
        assert_eq!(
            resolve_database_path(dir, "/srv/team.kdbx"),
            PathBuf::from("/srv/team.kdbx")
        );
        assert_eq!(
            resolve_database_path(dir, "backup.old"),
            dir.join("backup.old.kdbx")
        );
    }
}
