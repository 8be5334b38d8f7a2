//! Host services the UI depends on: database file I/O, the clipboard, the
//! application version and the update channel.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::clipboard::{ClipboardBackend, SecureClipboard, SystemClipboard};
use crate::storage::{self, Config};
use crate::updater::{UpdateEvent, Updater};

/// Byte-level file access used by the session for load and save.
pub trait FileHost {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ClipboardCleared,
    Update(UpdateEvent),
}

pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct LocalHost {
    database_dir: PathBuf,
    clipboard: Option<SecureClipboard>,
    updater: Option<Updater>,
}

impl FileHost for LocalHost {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        storage::atomic_write(path, bytes)?;
        storage::restrict_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl LocalHost {
    /// A host with the system clipboard when one is reachable, and an updater
    /// when a manifest url is configured.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let database_dir = cfg.database_dir()?;
        let clipboard = match SystemClipboard::new() {
            Ok(clip) => Some(SecureClipboard::new(
                Box::new(clip),
                Duration::from_secs(cfg.clipboard_clear_secs),
            )),
            Err(e) => {
                warn!(error = %e, "clipboard disabled");
                None
            }
        };
        let updater = match &cfg.update_manifest_url {
            Some(url) if !url.trim().is_empty() => Some(Updater::new(
                url.trim(),
                app_version(),
                storage::updates_dir()?,
            )),
            _ => {
                info!("updates disabled: no manifest url configured");
                None
            }
        };
        Ok(Self {
            database_dir,
            clipboard,
            updater,
        })
    }

    pub fn new(database_dir: PathBuf) -> Self {
        Self {
            database_dir,
            clipboard: None,
            updater: None,
        }
    }

    pub fn with_clipboard(mut self, backend: Box<dyn ClipboardBackend>, delay: Duration) -> Self {
        self.clipboard = Some(SecureClipboard::new(backend, delay));
        self
    }

    pub fn with_updater(mut self, updater: Updater) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    /// Candidate databases for the open picker.
    pub fn list_databases(&self) -> Vec<PathBuf> {
        storage::scan_database_files(&self.database_dir)
    }

    pub fn resolve_save_path(&self, input: &str) -> PathBuf {
        storage::resolve_database_path(&self.database_dir, input)
    }

    pub fn copy_to_clipboard(&mut self, text: &str, now: Instant) -> Result<()> {
        let clip = self
            .clipboard
            .as_mut()
            .ok_or_else(|| anyhow!("Clipboard unavailable"))?;
        clip.set_text(text, now)
    }

    pub fn clear_clipboard(&mut self) -> Result<()> {
        match self.clipboard.as_mut() {
            Some(clip) => clip.clear(),
            None => Ok(()),
        }
    }

    pub fn clipboard_remaining(&self, now: Instant) -> Option<Duration> {
        self.clipboard.as_ref()?.remaining(now)
    }

    pub fn updates_enabled(&self) -> bool {
        self.updater.is_some()
    }

    fn updater_mut(&mut self) -> Result<&mut Updater> {
        self.updater
            .as_mut()
            .ok_or_else(|| anyhow!("Updates are disabled (no manifest url configured)"))
    }

    pub fn check_for_updates(&mut self) -> Result<()> {
        self.updater_mut()?.check_for_updates();
        Ok(())
    }

    pub fn download_update(&mut self) -> Result<()> {
        self.updater_mut()?.download_update()?;
        Ok(())
    }

    pub fn install_update(&mut self) -> Result<PathBuf> {
        Ok(self.updater_mut()?.install_update()?)
    }

    /// Clipboard expiry and update progress since the last poll.
    pub fn poll_events(&mut self, now: Instant) -> Vec<HostEvent> {
        let mut events = Vec::new();
        if let Some(clip) = self.clipboard.as_mut() {
            match clip.tick(now) {
                Ok(true) => events.push(HostEvent::ClipboardCleared),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "clipboard clear failed, retrying"),
            }
        }
        if let Some(updater) = self.updater.as_mut() {
            events.extend(updater.poll().into_iter().map(HostEvent::Update));
        }
        events
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clipboard::tests::RecordingClipboard;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// In-memory files; `fail_writes` simulates a read-only disk.
    #[derive(Default)]
    pub(crate) struct MemoryHost {
        pub(crate) files: RefCell<HashMap<PathBuf, Vec<u8>>>,
        pub(crate) fail_writes: bool,
    }

    impl FileHost for MemoryHost {
        fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.files
                .borrow()
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }

        fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.files
                .borrow_mut()
                .insert(path.to_path_buf(), bytes.to_vec());
            Ok(())
        }

        fn exists(&self, path: &Path) -> bool {
            self.files.borrow().contains_key(path)
        }
    }

    #[test]
    fn writes_are_readable_and_owner_only() {
        let dir = tempdir().unwrap();
        let host = LocalHost::new(dir.path().to_path_buf());
        let path = host.resolve_save_path("");
        host.write_bytes(&path, b"sealed").unwrap();
        assert_eq!(host.read_bytes(&path).unwrap(), b"sealed");
        assert_eq!(host.list_databases(), vec![path.clone()]);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn clipboard_clear_is_reported_once() {
        let backend = RecordingClipboard::default();
        let mut host = LocalHost::new(PathBuf::from("/tmp"))
            .with_clipboard(Box::new(backend.clone()), Duration::from_secs(30));
        let start = Instant::now();
        host.copy_to_clipboard("secret", start).unwrap();
        assert!(host.poll_events(start + Duration::from_secs(5)).is_empty());
        assert_eq!(
            host.poll_events(start + Duration::from_secs(30)),
            vec![HostEvent::ClipboardCleared]
        );
        assert!(host.poll_events(start + Duration::from_secs(60)).is_empty());
        assert_eq!(backend.writes.borrow().len(), 2);
    }

    #[test]
    fn missing_services_fail_softly() {
        let mut host = LocalHost::new(PathBuf::from("/tmp"));
        assert!(host.copy_to_clipboard("x", Instant::now()).is_err());
        assert!(host.clear_clipboard().is_ok());
        assert!(!host.updates_enabled());
        assert!(host.check_for_updates().is_err());
        assert!(host.poll_events(Instant::now()).is_empty());
    }
}
