//! Release checks, verified downloads and in-place installation.
//!
//! Network and disk work runs on short-lived worker threads; results come
//! back as [`UpdateEvent`]s over a channel drained with [`Updater::poll`].

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub download_url: String,
    pub sha256: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Checking,
    Available(ReleaseInfo),
    NotAvailable,
    Error(String),
    Progress(u8),
    Downloaded(PathBuf),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("unsupported update url: {0}")]
    UnsupportedUrl(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(u16),
    #[error("invalid release manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("checksum mismatch (expected {expected}, got {actual})")]
    Checksum { expected: String, actual: String },
    #[error("release version {0:?} is not a plain version string")]
    InvalidVersion(String),
    #[error("no update is {0}")]
    NothingPending(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Dotted numeric comparison; a leading `v` and any `-suffix` are ignored and
/// missing components count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(version: &str) -> Vec<u64> {
        let core = version.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next().unwrap_or_default();
        core.split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    }
    let (a, b) = (parts(a), parts(b));
    let width = a.len().max(b.len());
    (0..width)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

/// Reads `url` (`file://`, `http://` or `https://`), reporting whole-percent
/// progress when the size is known.
pub fn fetch(url: &str, mut on_progress: impl FnMut(u8)) -> Result<Vec<u8>, UpdateError> {
    if let Some(path) = url.strip_prefix("file://") {
        let bytes = fs::read(path)?;
        on_progress(100);
        return Ok(bytes);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(UpdateError::UnsupportedUrl(url.to_string()));
    }

    let mut response = reqwest::blocking::get(url)?;
    if !response.status().is_success() {
        return Err(UpdateError::Status(response.status().as_u16()));
    }
    let total = response.content_length();
    let mut body = Vec::with_capacity(total.unwrap_or(0) as usize);
    let mut buf = [0u8; CHUNK_SIZE];
    let mut last = 0u8;
    loop {
        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = ((body.len() as u64 * 100) / total).min(100) as u8;
            if percent != last {
                last = percent;
                on_progress(percent);
            }
        }
    }
    if last != 100 {
        on_progress(100);
    }
    Ok(body)
}

pub fn fetch_manifest(url: &str) -> Result<ReleaseInfo, UpdateError> {
    let raw = fetch(url, |_| {})?;
    Ok(serde_json::from_slice(&raw)?)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn verify_sha256(bytes: &[u8], expected_hex: &str) -> Result<(), UpdateError> {
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected_hex.trim()) {
        return Err(UpdateError::Checksum {
            expected: expected_hex.to_string(),
            actual,
        });
    }
    Ok(())
}

/// File name for a staged release. The version comes from the manifest, so
/// anything beyond `[0-9A-Za-z.+-]` or a `..` component is rejected.
pub fn staged_file_name(version: &str) -> Result<String, UpdateError> {
    let plain = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
        && !version.contains("..");
    if !plain {
        return Err(UpdateError::InvalidVersion(version.to_string()));
    }
    Ok(format!("keepassword-{version}.update"))
}

/// Downloads the release artifact into `staging_dir`, verifying its hash
/// before it is written.
pub fn download_release(
    release: &ReleaseInfo,
    staging_dir: &Path,
    on_progress: impl FnMut(u8),
) -> Result<PathBuf, UpdateError> {
    let file_name = staged_file_name(&release.version)?;
    let bytes = fetch(&release.download_url, on_progress)?;
    verify_sha256(&bytes, &release.sha256)?;
    fs::create_dir_all(staging_dir)?;
    let path = staging_dir.join(file_name);
    let mut file = File::create(&path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(path)
}

/// Atomically replaces `target` with the staged file.
pub fn install_file(staged: &Path, target: &Path) -> Result<(), UpdateError> {
    let parent = target
        .parent()
        .ok_or_else(|| std::io::Error::other("install target has no parent directory"))?;
    let bytes = fs::read(staged)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(&bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o755))?;
    }
    temp.persist(target).map_err(|e| UpdateError::Io(e.error))?;
    Ok(())
}

pub struct Updater {
    manifest_url: String,
    current_version: String,
    staging_dir: PathBuf,
    tx: Sender<UpdateEvent>,
    rx: Receiver<UpdateEvent>,
    available: Option<ReleaseInfo>,
    staged: Option<PathBuf>,
}

impl Updater {
    pub fn new(manifest_url: impl Into<String>, current_version: &str, staging_dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            manifest_url: manifest_url.into(),
            current_version: current_version.to_string(),
            staging_dir,
            tx,
            rx,
            available: None,
            staged: None,
        }
    }

    pub fn available(&self) -> Option<&ReleaseInfo> {
        self.available.as_ref()
    }

    pub fn staged(&self) -> Option<&Path> {
        self.staged.as_deref()
    }

    pub fn check_for_updates(&self) {
        let tx = self.tx.clone();
        let url = self.manifest_url.clone();
        let current = self.current_version.clone();
        thread::spawn(move || {
            let _ = tx.send(UpdateEvent::Checking);
            let event = match fetch_manifest(&url) {
                Ok(release) if is_newer(&release.version, &current) => {
                    info!(version = %release.version, "update available");
                    UpdateEvent::Available(release)
                }
                Ok(_) => UpdateEvent::NotAvailable,
                Err(e) => {
                    warn!(error = %e, "update check failed");
                    UpdateEvent::Error(e.to_string())
                }
            };
            let _ = tx.send(event);
        });
    }

    pub fn download_update(&self) -> Result<(), UpdateError> {
        let release = self
            .available
            .clone()
            .ok_or(UpdateError::NothingPending("available"))?;
        let tx = self.tx.clone();
        let staging = self.staging_dir.clone();
        thread::spawn(move || {
            let progress_tx = tx.clone();
            let result = download_release(&release, &staging, |percent| {
                let _ = progress_tx.send(UpdateEvent::Progress(percent));
            });
            let event = match result {
                Ok(path) => {
                    info!(version = %release.version, "update downloaded");
                    UpdateEvent::Downloaded(path)
                }
                Err(e) => {
                    warn!(error = %e, "update download failed");
                    UpdateEvent::Error(e.to_string())
                }
            };
            let _ = tx.send(event);
        });
        Ok(())
    }

    /// Replaces the running executable with the staged download.
    pub fn install_update(&mut self) -> Result<PathBuf, UpdateError> {
        let staged = self
            .staged
            .clone()
            .ok_or(UpdateError::NothingPending("downloaded"))?;
        let target = std::env::current_exe()?;
        install_file(&staged, &target)?;
        fs::remove_file(&staged).ok();
        self.staged = None;
        info!(target = %target.display(), "update installed");
        Ok(target)
    }

    /// Drains pending worker events, remembering what was found or staged.
    pub fn poll(&mut self) -> Vec<UpdateEvent> {
        let events: Vec<UpdateEvent> = self.rx.try_iter().collect();
        for event in &events {
            match event {
                UpdateEvent::Available(release) => self.available = Some(release.clone()),
                UpdateEvent::NotAvailable => self.available = None,
                UpdateEvent::Downloaded(path) => self.staged = Some(path.clone()),
                _ => {}
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn write_release(dir: &Path, version: &str, payload: &[u8], sha: Option<&str>) -> String {
        let artifact = dir.join("artifact.bin");
        fs::write(&artifact, payload).unwrap();
        let manifest = serde_json::json!({
            "version": version,
            "download_url": format!("file://{}", artifact.display()),
            "sha256": sha.map(str::to_string).unwrap_or_else(|| sha256_hex(payload)),
            "notes": "fixes"
        });
        let manifest_path = dir.join("manifest.json");
        fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
        format!("file://{}", manifest_path.display())
    }

    fn wait_for(updater: &mut Updater, done: impl Fn(&UpdateEvent) -> bool) -> Vec<UpdateEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            let batch = updater.poll();
            let finished = batch.iter().any(&done);
            seen.extend(batch);
            if finished {
                return seen;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("updater did not finish: {seen:?}");
    }

    #[test]
    fn staged_name_rejects_path_tricks() {
        assert_eq!(
            staged_file_name("1.2.0+build-7").unwrap(),
            "keepassword-1.2.0+build-7.update"
        );
        for bad in ["", "../../bin/sh", "1.0/evil", "1..0", "1.0\\x", "1.0 beta"] {
            assert!(
                matches!(staged_file_name(bad), Err(UpdateError::InvalidVersion(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn download_refuses_traversing_version() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        let release = ReleaseInfo {
            version: "../escaped".into(),
            download_url: "file:///nonexistent".into(),
            sha256: String::new(),
            notes: String::new(),
        };
        let err = download_release(&release, &staging, |_| {}).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidVersion(_)));
        assert!(!staging.exists());
        assert!(!dir.path().join("escaped").exists());
    }

    #[test]
    fn version_ordering() {
        assert!(is_newer("1.2.0", "1.1.9"));
        assert!(is_newer("v2.0", "1.9.9"));
        assert!(!is_newer("1.0.0", "1.0"));
        assert!(!is_newer("0.9.0-beta", "0.9.0"));
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
    }

    #[test]
    fn manifest_from_file_url() {
        let dir = tempdir().unwrap();
        let url = write_release(dir.path(), "9.9.9", b"binary", None);
        let release = fetch_manifest(&url).unwrap();
        assert_eq!(release.version, "9.9.9");
        assert_eq!(release.notes, "fixes");
    }

    #[test]
    fn download_rejects_hash_mismatch() {
        let dir = tempdir().unwrap();
        let url = write_release(dir.path(), "9.9.9", b"binary", Some("deadbeef"));
        let release = fetch_manifest(&url).unwrap();
        let err = download_release(&release, &dir.path().join("staging"), |_| {}).unwrap_err();
        assert!(matches!(err, UpdateError::Checksum { .. }));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(matches!(
            fetch("ftp://example.com/x", |_| {}),
            Err(UpdateError::UnsupportedUrl(_))
        ));
    }

    #[test]
    fn check_then_download_reports_events() {
        let dir = tempdir().unwrap();
        let url = write_release(dir.path(), "9.9.9", b"new build", None);
        let mut updater = Updater::new(url, "0.1.0", dir.path().join("staging"));

        updater.check_for_updates();
        let events = wait_for(&mut updater, |e| matches!(e, UpdateEvent::Available(_)));
        assert_eq!(events[0], UpdateEvent::Checking);
        assert_eq!(updater.available().unwrap().version, "9.9.9");

        updater.download_update().unwrap();
        let events = wait_for(&mut updater, |e| matches!(e, UpdateEvent::Downloaded(_)));
        assert!(events.contains(&UpdateEvent::Progress(100)));
        let staged = updater.staged().unwrap();
        assert_eq!(fs::read(staged).unwrap(), b"new build");
    }

    #[test]
    fn current_release_is_not_available() {
        let dir = tempdir().unwrap();
        let url = write_release(dir.path(), "0.1.0", b"same", None);
        let mut updater = Updater::new(url, "0.1.0", dir.path().join("staging"));
        updater.check_for_updates();
        wait_for(&mut updater, |e| matches!(e, UpdateEvent::NotAvailable));
        assert!(updater.available().is_none());
        assert!(matches!(
            updater.download_update(),
            Err(UpdateError::NothingPending(_))
        ));
    }

    #[test]
    fn install_replaces_target_file() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join("staged");
        let target = dir.path().join("keepassword");
        fs::write(&staged, b"v2").unwrap();
        fs::write(&target, b"v1").unwrap();
        install_file(&staged, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"v2");
    }
}
