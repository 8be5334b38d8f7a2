//! Open, create and unlock flows as small input-driven state machines.
//!
//! Each dialog consumes [`DialogInput`]s and drives the [`Session`] through a
//! [`FileHost`]; failures end up in the dialog's status line and never
//! propagate. `lines()` renders the dialog as overlay text.

use std::path::{Path, PathBuf};

use tracing::warn;
use zeroize::Zeroizing;

use crate::generator::classify_strength;
use crate::host::FileHost;
use crate::session::Session;
use crate::storage::resolve_database_path;

pub const DEFAULT_DATABASE_NAME: &str = "New Database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogInput {
    Char(char),
    Backspace,
    Enter,
    Esc,
    Up,
    Down,
    Tab,
    ToggleVisibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    Pending,
    Cancelled,
    Opened(PathBuf),
    Unlocked,
}

fn masked(text: &str, visible: bool) -> String {
    if visible {
        text.to_string()
    } else {
        "•".repeat(text.chars().count())
    }
}

fn read_key_file(host: &dyn FileHost, raw: &str) -> Result<Option<Zeroizing<Vec<u8>>>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    host.read_bytes(Path::new(raw))
        .map(|bytes| Some(Zeroizing::new(bytes)))
        .map_err(|e| format!("Could not read key file {raw}: {e}"))
}

pub struct OpenDialog {
    database_dir: PathBuf,
    candidates: Vec<PathBuf>,
    selected: usize,
    typed: String,
    status: Option<String>,
}

impl OpenDialog {
    pub fn new(database_dir: PathBuf, candidates: Vec<PathBuf>) -> Self {
        Self {
            database_dir,
            candidates,
            selected: 0,
            typed: String::new(),
            status: None,
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// The typed path wins over the highlighted candidate.
    fn target(&self) -> Option<PathBuf> {
        let typed = self.typed.trim();
        if typed.is_empty() {
            return self.candidates.get(self.selected).cloned();
        }
        let path = PathBuf::from(typed);
        Some(if path.is_absolute() {
            path
        } else {
            self.database_dir.join(path)
        })
    }

    pub fn handle(
        &mut self,
        input: DialogInput,
        host: &dyn FileHost,
        session: &mut Session,
    ) -> DialogOutcome {
        match input {
            DialogInput::Esc => return DialogOutcome::Cancelled,
            DialogInput::Up => self.selected = self.selected.saturating_sub(1),
            DialogInput::Down | DialogInput::Tab => {
                self.selected = (self.selected + 1).min(self.candidates.len().saturating_sub(1));
            }
            DialogInput::Backspace => {
                self.typed.pop();
            }
            DialogInput::Char(c) => self.typed.push(c),
            DialogInput::Enter => return self.submit(host, session),
            DialogInput::ToggleVisibility => {}
        }
        DialogOutcome::Pending
    }

    fn submit(&mut self, host: &dyn FileHost, session: &mut Session) -> DialogOutcome {
        let Some(path) = self.target() else {
            self.status = Some("No database selected".into());
            return DialogOutcome::Pending;
        };
        match host.read_bytes(&path) {
            Ok(bytes) => {
                session.open(path.clone(), bytes);
                DialogOutcome::Opened(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "open failed");
                self.status = Some(format!("Could not read {}: {e}", path.display()));
                DialogOutcome::Pending
            }
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Databases in {}", self.database_dir.display()),
            String::new(),
        ];
        if self.candidates.is_empty() {
            lines.push("  (none found)".into());
        }
        for (idx, path) in self.candidates.iter().enumerate() {
            let marker = if idx == self.selected && self.typed.is_empty() {
                ">"
            } else {
                " "
            };
            let shown = path.strip_prefix(&self.database_dir).unwrap_or(path);
            lines.push(format!("{marker} {}", shown.display()));
        }
        lines.push(String::new());
        lines.push(format!("Path: {}", self.typed));
        if let Some(status) = &self.status {
            lines.push(status.clone());
        }
        lines.push("↑/↓ choose | type a path | Enter open | Esc cancel".into());
        lines
    }
}

const CREATE_PATH: usize = 0;
const CREATE_NAME: usize = 1;
const CREATE_PASSPHRASE: usize = 2;
const CREATE_CONFIRM: usize = 3;
const CREATE_KEY_FILE: usize = 4;

#[derive(Default)]
pub struct CreateDialog {
    database_dir: PathBuf,
    step: usize,
    path: String,
    name: String,
    passphrase: Zeroizing<String>,
    confirm: Zeroizing<String>,
    key_file: String,
    show_passphrase: bool,
    overwrite_confirmed: Option<PathBuf>,
    status: Option<String>,
}

impl CreateDialog {
    pub fn new(database_dir: PathBuf) -> Self {
        Self {
            database_dir,
            ..Self::default()
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn current_secret(&self) -> &str {
        if self.step == CREATE_CONFIRM {
            self.confirm.as_str()
        } else {
            self.passphrase.as_str()
        }
    }

    fn is_entering_secret(&self) -> bool {
        matches!(self.step, CREATE_PASSPHRASE | CREATE_CONFIRM)
    }

    fn field_mut(&mut self) -> &mut String {
        match self.step {
            CREATE_PATH => &mut self.path,
            CREATE_NAME => &mut self.name,
            CREATE_PASSPHRASE => &mut *self.passphrase,
            CREATE_CONFIRM => &mut *self.confirm,
            _ => &mut self.key_file,
        }
    }

    pub fn handle(
        &mut self,
        input: DialogInput,
        host: &dyn FileHost,
        session: &mut Session,
    ) -> DialogOutcome {
        match input {
            DialogInput::Esc => return DialogOutcome::Cancelled,
            DialogInput::ToggleVisibility => self.show_passphrase = !self.show_passphrase,
            DialogInput::Up => self.step = self.step.saturating_sub(1),
            DialogInput::Down | DialogInput::Tab => {
                self.step = (self.step + 1).min(CREATE_KEY_FILE);
            }
            DialogInput::Backspace => {
                self.field_mut().pop();
                self.overwrite_confirmed = None;
            }
            DialogInput::Char(c) => {
                self.field_mut().push(c);
                self.overwrite_confirmed = None;
            }
            DialogInput::Enter if self.step < CREATE_KEY_FILE => self.step += 1,
            DialogInput::Enter => return self.submit(host, session),
        }
        DialogOutcome::Pending
    }

    /// Creating over an existing file needs a second Enter for that same path.
    fn submit(&mut self, host: &dyn FileHost, session: &mut Session) -> DialogOutcome {
        if self.passphrase.is_empty() {
            self.status = Some("Passphrase cannot be empty".into());
            self.step = CREATE_PASSPHRASE;
            return DialogOutcome::Pending;
        }
        if *self.passphrase != *self.confirm {
            self.status = Some("Passphrases do not match".into());
            self.confirm.clear();
            self.step = CREATE_CONFIRM;
            return DialogOutcome::Pending;
        }
        let key = match read_key_file(host, &self.key_file) {
            Ok(key) => key,
            Err(message) => {
                self.status = Some(message);
                self.step = CREATE_KEY_FILE;
                return DialogOutcome::Pending;
            }
        };
        let path = resolve_database_path(&self.database_dir, &self.path);
        if host.exists(&path) && self.overwrite_confirmed.as_ref() != Some(&path) {
            warn!(path = %path.display(), "create target exists, asking to overwrite");
            self.status = Some(format!(
                "{} already exists. Press Enter again to overwrite it",
                path.display()
            ));
            self.overwrite_confirmed = Some(path);
            return DialogOutcome::Pending;
        }
        let name = match self.name.trim() {
            "" => DEFAULT_DATABASE_NAME,
            name => name,
        };
        match session.create(host, path, name, &self.passphrase, key.as_ref().map(|k| k.as_slice())) {
            Ok(()) => {
                self.passphrase.clear();
                self.confirm.clear();
                DialogOutcome::Unlocked
            }
            Err(e) => {
                self.status = Some(format!("Create failed: {e}"));
                DialogOutcome::Pending
            }
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let default_path = resolve_database_path(&self.database_dir, "");
        let fields = [
            (
                "Path",
                if self.path.is_empty() {
                    format!("({})", default_path.display())
                } else {
                    self.path.clone()
                },
            ),
            (
                "Name",
                if self.name.is_empty() {
                    format!("({DEFAULT_DATABASE_NAME})")
                } else {
                    self.name.clone()
                },
            ),
            ("Passphrase", masked(&self.passphrase, self.show_passphrase)),
            ("Confirm", masked(&self.confirm, self.show_passphrase)),
            ("Key file (optional)", self.key_file.clone()),
        ];
        let mut lines = vec![String::new()];
        for (idx, (label, value)) in fields.iter().enumerate() {
            let marker = if idx == self.step { ">" } else { " " };
            lines.push(format!("{marker} {label}: {value}"));
        }
        lines.push(String::new());
        if self.is_entering_secret() {
            lines.push(format!(
                "Strength: {}",
                classify_strength(self.current_secret()).label()
            ));
        }
        if let Some(status) = &self.status {
            lines.push(status.clone());
        }
        lines.push("Enter next/create | ↑/↓ move | Ctrl+h show/hide | Esc cancel".into());
        lines
    }
}

const UNLOCK_PASSPHRASE: usize = 0;
const UNLOCK_KEY_FILE: usize = 1;

#[derive(Default)]
pub struct UnlockDialog {
    step: usize,
    passphrase: Zeroizing<String>,
    key_file: String,
    show_passphrase: bool,
    failed_attempts: u32,
    status: Option<String>,
}

impl UnlockDialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn passphrase_display(&self) -> String {
        masked(&self.passphrase, self.show_passphrase)
    }

    pub fn passphrase_visible(&self) -> bool {
        self.show_passphrase
    }

    pub fn key_file(&self) -> &str {
        &self.key_file
    }

    pub fn editing_key_file(&self) -> bool {
        self.step == UNLOCK_KEY_FILE
    }

    pub fn handle(
        &mut self,
        input: DialogInput,
        host: &dyn FileHost,
        session: &mut Session,
    ) -> DialogOutcome {
        match input {
            DialogInput::Esc => return DialogOutcome::Cancelled,
            DialogInput::ToggleVisibility => self.show_passphrase = !self.show_passphrase,
            DialogInput::Up | DialogInput::Down | DialogInput::Tab => {
                self.step = if self.step == UNLOCK_PASSPHRASE {
                    UNLOCK_KEY_FILE
                } else {
                    UNLOCK_PASSPHRASE
                };
            }
            DialogInput::Backspace => {
                if self.step == UNLOCK_PASSPHRASE {
                    self.passphrase.pop();
                } else {
                    self.key_file.pop();
                }
            }
            DialogInput::Char(c) => {
                if self.step == UNLOCK_PASSPHRASE {
                    self.passphrase.push(c);
                } else {
                    self.key_file.push(c);
                }
            }
            DialogInput::Enter => return self.submit(host, session),
        }
        DialogOutcome::Pending
    }

    fn submit(&mut self, host: &dyn FileHost, session: &mut Session) -> DialogOutcome {
        if self.passphrase.is_empty() {
            self.status = Some("Enter the passphrase".into());
            self.step = UNLOCK_PASSPHRASE;
            return DialogOutcome::Pending;
        }
        let key = match read_key_file(host, &self.key_file) {
            Ok(key) => key,
            Err(message) => {
                self.status = Some(message);
                return DialogOutcome::Pending;
            }
        };
        let result = session.unlock(host, &self.passphrase, key.as_ref().map(|k| k.as_slice()));
        self.passphrase.clear();
        match result {
            Ok(()) => {
                self.failed_attempts = 0;
                self.status = None;
                DialogOutcome::Unlocked
            }
            Err(e) => {
                self.failed_attempts = self.failed_attempts.saturating_add(1);
                self.status = Some(format!(
                    "Unlock failed: {e} | Attempts: {}",
                    self.failed_attempts
                ));
                self.step = UNLOCK_PASSPHRASE;
                DialogOutcome::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::format::VaultFormat;
    use crate::host::tests::MemoryHost;

    fn session() -> Session {
        Session::new(VaultFormat::new(KdfParams {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }))
    }

    fn type_text<F: FnMut(DialogInput) -> DialogOutcome>(mut send: F, text: &str) {
        for c in text.chars() {
            assert_eq!(send(DialogInput::Char(c)), DialogOutcome::Pending);
        }
    }

    fn create_database(host: &MemoryHost, session: &mut Session, passphrase: &str) {
        let mut dialog = CreateDialog::new(PathBuf::from("/vaults"));
        type_text(|i| dialog.handle(i, host, session), "team");
        dialog.handle(DialogInput::Enter, host, session);
        type_text(|i| dialog.handle(i, host, session), "Team");
        dialog.handle(DialogInput::Enter, host, session);
        type_text(|i| dialog.handle(i, host, session), passphrase);
        dialog.handle(DialogInput::Enter, host, session);
        type_text(|i| dialog.handle(i, host, session), passphrase);
        dialog.handle(DialogInput::Enter, host, session);
        assert_eq!(
            dialog.handle(DialogInput::Enter, host, session),
            DialogOutcome::Unlocked
        );
    }

    #[test]
    fn create_then_open_then_unlock() {
        let host = MemoryHost::default();
        let mut s = session();
        create_database(&host, &mut s, "hunter2");
        assert!(s.is_unlocked());
        assert_eq!(s.path(), Some(Path::new("/vaults/team.kdbx")));
        assert_eq!(s.root().unwrap().name, "Team");

        let mut open = OpenDialog::new(
            PathBuf::from("/vaults"),
            vec![PathBuf::from("/vaults/team.kdbx")],
        );
        let outcome = open.handle(DialogInput::Enter, &host, &mut s);
        assert_eq!(outcome, DialogOutcome::Opened(PathBuf::from("/vaults/team.kdbx")));
        assert!(s.has_pending());

        let mut unlock = UnlockDialog::new();
        type_text(|i| unlock.handle(i, &host, &mut s), "wrong");
        assert_eq!(
            unlock.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Pending
        );
        assert_eq!(unlock.failed_attempts(), 1);
        assert!(unlock.status().unwrap().starts_with("Unlock failed"));
        assert!(!s.is_unlocked());

        type_text(|i| unlock.handle(i, &host, &mut s), "hunter2");
        assert_eq!(
            unlock.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Unlocked
        );
        assert!(s.is_unlocked());
    }

    #[test]
    fn mismatched_confirmation_keeps_dialog_open() {
        let host = MemoryHost::default();
        let mut s = session();
        let mut dialog = CreateDialog::new(PathBuf::from("/vaults"));
        for _ in 0..2 {
            dialog.handle(DialogInput::Enter, &host, &mut s);
        }
        type_text(|i| dialog.handle(i, &host, &mut s), "one");
        dialog.handle(DialogInput::Enter, &host, &mut s);
        type_text(|i| dialog.handle(i, &host, &mut s), "two");
        dialog.handle(DialogInput::Enter, &host, &mut s);
        assert_eq!(
            dialog.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Pending
        );
        assert_eq!(dialog.status(), Some("Passphrases do not match"));
        assert!(!s.is_unlocked());
        assert!(host.files.borrow().is_empty());
    }

    #[test]
    fn create_uses_default_path_and_name() {
        let host = MemoryHost::default();
        let mut s = session();
        let mut dialog = CreateDialog::new(PathBuf::from("/vaults"));
        dialog.handle(DialogInput::Enter, &host, &mut s);
        dialog.handle(DialogInput::Enter, &host, &mut s);
        type_text(|i| dialog.handle(i, &host, &mut s), "pw");
        dialog.handle(DialogInput::Enter, &host, &mut s);
        type_text(|i| dialog.handle(i, &host, &mut s), "pw");
        dialog.handle(DialogInput::Enter, &host, &mut s);
        assert_eq!(
            dialog.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Unlocked
        );
        assert_eq!(s.path(), Some(Path::new("/vaults/database.kdbx")));
        assert_eq!(s.database_name(), Some(DEFAULT_DATABASE_NAME));
    }

    #[test]
    fn create_over_existing_file_asks_before_overwriting() {
        let host = MemoryHost::default();
        let mut s = session();
        create_database(&host, &mut s, "old-pw");
        let original = host.read_bytes(Path::new("/vaults/team.kdbx")).unwrap();

        let mut fresh = session();
        let mut dialog = CreateDialog::new(PathBuf::from("/vaults"));
        type_text(|i| dialog.handle(i, &host, &mut fresh), "team");
        dialog.handle(DialogInput::Enter, &host, &mut fresh);
        dialog.handle(DialogInput::Enter, &host, &mut fresh);
        type_text(|i| dialog.handle(i, &host, &mut fresh), "new-pw");
        dialog.handle(DialogInput::Enter, &host, &mut fresh);
        type_text(|i| dialog.handle(i, &host, &mut fresh), "new-pw");
        dialog.handle(DialogInput::Enter, &host, &mut fresh);

        assert_eq!(
            dialog.handle(DialogInput::Enter, &host, &mut fresh),
            DialogOutcome::Pending
        );
        assert!(dialog.status().unwrap().contains("already exists"));
        assert!(!fresh.is_unlocked());
        assert_eq!(
            host.read_bytes(Path::new("/vaults/team.kdbx")).unwrap(),
            original
        );

        assert_eq!(
            dialog.handle(DialogInput::Enter, &host, &mut fresh),
            DialogOutcome::Unlocked
        );
        assert_ne!(
            host.read_bytes(Path::new("/vaults/team.kdbx")).unwrap(),
            original
        );
    }

    #[test]
    fn editing_after_overwrite_warning_asks_again() {
        let host = MemoryHost::default();
        let mut s = session();
        create_database(&host, &mut s, "old-pw");

        let mut fresh = session();
        let mut dialog = CreateDialog::new(PathBuf::from("/vaults"));
        type_text(|i| dialog.handle(i, &host, &mut fresh), "team");
        dialog.handle(DialogInput::Enter, &host, &mut fresh);
        dialog.handle(DialogInput::Enter, &host, &mut fresh);
        type_text(|i| dialog.handle(i, &host, &mut fresh), "pw");
        dialog.handle(DialogInput::Enter, &host, &mut fresh);
        type_text(|i| dialog.handle(i, &host, &mut fresh), "pw");
        dialog.handle(DialogInput::Enter, &host, &mut fresh);
        assert_eq!(
            dialog.handle(DialogInput::Enter, &host, &mut fresh),
            DialogOutcome::Pending
        );

        dialog.handle(DialogInput::Char('x'), &host, &mut fresh);
        dialog.handle(DialogInput::Backspace, &host, &mut fresh);
        assert_eq!(
            dialog.handle(DialogInput::Enter, &host, &mut fresh),
            DialogOutcome::Pending
        );
        assert!(!fresh.is_unlocked());
    }

    #[test]
    fn empty_passphrase_is_rejected_before_decrypting() {
        let host = MemoryHost::default();
        let mut s = session();
        let mut unlock = UnlockDialog::new();
        assert_eq!(
            unlock.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Pending
        );
        assert_eq!(unlock.status(), Some("Enter the passphrase"));
        assert_eq!(unlock.failed_attempts(), 0);
    }

    #[test]
    fn key_file_participates_in_unlock() {
        let host = MemoryHost::default();
        host.files
            .borrow_mut()
            .insert(PathBuf::from("/keys/team.key"), b"key material".to_vec());
        let mut s = session();
        s.create(
            &host,
            PathBuf::from("/vaults/k.kdbx"),
            "K",
            "pw",
            Some(b"key material".as_slice()),
        )
        .unwrap();
        s.lock();

        let mut unlock = UnlockDialog::new();
        type_text(|i| unlock.handle(i, &host, &mut s), "pw");
        assert!(matches!(
            unlock.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Pending
        ));

        type_text(|i| unlock.handle(i, &host, &mut s), "pw");
        unlock.handle(DialogInput::Tab, &host, &mut s);
        type_text(|i| unlock.handle(i, &host, &mut s), "/keys/team.key");
        assert_eq!(
            unlock.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Unlocked
        );
    }

    #[test]
    fn open_reports_unreadable_files() {
        let host = MemoryHost::default();
        let mut s = session();
        let mut open = OpenDialog::new(PathBuf::from("/vaults"), Vec::new());
        assert_eq!(
            open.handle(DialogInput::Enter, &host, &mut s),
            DialogOutcome::Pending
        );
        assert_eq!(open.status(), Some("No database selected"));
        type_text(|i| open.handle(i, &host, &mut s), "missing.kdbx");
        open.handle(DialogInput::Enter, &host, &mut s);
        assert!(open.status().unwrap().starts_with("Could not read"));
        assert!(!s.has_pending());
    }
}
