use std::io::Stdout;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    cursor::{Hide, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::dialogs::{CreateDialog, DialogInput, DialogOutcome, OpenDialog, UnlockDialog};
use crate::format::VaultFormat;
use crate::generator::{classify_strength, generate, GeneratorOptions, Strength, MAX_LENGTH, MIN_LENGTH};
use crate::host::{app_version, FileHost, HostEvent, LocalHost};
use crate::models::FieldValue;
use crate::projector::DisplayEntry;
use crate::session::{EntryDraft, Session};
use crate::storage::{save_config, Config};
use crate::ui::{
    draw_browser, draw_unlock, draw_welcome, BrowserView, Overlay, Pane, UnlockView, WelcomeView,
};
use crate::updater::UpdateEvent;

const STATUS_MESSAGE_SECS: u64 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const ANIM_INTERVAL: Duration = Duration::from_millis(400);
const WELCOME_HINT: &str = "o open | n new | Enter reopen last | q quit";
const UNLOCK_HINT: &str = "Enter unlock | Tab key file | Ctrl+h show/hide | Esc back";
const BROWSER_HINT: &str =
    "←/→ focus | ↑/↓ move | Enter/c copy | u user | n new | e edit | g group | d delete | f fav | / search | p gen | s save | l lock | U updates | q quit";
const SEARCH_HINT: &str = "Type to filter | Enter keep | Esc clear";

/// Starts the terminal UI, optionally opening `initial` straight into the
/// unlock screen.
pub fn run(config: Config, initial: Option<PathBuf>) -> Result<()> {
    let host = LocalHost::from_config(&config)?;
    let mut app = App::new(config, host);
    if let Some(path) = initial {
        app.screen = app.open_database(path);
    }
    if app.host.updates_enabled() {
        if let Err(e) = app.host.check_for_updates() {
            warn!(error = %e, "startup update check failed");
        }
    }

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal);
    app.shutdown();
    result
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) {
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show).ok();
    terminal.show_cursor().ok();
}

/// Maps a key press to dialog input; Ctrl+h toggles secret visibility.
fn dialog_input(key: KeyEvent) -> Option<DialogInput> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let input = match key.code {
        KeyCode::Char('h') | KeyCode::Char('H') if ctrl => DialogInput::ToggleVisibility,
        KeyCode::Char(_) if ctrl => return None,
        KeyCode::Char(c) => DialogInput::Char(c),
        KeyCode::Backspace => DialogInput::Backspace,
        KeyCode::Enter => DialogInput::Enter,
        KeyCode::Esc => DialogInput::Esc,
        KeyCode::Up | KeyCode::BackTab => DialogInput::Up,
        KeyCode::Down => DialogInput::Down,
        KeyCode::Tab => DialogInput::Tab,
        _ => return None,
    };
    Some(input)
}

fn masked(text: &str, visible: bool) -> String {
    if visible {
        text.to_string()
    } else {
        "*".repeat(text.chars().count())
    }
}

enum Screen {
    Welcome(Option<WelcomeDialog>),
    Unlock(UnlockDialog),
    Browser(Browser),
}

enum WelcomeDialog {
    Open(OpenDialog),
    Create(CreateDialog),
}

struct Browser {
    focus: Pane,
    reveal_password: bool,
    searching: bool,
    modal: Option<Modal>,
}

impl Browser {
    fn new() -> Self {
        Self {
            focus: Pane::Entries,
            reveal_password: false,
            searching: false,
            modal: None,
        }
    }
}

enum Modal {
    Editor(EntryForm),
    Group(GroupPrompt),
    Delete(PendingDelete),
    Generator(GeneratorPanel),
    ChangeMaster(ChangeMasterForm),
    Updates,
    Quit,
}

const EDITOR_LABELS: [&str; 6] = [
    "Title",
    "Username",
    "Password",
    "URL",
    "Notes",
    "Tags (comma separated)",
];
const EDITOR_PASSWORD: usize = 2;
const EDITOR_LAST: usize = EDITOR_LABELS.len() - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditTarget {
    New(Uuid),
    Existing(Uuid),
}

struct EntryForm {
    target: EditTarget,
    step: usize,
    title: String,
    username: String,
    password: Zeroizing<String>,
    url: String,
    notes: String,
    tags: String,
    show_password: bool,
    /// Fields the form does not edit, such as custom strings and expiry.
    base: EntryDraft,
}

impl EntryForm {
    fn new(group: Uuid) -> Self {
        Self {
            target: EditTarget::New(group),
            step: 0,
            title: String::new(),
            username: String::new(),
            password: Zeroizing::new(String::new()),
            url: String::new(),
            notes: String::new(),
            tags: String::new(),
            show_password: false,
            base: EntryDraft::default(),
        }
    }

    fn edit(entry: &DisplayEntry) -> Self {
        Self {
            target: EditTarget::Existing(entry.uuid),
            step: 0,
            title: entry.title.clone(),
            username: entry.username.clone(),
            password: Zeroizing::new(entry.password.reveal()),
            url: entry.url.clone(),
            notes: entry.notes.clone(),
            tags: entry.tags.join(", "),
            show_password: false,
            base: EntryDraft::from(entry),
        }
    }

    fn field_mut(&mut self) -> &mut String {
        match self.step {
            0 => &mut self.title,
            1 => &mut self.username,
            EDITOR_PASSWORD => &mut *self.password,
            3 => &mut self.url,
            4 => &mut self.notes,
            _ => &mut self.tags,
        }
    }

    fn to_draft(&self) -> EntryDraft {
        let mut draft = self.base.clone();
        draft.title = self.title.trim().to_string();
        draft.username = self.username.trim().to_string();
        draft.password = FieldValue::protected(&self.password);
        draft.url = self.url.trim().to_string();
        draft.notes = self.notes.clone();
        draft.tags = self
            .tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        draft
    }

    fn overlay(&self) -> Overlay {
        let values = [
            self.title.clone(),
            self.username.clone(),
            masked(&self.password, self.show_password),
            self.url.clone(),
            self.notes.clone(),
            self.tags.clone(),
        ];
        let mut lines = vec![String::new()];
        for (idx, (label, value)) in EDITOR_LABELS.iter().zip(values.iter()).enumerate() {
            let marker = if idx == self.step { ">" } else { " " };
            lines.push(format!("{marker} {label}: {value}"));
        }
        lines.push(String::new());
        lines.push(
            "Enter next/save | ↑/↓ move | Tab on password opens generator | Ctrl+h show/hide | Esc cancel"
                .to_string(),
        );
        let title = match self.target {
            EditTarget::New(_) => "New entry",
            EditTarget::Existing(_) => "Edit entry",
        };
        Overlay::new(title, lines)
    }
}

struct GroupPrompt {
    parent: Uuid,
    name: String,
}

/// `permanent` is set when the target is already in the recycle bin.
enum PendingDelete {
    Entry { uuid: Uuid, title: String, permanent: bool },
    Group { uuid: Uuid, name: String, permanent: bool },
}

struct GeneratorPanel {
    options: GeneratorOptions,
    password: Zeroizing<String>,
    /// Editor to hand the password back to; `None` when opened standalone.
    return_to: Option<EntryForm>,
}

impl GeneratorPanel {
    fn new(options: GeneratorOptions, return_to: Option<EntryForm>) -> Self {
        Self {
            options,
            password: Zeroizing::new(generate(&options)),
            return_to,
        }
    }

    fn regenerate(&mut self) {
        self.password = Zeroizing::new(generate(&self.options));
    }

    fn overlay(&self) -> Overlay {
        let flag = |on: bool| if on { "[x]" } else { "[ ]" };
        let o = &self.options;
        let enter = if self.return_to.is_some() {
            "Enter use"
        } else {
            "Enter copy"
        };
        let lines = vec![
            String::new(),
            format!("Length: {}  (←/→)", o.length),
            format!(
                "{} Uppercase (u)  {} Lowercase (l)  {} Digits (d)  {} Symbols (s)",
                flag(o.uppercase),
                flag(o.lowercase),
                flag(o.digits),
                flag(o.symbols)
            ),
            format!("{} Exclude look-alike characters (a)", flag(o.exclude_ambiguous)),
            String::new(),
            format!("> {}", self.password.as_str()),
            String::new(),
            format!("r regenerate | c copy | {enter} | Esc close"),
        ];
        Overlay::new("Password generator", lines)
    }
}

const MASTER_NEW: usize = 0;
const MASTER_CONFIRM: usize = 1;
const MASTER_KEY_FILE: usize = 2;

#[derive(Default)]
struct ChangeMasterForm {
    step: usize,
    new1: Zeroizing<String>,
    new2: Zeroizing<String>,
    key_file: String,
    show_password: bool,
}

impl ChangeMasterForm {
    fn field_mut(&mut self) -> &mut String {
        match self.step {
            MASTER_NEW => &mut *self.new1,
            MASTER_CONFIRM => &mut *self.new2,
            _ => &mut self.key_file,
        }
    }

    fn current_secret(&self) -> Option<&str> {
        match self.step {
            MASTER_NEW => Some(self.new1.as_str()),
            MASTER_CONFIRM => Some(self.new2.as_str()),
            _ => None,
        }
    }

    fn overlay(&self) -> Overlay {
        let steps = [
            ("New passphrase", masked(&self.new1, self.show_password)),
            ("Confirm passphrase", masked(&self.new2, self.show_password)),
            ("Key file (optional)", self.key_file.clone()),
        ];
        let mut lines = vec![String::new()];
        for (idx, (label, value)) in steps.iter().enumerate() {
            let marker = if idx == self.step { ">" } else { " " };
            lines.push(format!("{marker} {label}: {value}"));
        }
        lines.push(String::new());
        lines.push("Enter next/apply | ↑/↓ move | Ctrl+h show/hide | Esc cancel".to_string());
        Overlay::new("Change master passphrase", lines)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockTrigger {
    Manual,
    Idle,
}

impl LockTrigger {
    fn reason(self) -> &'static str {
        match self {
            LockTrigger::Manual => "Database locked",
            LockTrigger::Idle => "Locked after inactivity",
        }
    }
}

#[derive(Clone, Copy)]
enum CopyField {
    Password,
    Username,
}

struct App {
    session: Session,
    host: LocalHost,
    config: Config,
    screen: Screen,
    status: String,
    status_until: Option<Instant>,
    last_activity: Instant,
    anim_frame: usize,
    last_anim: Instant,
    update_line: Option<String>,
    quit: bool,
}

impl App {
    fn new(config: Config, host: LocalHost) -> Self {
        let now = Instant::now();
        Self {
            session: Session::new(VaultFormat::default()),
            host,
            config,
            screen: Screen::Welcome(None),
            status: WELCOME_HINT.to_string(),
            status_until: None,
            last_activity: now,
            anim_frame: 0,
            last_anim: now,
            update_line: None,
            quit: false,
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        while !self.quit {
            let now = Instant::now();
            self.tick(now);
            terminal.draw(|f| self.draw(f, now))?;

            if event::poll(POLL_INTERVAL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.last_activity = Instant::now();
                        self.handle_key(key);
                    }
                }
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.session.is_dirty() {
            warn!("exiting with unsaved changes discarded");
        }
        self.session.lock();
        if let Err(e) = self.host.clear_clipboard() {
            warn!(error = %e, "clipboard clear on exit failed");
        }
        info!("session closed");
    }

    fn hint(&self) -> &'static str {
        match &self.screen {
            Screen::Welcome(_) => WELCOME_HINT,
            Screen::Unlock(_) => UNLOCK_HINT,
            Screen::Browser(b) if b.searching => SEARCH_HINT,
            Screen::Browser(_) => BROWSER_HINT,
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.status_until = Some(Instant::now() + Duration::from_secs(STATUS_MESSAGE_SECS));
    }

    fn tick(&mut self, now: Instant) {
        if let Some(until) = self.status_until {
            if now >= until {
                self.status = self.hint().to_string();
                self.status_until = None;
            }
        }
        if now.duration_since(self.last_anim) >= ANIM_INTERVAL {
            self.anim_frame = self.anim_frame.wrapping_add(1);
            self.last_anim = now;
        }

        for event in self.host.poll_events(now) {
            match event {
                HostEvent::ClipboardCleared => self.set_status("Clipboard cleared"),
                HostEvent::Update(update) => self.on_update_event(update),
            }
        }

        let idle_limit = self.config.idle_lock_secs;
        if idle_limit > 0
            && matches!(self.screen, Screen::Browser(_))
            && now.duration_since(self.last_activity) >= Duration::from_secs(idle_limit)
        {
            self.last_activity = now;
            let screen = std::mem::replace(&mut self.screen, Screen::Welcome(None));
            self.screen = match screen {
                Screen::Browser(browser) => self.lock_session(browser, LockTrigger::Idle),
                other => other,
            };
        }
    }

    fn on_update_event(&mut self, event: UpdateEvent) {
        let quiet = matches!(event, UpdateEvent::Checking | UpdateEvent::Progress(_));
        let line = match event {
            UpdateEvent::Checking => "Checking for updates...".to_string(),
            UpdateEvent::Available(release) => {
                if release.notes.is_empty() {
                    format!("Version {} is available (U to download)", release.version)
                } else {
                    format!("Version {} is available: {}", release.version, release.notes)
                }
            }
            UpdateEvent::NotAvailable => format!("v{} is the latest version", app_version()),
            UpdateEvent::Error(message) => format!("Update failed: {message}"),
            UpdateEvent::Progress(percent) => format!("Downloading update... {percent}%"),
            UpdateEvent::Downloaded(_) => "Update downloaded, press i in the updates panel to install".to_string(),
        };
        if !quiet {
            self.set_status(line.clone());
        }
        self.update_line = Some(line);
    }

    fn remember_database(&mut self, path: &Path) {
        if self.config.last_database.as_deref() == Some(path) {
            return;
        }
        self.config.last_database = Some(path.to_path_buf());
        if let Err(e) = save_config(&self.config) {
            warn!(error = %e, "could not record last database");
        }
    }

    fn open_database(&mut self, path: PathBuf) -> Screen {
        match self.host.read_bytes(&path) {
            Ok(bytes) => {
                self.session.open(path.clone(), bytes);
                self.remember_database(&path);
                self.status = UNLOCK_HINT.to_string();
                Screen::Unlock(UnlockDialog::new())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "open failed");
                self.set_status(format!("Could not read {}: {e}", path.display()));
                Screen::Welcome(None)
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        let screen = std::mem::replace(&mut self.screen, Screen::Welcome(None));
        self.screen = match screen {
            Screen::Welcome(dialog) => self.on_welcome_key(dialog, key),
            Screen::Unlock(dialog) => self.on_unlock_key(dialog, key),
            Screen::Browser(browser) => self.on_browser_key(browser, key),
        };
    }

    fn on_welcome_key(&mut self, dialog: Option<WelcomeDialog>, key: KeyEvent) -> Screen {
        let Some(dialog) = dialog else {
            return match key.code {
                KeyCode::Char('o') => {
                    let dir = self.host.database_dir().to_path_buf();
                    let candidates = self.host.list_databases();
                    Screen::Welcome(Some(WelcomeDialog::Open(OpenDialog::new(dir, candidates))))
                }
                KeyCode::Char('n') => {
                    let dir = self.host.database_dir().to_path_buf();
                    Screen::Welcome(Some(WelcomeDialog::Create(CreateDialog::new(dir))))
                }
                KeyCode::Enter => match self.config.last_database.clone() {
                    Some(path) => self.open_database(path),
                    None => {
                        self.set_status("No recent database, press o to open one");
                        Screen::Welcome(None)
                    }
                },
                KeyCode::Char('q') | KeyCode::Esc => {
                    self.quit = true;
                    Screen::Welcome(None)
                }
                _ => Screen::Welcome(None),
            };
        };
        let Some(input) = dialog_input(key) else {
            return Screen::Welcome(Some(dialog));
        };

        match dialog {
            WelcomeDialog::Open(mut open) => {
                match open.handle(input, &self.host, &mut self.session) {
                    DialogOutcome::Cancelled => Screen::Welcome(None),
                    DialogOutcome::Opened(path) => {
                        self.remember_database(&path);
                        self.status = UNLOCK_HINT.to_string();
                        Screen::Unlock(UnlockDialog::new())
                    }
                    _ => Screen::Welcome(Some(WelcomeDialog::Open(open))),
                }
            }
            WelcomeDialog::Create(mut create) => {
                match create.handle(input, &self.host, &mut self.session) {
                    DialogOutcome::Cancelled => Screen::Welcome(None),
                    DialogOutcome::Unlocked => {
                        if let Some(path) = self.session.path().map(Path::to_path_buf) {
                            self.remember_database(&path);
                        }
                        self.set_status("Database created");
                        Screen::Browser(Browser::new())
                    }
                    _ => Screen::Welcome(Some(WelcomeDialog::Create(create))),
                }
            }
        }
    }

    fn on_unlock_key(&mut self, mut dialog: UnlockDialog, key: KeyEvent) -> Screen {
        let Some(input) = dialog_input(key) else {
            return Screen::Unlock(dialog);
        };
        match dialog.handle(input, &self.host, &mut self.session) {
            DialogOutcome::Cancelled => {
                self.status = WELCOME_HINT.to_string();
                Screen::Welcome(None)
            }
            DialogOutcome::Unlocked => {
                self.set_status("Unlocked");
                self.select_first_entry();
                Screen::Browser(Browser::new())
            }
            _ => {
                if let Some(message) = dialog.status() {
                    self.set_status(message.to_string());
                }
                Screen::Unlock(dialog)
            }
        }
    }

    fn on_browser_key(&mut self, mut browser: Browser, key: KeyEvent) -> Screen {
        if let Some(modal) = browser.modal.take() {
            browser.modal = self.on_modal_key(modal, key);
            return Screen::Browser(browser);
        }
        if browser.searching {
            self.on_search_key(&mut browser, key);
            return Screen::Browser(browser);
        }

        match key.code {
            // Ctrl+s arrives as 's' with the control modifier.
            KeyCode::Char('s') => {
                self.save();
            }
            KeyCode::Char('q') | KeyCode::Esc => {
                if self.session.is_dirty() {
                    browser.modal = Some(Modal::Quit);
                } else {
                    self.quit = true;
                }
            }
            KeyCode::Left => browser.focus = Pane::Groups,
            KeyCode::Right => browser.focus = Pane::Entries,
            KeyCode::Up => self.move_selection(browser.focus, false),
            KeyCode::Down => self.move_selection(browser.focus, true),
            KeyCode::Enter | KeyCode::Char('c') => self.copy_field(CopyField::Password),
            KeyCode::Char('u') => self.copy_field(CopyField::Username),
            KeyCode::Char('v') => browser.reveal_password = !browser.reveal_password,
            KeyCode::Char('/') => {
                browser.searching = true;
                self.status = SEARCH_HINT.to_string();
                self.status_until = None;
            }
            KeyCode::Char('f') => match self.session.selected_entry().map(|e| e.uuid) {
                Some(uuid) => {
                    let on = self.session.toggle_favorite(uuid);
                    self.set_status(if on { "Added to favorites" } else { "Removed from favorites" });
                }
                None => self.set_status("No entry selected"),
            },
            KeyCode::Char('n') => match self.session.selected_group().map(|g| g.uuid) {
                Some(group) => browser.modal = Some(Modal::Editor(EntryForm::new(group))),
                None => self.set_status("Select a group first"),
            },
            KeyCode::Char('e') => match self.session.selected_entry() {
                Some(entry) => browser.modal = Some(Modal::Editor(EntryForm::edit(entry))),
                None => self.set_status("No entry selected"),
            },
            KeyCode::Char('g') => match self.session.selected_group().map(|g| g.uuid) {
                Some(parent) => {
                    browser.modal = Some(Modal::Group(GroupPrompt {
                        parent,
                        name: String::new(),
                    }))
                }
                None => self.set_status("Select a group first"),
            },
            KeyCode::Char('d') => browser.modal = self.pending_delete(browser.focus),
            KeyCode::Char('p') => {
                browser.modal = Some(Modal::Generator(GeneratorPanel::new(
                    self.config.generator,
                    None,
                )))
            }
            KeyCode::Char('m') => {
                browser.modal = Some(Modal::ChangeMaster(ChangeMasterForm::default()))
            }
            KeyCode::Char('U') => browser.modal = Some(Modal::Updates),
            KeyCode::Char('l') => return self.lock_session(browser, LockTrigger::Manual),
            _ => {}
        }
        Screen::Browser(browser)
    }

    fn on_search_key(&mut self, browser: &mut Browser, key: KeyEvent) {
        let mut text = self.session.search().to_string();
        match key.code {
            KeyCode::Esc => {
                text.clear();
                browser.searching = false;
            }
            KeyCode::Enter => browser.searching = false,
            KeyCode::Backspace => {
                text.pop();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => text.push(c),
            _ => return,
        }
        self.session.set_search(&text);
        self.sync_entry_selection();
        if !browser.searching {
            self.status = BROWSER_HINT.to_string();
        }
    }

    fn on_modal_key(&mut self, modal: Modal, key: KeyEvent) -> Option<Modal> {
        match modal {
            Modal::Editor(form) => self.on_editor_key(form, key),
            Modal::Group(prompt) => self.on_group_key(prompt, key),
            Modal::Delete(pending) => self.on_delete_key(pending, key),
            Modal::Generator(panel) => self.on_generator_key(panel, key),
            Modal::ChangeMaster(form) => self.on_change_master_key(form, key),
            Modal::Updates => self.on_updates_key(key),
            Modal::Quit => self.on_quit_key(key),
        }
    }

    fn on_editor_key(&mut self, mut form: EntryForm, key: KeyEvent) -> Option<Modal> {
        let Some(input) = dialog_input(key) else {
            return Some(Modal::Editor(form));
        };
        match input {
            DialogInput::Esc => {
                self.set_status("Edit cancelled");
                return None;
            }
            DialogInput::ToggleVisibility => form.show_password = !form.show_password,
            DialogInput::Up => form.step = form.step.saturating_sub(1),
            DialogInput::Down => form.step = (form.step + 1).min(EDITOR_LAST),
            DialogInput::Tab if form.step == EDITOR_PASSWORD => {
                return Some(Modal::Generator(GeneratorPanel::new(
                    self.config.generator,
                    Some(form),
                )));
            }
            DialogInput::Tab => form.step = (form.step + 1).min(EDITOR_LAST),
            DialogInput::Backspace => {
                form.field_mut().pop();
            }
            DialogInput::Char(c) => form.field_mut().push(c),
            DialogInput::Enter if form.step < EDITOR_LAST => form.step += 1,
            DialogInput::Enter => return self.submit_entry(form),
        }
        Some(Modal::Editor(form))
    }

    fn submit_entry(&mut self, form: EntryForm) -> Option<Modal> {
        let draft = form.to_draft();
        let result = match form.target {
            EditTarget::New(group) => self.session.create_entry(group, &draft),
            EditTarget::Existing(uuid) => self.session.update_entry(uuid, &draft).map(|_| uuid),
        };
        match result {
            Ok(uuid) => {
                if let Err(e) = self.session.select_entry(Some(uuid)) {
                    warn!(error = %e, "could not select saved entry");
                }
                let title = self
                    .session
                    .selected_entry()
                    .map(|e| e.title.clone())
                    .unwrap_or_default();
                self.set_status(format!("Saved \"{title}\" (s writes the database)"));
                None
            }
            Err(e) => {
                self.set_status(format!("Could not save entry: {e}"));
                Some(Modal::Editor(form))
            }
        }
    }

    fn on_group_key(&mut self, mut prompt: GroupPrompt, key: KeyEvent) -> Option<Modal> {
        match dialog_input(key) {
            Some(DialogInput::Esc) => return None,
            Some(DialogInput::Backspace) => {
                prompt.name.pop();
            }
            Some(DialogInput::Char(c)) => prompt.name.push(c),
            Some(DialogInput::Enter) => {
                match self.session.create_group(prompt.parent, &prompt.name) {
                    Ok(uuid) => {
                        if let Err(e) = self.session.select_group(uuid) {
                            warn!(error = %e, "could not select new group");
                        }
                        self.sync_entry_selection();
                        self.set_status(format!("Group \"{}\" created", prompt.name.trim()));
                        return None;
                    }
                    Err(e) => self.set_status(format!("Could not create group: {e}")),
                }
            }
            _ => {}
        }
        Some(Modal::Group(prompt))
    }

    fn pending_delete(&mut self, focus: Pane) -> Option<Modal> {
        match focus {
            Pane::Entries => match self.session.selected_entry() {
                Some(entry) => Some(Modal::Delete(PendingDelete::Entry {
                    uuid: entry.uuid,
                    title: entry.title.clone(),
                    permanent: self.session.is_recycled(entry.uuid),
                })),
                None => {
                    self.set_status("No entry selected");
                    None
                }
            },
            Pane::Groups => match self.session.selected_group() {
                Some(group) if group.parent.is_none() => {
                    self.set_status("The root group cannot be deleted");
                    None
                }
                Some(group) => Some(Modal::Delete(PendingDelete::Group {
                    uuid: group.uuid,
                    name: group.name.clone(),
                    permanent: self.session.is_recycled(group.uuid),
                })),
                None => {
                    self.set_status("No group selected");
                    None
                }
            },
        }
    }

    fn on_delete_key(&mut self, pending: PendingDelete, key: KeyEvent) -> Option<Modal> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                let (result, label) = match &pending {
                    PendingDelete::Entry { uuid, title, permanent: true } => {
                        (self.session.delete_entry(*uuid), format!("Deleted \"{title}\""))
                    }
                    PendingDelete::Entry { uuid, title, permanent: false } => (
                        self.session.delete_entry(*uuid),
                        format!("Moved \"{title}\" to the recycle bin"),
                    ),
                    PendingDelete::Group { uuid, name, permanent: true } => (
                        self.session.delete_group(*uuid),
                        format!("Deleted group \"{name}\""),
                    ),
                    PendingDelete::Group { uuid, name, permanent: false } => (
                        self.session.delete_group(*uuid),
                        format!("Moved group \"{name}\" to the recycle bin"),
                    ),
                };
                match result {
                    Ok(()) => {
                        self.sync_entry_selection();
                        self.set_status(label);
                    }
                    Err(e) => self.set_status(format!("Delete failed: {e}")),
                }
                None
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.set_status("Delete cancelled");
                None
            }
            _ => Some(Modal::Delete(pending)),
        }
    }

    fn on_generator_key(&mut self, mut panel: GeneratorPanel, key: KeyEvent) -> Option<Modal> {
        match key.code {
            KeyCode::Esc => {
                self.remember_generator(panel.options);
                return panel.return_to.map(Modal::Editor);
            }
            KeyCode::Enter => {
                self.remember_generator(panel.options);
                return match panel.return_to.take() {
                    Some(mut form) => {
                        form.password = panel.password;
                        Some(Modal::Editor(form))
                    }
                    None => {
                        self.copy_text(&panel.password, "Generated password");
                        None
                    }
                };
            }
            KeyCode::Left | KeyCode::Char('-') => {
                panel.options.length = panel.options.length.saturating_sub(1).max(MIN_LENGTH)
            }
            KeyCode::Right | KeyCode::Char('+') => {
                panel.options.length = (panel.options.length + 1).min(MAX_LENGTH)
            }
            KeyCode::Char('u') => panel.options.uppercase = !panel.options.uppercase,
            KeyCode::Char('l') => panel.options.lowercase = !panel.options.lowercase,
            KeyCode::Char('d') => panel.options.digits = !panel.options.digits,
            KeyCode::Char('s') => panel.options.symbols = !panel.options.symbols,
            KeyCode::Char('a') => {
                panel.options.exclude_ambiguous = !panel.options.exclude_ambiguous
            }
            KeyCode::Char('r') => {}
            KeyCode::Char('c') => {
                self.copy_text(&panel.password, "Generated password");
                return Some(Modal::Generator(panel));
            }
            _ => return Some(Modal::Generator(panel)),
        }
        panel.regenerate();
        Some(Modal::Generator(panel))
    }

    fn remember_generator(&mut self, options: GeneratorOptions) {
        if self.config.generator == options {
            return;
        }
        self.config.generator = options;
        if let Err(e) = save_config(&self.config) {
            warn!(error = %e, "could not store generator options");
        }
    }

    fn on_change_master_key(&mut self, mut form: ChangeMasterForm, key: KeyEvent) -> Option<Modal> {
        let Some(input) = dialog_input(key) else {
            return Some(Modal::ChangeMaster(form));
        };
        match input {
            DialogInput::Esc => {
                self.set_status("Master passphrase unchanged");
                return None;
            }
            DialogInput::ToggleVisibility => form.show_password = !form.show_password,
            DialogInput::Up => form.step = form.step.saturating_sub(1),
            DialogInput::Down | DialogInput::Tab => {
                form.step = (form.step + 1).min(MASTER_KEY_FILE)
            }
            DialogInput::Backspace => {
                form.field_mut().pop();
            }
            DialogInput::Char(c) => form.field_mut().push(c),
            DialogInput::Enter if form.step < MASTER_KEY_FILE => form.step += 1,
            DialogInput::Enter => return self.apply_master_change(form),
        }
        Some(Modal::ChangeMaster(form))
    }

    fn apply_master_change(&mut self, mut form: ChangeMasterForm) -> Option<Modal> {
        if form.new1.is_empty() {
            self.set_status("Passphrase cannot be empty");
            form.step = MASTER_NEW;
            return Some(Modal::ChangeMaster(form));
        }
        if *form.new1 != *form.new2 {
            self.set_status("Passphrases do not match");
            form.new2.clear();
            form.step = MASTER_CONFIRM;
            return Some(Modal::ChangeMaster(form));
        }
        let key = match form.key_file.trim() {
            "" => None,
            raw => match self.host.read_bytes(Path::new(raw)) {
                Ok(bytes) => Some(Zeroizing::new(bytes)),
                Err(e) => {
                    self.set_status(format!("Could not read key file {raw}: {e}"));
                    return Some(Modal::ChangeMaster(form));
                }
            },
        };
        if let Err(e) = self
            .session
            .change_credentials(&form.new1, key.as_ref().map(|k| k.as_slice()))
        {
            self.set_status(format!("Could not change passphrase: {e}"));
            return None;
        }
        if self.save() {
            self.set_status("Master passphrase updated");
        }
        None
    }

    fn on_updates_key(&mut self, key: KeyEvent) -> Option<Modal> {
        let result = match key.code {
            KeyCode::Esc | KeyCode::Char('q') => return None,
            KeyCode::Char('c') => self.host.check_for_updates(),
            KeyCode::Char('d') => self.host.download_update(),
            KeyCode::Char('i') => self.host.install_update().map(|path| {
                self.update_line = Some(format!(
                    "Installed to {}, restart to finish",
                    path.display()
                ));
            }),
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.update_line = Some(e.to_string());
        }
        Some(Modal::Updates)
    }

    fn on_quit_key(&mut self, key: KeyEvent) -> Option<Modal> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if self.save() {
                    self.quit = true;
                }
                None
            }
            KeyCode::Char('n') | KeyCode::Char('N') => {
                self.quit = true;
                None
            }
            KeyCode::Esc => None,
            _ => Some(Modal::Quit),
        }
    }

    fn save(&mut self) -> bool {
        match self.session.save(&self.host) {
            Ok(()) => {
                self.set_status("Saved");
                true
            }
            Err(e) => {
                self.set_status(format!("Save failed: {e}"));
                false
            }
        }
    }

    /// Saves pending edits, then locks. On a manual lock a failed save keeps
    /// the database open so the edits are not lost. An idle lock always locks
    /// and drops edits that could not be written.
    fn lock_session(&mut self, browser: Browser, trigger: LockTrigger) -> Screen {
        let mut status = trigger.reason().to_string();
        if self.session.is_dirty() {
            if let Err(e) = self.session.save(&self.host) {
                if trigger == LockTrigger::Manual {
                    warn!(error = %e, "lock skipped: unsaved changes could not be written");
                    self.set_status(format!("Save failed: {e}"));
                    return Screen::Browser(browser);
                }
                warn!(error = %e, "idle lock discarded unsaved changes");
                status = format!("{status}; unsaved changes were lost: {e}");
            }
        }
        drop(browser);
        self.session.lock();
        if let Err(e) = self.host.clear_clipboard() {
            warn!(error = %e, "clipboard clear on lock failed");
        }
        info!(reason = trigger.reason(), "session locked");
        self.set_status(status);
        Screen::Unlock(UnlockDialog::new())
    }

    fn copy_text(&mut self, text: &str, label: &str) {
        match self.host.copy_to_clipboard(text, Instant::now()) {
            Ok(()) => self.set_status(format!(
                "{label} copied, clipboard clears in {}s",
                self.config.clipboard_clear_secs
            )),
            Err(e) => self.set_status(format!("Copy failed: {e}")),
        }
    }

    fn copy_field(&mut self, field: CopyField) {
        let Some(entry) = self.session.selected_entry() else {
            self.set_status("No entry selected");
            return;
        };
        let (text, label) = match field {
            CopyField::Password => (Zeroizing::new(entry.password.reveal()), "Password"),
            CopyField::Username => (Zeroizing::new(entry.username.clone()), "Username"),
        };
        if text.is_empty() {
            self.set_status(format!("{label} is empty"));
            return;
        }
        self.copy_text(&text, label);
    }

    fn select_first_entry(&mut self) {
        let first = self.session.visible_entries().first().map(|e| e.uuid);
        if let Err(e) = self.session.select_entry(first) {
            warn!(error = %e, "could not select entry");
        }
    }

    /// Keeps the entry selection inside the visible list.
    fn sync_entry_selection(&mut self) {
        let visible: Vec<Uuid> = self
            .session
            .visible_entries()
            .iter()
            .map(|e| e.uuid)
            .collect();
        let current = self.session.selected_entry().map(|e| e.uuid);
        if current.is_some_and(|id| visible.contains(&id)) {
            return;
        }
        if let Err(e) = self.session.select_entry(visible.first().copied()) {
            warn!(error = %e, "could not select entry");
        }
    }

    fn move_selection(&mut self, focus: Pane, down: bool) {
        match focus {
            Pane::Groups => {
                let ids: Vec<Uuid> = self
                    .session
                    .root()
                    .map(|root| root.flatten().iter().map(|(_, g)| g.uuid).collect())
                    .unwrap_or_default();
                let current = self
                    .session
                    .selected_group()
                    .and_then(|g| ids.iter().position(|id| *id == g.uuid));
                if let Some(uuid) = step_selection(&ids, current, down) {
                    if let Err(e) = self.session.select_group(uuid) {
                        warn!(error = %e, "could not select group");
                    }
                    self.sync_entry_selection();
                }
            }
            Pane::Entries => {
                let ids: Vec<Uuid> = self
                    .session
                    .visible_entries()
                    .iter()
                    .map(|e| e.uuid)
                    .collect();
                let current = self
                    .session
                    .selected_entry()
                    .and_then(|e| ids.iter().position(|id| *id == e.uuid));
                if let Some(uuid) = step_selection(&ids, current, down) {
                    if let Err(e) = self.session.select_entry(Some(uuid)) {
                        warn!(error = %e, "could not select entry");
                    }
                }
            }
        }
    }

    fn modal_overlay(&self, modal: &Modal) -> Overlay {
        match modal {
            Modal::Editor(form) => form.overlay(),
            Modal::Generator(panel) => panel.overlay(),
            Modal::ChangeMaster(form) => form.overlay(),
            Modal::Group(prompt) => Overlay::new(
                "New group",
                vec![
                    String::new(),
                    format!("> Name: {}", prompt.name),
                    String::new(),
                    "Enter create | Esc cancel".to_string(),
                ],
            ),
            Modal::Delete(pending) => {
                let what = match pending {
                    PendingDelete::Entry { title, permanent: true, .. } => {
                        format!("Permanently delete entry \"{title}\"?")
                    }
                    PendingDelete::Entry { title, permanent: false, .. } => {
                        format!("Move entry \"{title}\" to the recycle bin?")
                    }
                    PendingDelete::Group { name, permanent: true, .. } => {
                        format!("Permanently delete group \"{name}\" and everything in it?")
                    }
                    PendingDelete::Group { name, permanent: false, .. } => {
                        format!("Move group \"{name}\" and everything in it to the recycle bin?")
                    }
                };
                Overlay::new(
                    "Confirm delete",
                    vec![what, String::new(), "[y] Yes   [n] No".to_string()],
                )
            }
            Modal::Quit => Overlay::new(
                "Unsaved changes",
                vec![
                    "Save before quitting?".to_string(),
                    String::new(),
                    "[y] Save and quit   [n] Quit without saving   [Esc] Stay".to_string(),
                ],
            ),
            Modal::Updates => {
                let mut lines = vec![format!("Installed version: v{}", app_version()), String::new()];
                if self.host.updates_enabled() {
                    lines.push(
                        self.update_line
                            .clone()
                            .unwrap_or_else(|| "No update check yet".to_string()),
                    );
                    lines.push(String::new());
                    lines.push("c check | d download | i install | Esc close".to_string());
                } else {
                    lines.push("Updates are disabled (no manifest url configured)".to_string());
                    lines.push(String::new());
                    lines.push("Esc close".to_string());
                }
                Overlay::new("Updates", lines)
            }
        }
    }

    fn draw(&self, f: &mut Frame<'_>, now: Instant) {
        match &self.screen {
            Screen::Welcome(dialog) => {
                let overlay = dialog.as_ref().map(|d| match d {
                    WelcomeDialog::Open(open) => Overlay::new("Open database", open.lines()),
                    WelcomeDialog::Create(create) => Overlay::new("New database", create.lines()),
                });
                let view = WelcomeView {
                    last_database: self.config.last_database.as_deref(),
                    status: self.status.clone(),
                    overlay,
                    version: app_version(),
                };
                draw_welcome(f, &view);
            }
            Screen::Unlock(dialog) => {
                let passphrase = dialog.passphrase_display();
                let view = UnlockView {
                    database: self.session.path().unwrap_or(Path::new("")),
                    passphrase_display: &passphrase,
                    passphrase_visible: dialog.passphrase_visible(),
                    key_file: dialog.key_file(),
                    editing_key_file: dialog.editing_key_file(),
                    status: self.status.clone(),
                    anim_frame: self.anim_frame,
                };
                draw_unlock(f, &view);
            }
            Screen::Browser(browser) => {
                let view = BrowserView {
                    session: &self.session,
                    focus: browser.focus,
                    reveal_password: browser.reveal_password,
                    searching: browser.searching,
                    overlay: browser.modal.as_ref().map(|m| self.modal_overlay(m)),
                    status: self.status.clone(),
                    status_strength: modal_strength(browser.modal.as_ref()),
                    clipboard_remaining: self.host.clipboard_remaining(now),
                };
                draw_browser(f, &view);
            }
        }
    }
}

/// Strength of the secret being typed in the open form, if any.
fn modal_strength(modal: Option<&Modal>) -> Option<Strength> {
    match modal? {
        Modal::Editor(form) if form.step == EDITOR_PASSWORD => {
            Some(classify_strength(&form.password))
        }
        Modal::ChangeMaster(form) => form.current_secret().map(classify_strength),
        Modal::Generator(panel) => Some(classify_strength(&panel.password)),
        _ => None,
    }
}

fn step_selection(ids: &[Uuid], current: Option<usize>, down: bool) -> Option<Uuid> {
    if ids.is_empty() {
        return None;
    }
    let next = match current {
        None => 0,
        Some(idx) if down => (idx + 1).min(ids.len() - 1),
        Some(idx) => idx.saturating_sub(1),
    };
    ids.get(next).copied()
}
