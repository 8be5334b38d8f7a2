//! Credential store session: owns the decrypted database and mediates every
//! mutation, rebuilding the display tree and re-resolving the selection after
//! each one.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::CompositeKey;
use crate::format::{DatabaseFormat, FormatError};
use crate::host::FileHost;
use crate::models::{
    Database, Entry, FieldValue, Group, DEFAULT_ENTRY_TITLE, FIELD_NOTES, FIELD_PASSWORD,
    FIELD_TITLE, FIELD_URL, FIELD_USERNAME,
};
use crate::projector::{project, DisplayEntry, DisplayGroup};
use crate::selection::{find_entry, find_group, resolve};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("could not decrypt the database (wrong credentials or damaged file)")]
    DecryptionFailed(#[source] FormatError),
    #[error("could not access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    PreconditionFailed(&'static str),
}

/// Field values for creating or overwriting an entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryDraft {
    pub title: String,
    pub username: String,
    pub password: FieldValue,
    pub url: String,
    pub notes: String,
    pub tags: Vec<String>,
    pub custom_fields: BTreeMap<String, FieldValue>,
    pub expires: Option<DateTime<Utc>>,
}

impl EntryDraft {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    fn apply(&self, entry: &mut Entry) {
        entry.set_field(FIELD_TITLE, FieldValue::plain(self.title.clone()));
        entry.set_field(FIELD_USERNAME, FieldValue::plain(self.username.clone()));
        let password = match &self.password {
            FieldValue::Plain(text) => FieldValue::protected(text),
            protected => protected.clone(),
        };
        entry.set_field(FIELD_PASSWORD, password);
        entry.set_field(FIELD_URL, FieldValue::plain(self.url.clone()));
        entry.set_field(FIELD_NOTES, FieldValue::plain(self.notes.clone()));
        for (name, value) in &self.custom_fields {
            entry.set_field(name, value.clone());
        }
        entry.tags = self.tags.clone();
        entry.times.expires = self.expires;
        entry.times.touch();
    }
}

impl From<&DisplayEntry> for EntryDraft {
    fn from(entry: &DisplayEntry) -> Self {
        Self {
            title: entry.title.clone(),
            username: entry.username.clone(),
            password: entry.password.clone(),
            url: entry.url.clone(),
            notes: entry.notes.clone(),
            tags: entry.tags.clone(),
            custom_fields: entry.custom_fields.clone(),
            expires: entry.expires,
        }
    }
}

pub struct Session {
    format: Box<dyn DatabaseFormat>,
    database: Option<Database>,
    key: Option<CompositeKey>,
    path: Option<PathBuf>,
    pending: Option<Vec<u8>>,
    root: Option<DisplayGroup>,
    selected_group: Option<Uuid>,
    selected_entry: Option<Uuid>,
    favorites: HashSet<Uuid>,
    search: String,
    dirty: bool,
}

impl Session {
    pub fn new(format: impl DatabaseFormat + 'static) -> Self {
        Self {
            format: Box::new(format),
            database: None,
            key: None,
            path: None,
            pending: None,
            root: None,
            selected_group: None,
            selected_entry: None,
            favorites: HashSet::new(),
            search: String::new(),
            dirty: false,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.database.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn root(&self) -> Option<&DisplayGroup> {
        self.root.as_ref()
    }

    pub fn database_name(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.meta.name.as_str())
    }

    /// Stages encrypted bytes for a later [`Session::unlock`]. Any decrypted
    /// database from a previous file is discarded.
    pub fn open(&mut self, path: PathBuf, bytes: Vec<u8>) {
        info!(path = %path.display(), "database staged for unlock");
        self.clear_unlocked_state();
        self.favorites.clear();
        self.search.clear();
        self.path = Some(path);
        self.pending = Some(bytes);
    }

    /// Decrypts the staged bytes, or re-reads the source file when nothing is
    /// staged (re-unlock after [`Session::lock`]). State is untouched on
    /// failure.
    pub fn unlock(
        &mut self,
        host: &dyn FileHost,
        passphrase: &str,
        key_material: Option<&[u8]>,
    ) -> Result<(), SessionError> {
        let key = CompositeKey::new(passphrase, key_material);
        let loaded = match (&self.pending, &self.path) {
            (Some(bytes), _) => self.format.load(bytes, &key),
            (None, Some(path)) => {
                let bytes = host.read_bytes(path).map_err(|source| SessionError::Io {
                    path: path.clone(),
                    source,
                })?;
                self.format.load(&bytes, &key)
            }
            (None, None) => {
                return Err(SessionError::PreconditionFailed("no database to unlock"));
            }
        };
        let database = loaded.map_err(|err| {
            warn!(error = %err, "unlock failed");
            SessionError::DecryptionFailed(err)
        })?;

        info!(
            name = %database.meta.name,
            entries = database.root.entry_count(),
            "database unlocked"
        );
        self.pending = None;
        self.database = Some(database);
        self.key = Some(key);
        self.dirty = false;
        self.refresh(self.selected_group, self.selected_entry);
        Ok(())
    }

    /// Writes a fresh, empty database to `path` and installs it unlocked.
    pub fn create(
        &mut self,
        host: &dyn FileHost,
        path: PathBuf,
        name: &str,
        passphrase: &str,
        key_material: Option<&[u8]>,
    ) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::PreconditionFailed("database name is empty"));
        }
        let database = Database::create(name);
        let key = CompositeKey::new(passphrase, key_material);
        let bytes = self
            .format
            .save(&database, &key)
            .map_err(|err| encode_failure(&path, err))?;
        host.write_bytes(&path, &bytes)
            .map_err(|source| SessionError::Io {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), name, "database created");
        self.clear_unlocked_state();
        self.favorites.clear();
        self.search.clear();
        self.pending = None;
        self.path = Some(path);
        self.database = Some(database);
        self.key = Some(key);
        self.refresh(None, None);
        Ok(())
    }

    /// Drops the decrypted database and key. The path is kept so the file can
    /// be re-read on the next unlock.
    pub fn lock(&mut self) {
        if self.database.is_some() {
            info!("database locked");
        }
        self.clear_unlocked_state();
    }

    fn clear_unlocked_state(&mut self) {
        self.database = None;
        self.key = None;
        self.root = None;
        self.pending = None;
        self.selected_group = None;
        self.selected_entry = None;
        self.dirty = false;
    }

    pub fn save(&mut self, host: &dyn FileHost) -> Result<(), SessionError> {
        let (Some(database), Some(key)) = (self.database.as_mut(), self.key.as_ref()) else {
            return Err(SessionError::PreconditionFailed("database is locked"));
        };
        let Some(path) = self.path.as_ref() else {
            return Err(SessionError::PreconditionFailed("database has no file path"));
        };

        database.meta.revision = database.meta.revision.saturating_add(1);
        let written = self
            .format
            .save(database, key)
            .map_err(|err| encode_failure(path, err))
            .and_then(|bytes| {
                host.write_bytes(path, &bytes)
                    .map_err(|source| SessionError::Io {
                        path: path.clone(),
                        source,
                    })
            });
        if let Err(err) = written {
            database.meta.revision -= 1;
            warn!(error = %err, "save failed");
            return Err(err);
        }

        info!(path = %path.display(), revision = database.meta.revision, "database saved");
        self.dirty = false;
        Ok(())
    }

    /// Replaces the credentials used for the next save.
    pub fn change_credentials(
        &mut self,
        passphrase: &str,
        key_material: Option<&[u8]>,
    ) -> Result<(), SessionError> {
        if self.database.is_none() {
            return Err(SessionError::PreconditionFailed("database is locked"));
        }
        self.key = Some(CompositeKey::new(passphrase, key_material));
        self.dirty = true;
        info!("master credentials changed");
        Ok(())
    }

    fn database_mut(&mut self) -> Result<&mut Database, SessionError> {
        self.database
            .as_mut()
            .ok_or(SessionError::PreconditionFailed("database is locked"))
    }

    pub fn create_entry(&mut self, group: Uuid, draft: &EntryDraft) -> Result<Uuid, SessionError> {
        let database = self.database_mut()?;
        let target = database
            .root
            .find_group_mut(group)
            .ok_or(SessionError::NotFound("group"))?;

        let mut entry = Entry::new();
        draft.apply(&mut entry);
        if draft.title.trim().is_empty() {
            entry.set_field(FIELD_TITLE, FieldValue::plain(DEFAULT_ENTRY_TITLE));
        }
        let uuid = entry.uuid;
        target.entries.push(entry);
        target.times.touch();

        debug!(%uuid, %group, "entry created");
        self.dirty = true;
        self.refresh(Some(group), Some(uuid));
        Ok(uuid)
    }

    pub fn update_entry(&mut self, uuid: Uuid, draft: &EntryDraft) -> Result<(), SessionError> {
        let database = self.database_mut()?;
        let entry = database
            .root
            .find_entry_mut(uuid)
            .ok_or(SessionError::NotFound("entry"))?;
        draft.apply(entry);

        debug!(%uuid, "entry updated");
        self.dirty = true;
        self.refresh(self.selected_group, Some(uuid));
        Ok(())
    }

    /// Moves an entry to the recycle bin, or removes it for good when it is
    /// already there.
    pub fn delete_entry(&mut self, uuid: Uuid) -> Result<(), SessionError> {
        let database = self.database_mut()?;
        let removal = database
            .delete_entry(uuid)
            .ok_or(SessionError::NotFound("entry"))?;

        debug!(%uuid, ?removal, "entry deleted");
        self.favorites.remove(&uuid);
        self.dirty = true;
        self.refresh(self.selected_group, None);
        Ok(())
    }

    pub fn create_group(&mut self, parent: Uuid, name: &str) -> Result<Uuid, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::PreconditionFailed("group name is empty"));
        }
        let database = self.database_mut()?;
        let target = database
            .root
            .find_group_mut(parent)
            .ok_or(SessionError::NotFound("group"))?;
        let group = Group::new(name);
        let uuid = group.uuid;
        target.groups.push(group);
        target.times.touch();

        debug!(%uuid, %parent, "group created");
        self.dirty = true;
        self.refresh(Some(parent), self.selected_entry);
        Ok(uuid)
    }

    /// Moves a group and everything below it to the recycle bin, or removes
    /// it for good when it is the bin or already inside it. The root group
    /// reports `NotFound`. A selection inside the removed subtree falls back.
    pub fn delete_group(&mut self, uuid: Uuid) -> Result<(), SessionError> {
        let database = self.database_mut()?;
        let root_id = database.root.uuid;
        let (group_ids, entry_ids) = database
            .root
            .find_group(uuid)
            .filter(|_| uuid != root_id)
            .map(|g| (g.group_ids(), g.entry_ids()))
            .ok_or(SessionError::NotFound("group"))?;
        let removal = database
            .delete_group(uuid)
            .ok_or(SessionError::NotFound("group"))?;

        debug!(%uuid, ?removal, entries = entry_ids.len(), "group deleted");
        for id in &entry_ids {
            self.favorites.remove(id);
        }
        self.dirty = true;
        let group = self.selected_group.filter(|g| !group_ids.contains(g));
        let entry = self.selected_entry.filter(|e| !entry_ids.contains(e));
        self.refresh(group, entry);
        Ok(())
    }

    pub fn recycle_bin(&self) -> Option<Uuid> {
        self.database.as_ref().and_then(|d| d.recycle_bin().map(|bin| bin.uuid))
    }

    /// Whether a group or entry is in the recycle bin, the bin included.
    pub fn is_recycled(&self, uuid: Uuid) -> bool {
        self.database
            .as_ref()
            .is_some_and(|d| d.in_recycle_bin(uuid))
    }

    /// Rebuilds the display tree and re-resolves the selection against it.
    fn refresh(&mut self, group: Option<Uuid>, entry: Option<Uuid>) {
        let Some(database) = self.database.as_ref() else {
            self.root = None;
            return;
        };
        let root = project(&database.root);
        let selection = resolve(&root, group, entry);
        self.selected_group = Some(selection.group);
        self.selected_entry = selection.entry;
        self.root = Some(root);
    }

    pub fn select_group(&mut self, uuid: Uuid) -> Result<(), SessionError> {
        let root = self
            .root
            .as_ref()
            .ok_or(SessionError::PreconditionFailed("database is locked"))?;
        find_group(root, uuid).ok_or(SessionError::NotFound("group"))?;
        self.selected_group = Some(uuid);
        Ok(())
    }

    pub fn select_entry(&mut self, uuid: Option<Uuid>) -> Result<(), SessionError> {
        let root = self
            .root
            .as_ref()
            .ok_or(SessionError::PreconditionFailed("database is locked"))?;
        if let Some(id) = uuid {
            find_entry(root, id).ok_or(SessionError::NotFound("entry"))?;
        }
        self.selected_entry = uuid;
        Ok(())
    }

    pub fn selected_group(&self) -> Option<&DisplayGroup> {
        let root = self.root.as_ref()?;
        find_group(root, self.selected_group?)
    }

    pub fn selected_entry(&self) -> Option<&DisplayEntry> {
        let root = self.root.as_ref()?;
        find_entry(root, self.selected_entry?)
    }

    pub fn toggle_favorite(&mut self, uuid: Uuid) -> bool {
        if self.favorites.remove(&uuid) {
            false
        } else {
            self.favorites.insert(uuid);
            true
        }
    }

    pub fn is_favorite(&self, uuid: Uuid) -> bool {
        self.favorites.contains(&uuid)
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, text: &str) {
        self.search = text.to_string();
    }

    /// Entries of the selected group and its descendants, filtered by the
    /// search text, favorites first and then by title. Recycled entries only
    /// show while a group inside the recycle bin is selected.
    pub fn visible_entries(&self) -> Vec<&DisplayEntry> {
        let Some(group) = self.selected_group().or(self.root.as_ref()) else {
            return Vec::new();
        };
        let hidden: HashSet<Uuid> = match (self.recycle_bin(), self.root.as_ref()) {
            (Some(bin), Some(root)) if !self.is_recycled(group.uuid) => find_group(root, bin)
                .map(|bin| bin.all_entries().iter().map(|e| e.uuid).collect())
                .unwrap_or_default(),
            _ => HashSet::new(),
        };
        let query = self.search.to_lowercase();
        let mut entries: Vec<&DisplayEntry> = group
            .all_entries()
            .into_iter()
            .filter(|e| !hidden.contains(&e.uuid))
            .filter(|e| {
                query.is_empty()
                    || e.title.to_lowercase().contains(&query)
                    || e.username.to_lowercase().contains(&query)
                    || e.url.to_lowercase().contains(&query)
            })
            .collect();
        entries.sort_by(|a, b| {
            let a_fav = self.favorites.contains(&a.uuid);
            let b_fav = self.favorites.contains(&b.uuid);
            b_fav
                .cmp(&a_fav)
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        });
        entries
    }
}

fn encode_failure(path: &Path, err: FormatError) -> SessionError {
    SessionError::Io {
        path: path.to_path_buf(),
        source: io::Error::other(err),
    }
}
