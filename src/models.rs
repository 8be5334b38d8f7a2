use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protected::ProtectedValue;

pub const FIELD_TITLE: &str = "Title";
pub const FIELD_USERNAME: &str = "UserName";
pub const FIELD_PASSWORD: &str = "Password";
pub const FIELD_URL: &str = "URL";
pub const FIELD_NOTES: &str = "Notes";

/// Field names with a dedicated slot in the display model. Everything else is
/// a custom field.
pub const STANDARD_FIELDS: [&str; 5] = [
    FIELD_TITLE,
    FIELD_USERNAME,
    FIELD_PASSWORD,
    FIELD_URL,
    FIELD_NOTES,
];

pub const DEFAULT_ENTRY_TITLE: &str = "New Entry";
pub const RECYCLE_BIN_NAME: &str = "Recycle Bin";
const RECYCLE_BIN_ICON: u32 = 43;

pub fn new_uuid() -> Uuid {
    Uuid::new_v4()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Plain(String),
    Protected(ProtectedValue),
}

impl FieldValue {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain(text.into())
    }

    pub fn protected(text: &str) -> Self {
        Self::Protected(ProtectedValue::from_text(text))
    }

    pub fn reveal(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Protected(value) => value.reveal(),
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Protected(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Plain(text) => text.is_empty(),
            Self::Protected(value) => value.is_empty(),
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Plain(String::new())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Times {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

impl Times {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created: now,
            modified: now,
            expires: None,
        }
    }

    pub fn touch(&mut self) {
        self.modified = Utc::now();
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::now()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    #[serde(default = "new_uuid")]
    pub uuid: Uuid,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub icon: u32,
    #[serde(default)]
    pub times: Times,
}

impl Entry {
    pub fn new() -> Self {
        Self {
            uuid: new_uuid(),
            fields: BTreeMap::new(),
            tags: Vec::new(),
            icon: 0,
            times: Times::now(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Group {
    #[serde(default = "new_uuid")]
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub icon: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub times: Times,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: new_uuid(),
            name: name.into(),
            icon: 0,
            notes: String::new(),
            times: Times::now(),
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Depth-first search for a group by id, this group included.
    pub fn find_group(&self, uuid: Uuid) -> Option<&Group> {
        if self.uuid == uuid {
            return Some(self);
        }
        self.groups.iter().find_map(|child| child.find_group(uuid))
    }

    pub fn contains_entry(&self, uuid: Uuid) -> bool {
        self.entries.iter().any(|e| e.uuid == uuid)
            || self.groups.iter().any(|child| child.contains_entry(uuid))
    }

    /// Ids of this group and every group below it.
    pub fn group_ids(&self) -> Vec<Uuid> {
        let mut ids = vec![self.uuid];
        for child in &self.groups {
            ids.extend(child.group_ids());
        }
        ids
    }

    /// Ids of every entry in this group and below it.
    pub fn entry_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.entries.iter().map(|e| e.uuid).collect();
        for child in &self.groups {
            ids.extend(child.entry_ids());
        }
        ids
    }

    pub fn find_group_mut(&mut self, uuid: Uuid) -> Option<&mut Group> {
        if self.uuid == uuid {
            return Some(self);
        }
        self.groups
            .iter_mut()
            .find_map(|child| child.find_group_mut(uuid))
    }

    pub fn find_entry_mut(&mut self, uuid: Uuid) -> Option<&mut Entry> {
        if let Some(pos) = self.entries.iter().position(|e| e.uuid == uuid) {
            return self.entries.get_mut(pos);
        }
        self.groups
            .iter_mut()
            .find_map(|child| child.find_entry_mut(uuid))
    }

    pub fn remove_entry(&mut self, uuid: Uuid) -> Option<Entry> {
        if let Some(pos) = self.entries.iter().position(|e| e.uuid == uuid) {
            self.times.touch();
            return Some(self.entries.remove(pos));
        }
        self.groups
            .iter_mut()
            .find_map(|child| child.remove_entry(uuid))
    }

    /// Removes a descendant group. Never matches `self`, so the root of a
    /// tree cannot remove itself.
    pub fn remove_group(&mut self, uuid: Uuid) -> Option<Group> {
        if let Some(pos) = self.groups.iter().position(|g| g.uuid == uuid) {
            self.times.touch();
            return Some(self.groups.remove(pos));
        }
        self.groups
            .iter_mut()
            .find_map(|child| child.remove_group(uuid))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len() + self.groups.iter().map(Group::entry_count).sum::<usize>()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Meta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_generator")]
    pub generator: String,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub recycle_bin: Option<Uuid>,
}

fn default_generator() -> String {
    format!("KeePassword {}", env!("CARGO_PKG_VERSION"))
}

/// The decrypted credential database: the single source of truth a session
/// mutates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Database {
    pub meta: Meta,
    pub root: Group,
}

impl Database {
    /// An empty database whose root group carries the database name.
    pub fn create(name: &str) -> Self {
        Self {
            meta: Meta {
                name: name.to_string(),
                description: String::new(),
                generator: default_generator(),
                revision: 0,
                recycle_bin: None,
            },
            root: Group::new(name),
        }
    }

    /// The recycle bin group, when one exists in the tree.
    pub fn recycle_bin(&self) -> Option<&Group> {
        self.meta.recycle_bin.and_then(|id| self.root.find_group(id))
    }

    /// Whether a group or entry sits in the recycle bin. The bin counts as
    /// being in itself.
    pub fn in_recycle_bin(&self, uuid: Uuid) -> bool {
        self.recycle_bin()
            .is_some_and(|bin| bin.find_group(uuid).is_some() || bin.contains_entry(uuid))
    }

    /// Id of the recycle bin, creating it under the root when missing.
    fn ensure_recycle_bin(&mut self) -> Uuid {
        if let Some(bin) = self.recycle_bin() {
            return bin.uuid;
        }
        let mut bin = Group::new(RECYCLE_BIN_NAME);
        bin.icon = RECYCLE_BIN_ICON;
        let uuid = bin.uuid;
        self.root.groups.push(bin);
        self.root.times.touch();
        self.meta.recycle_bin = Some(uuid);
        uuid
    }

    /// Moves an entry to the recycle bin, or removes it for good when it is
    /// already there. `None` when no such entry exists.
    pub fn delete_entry(&mut self, uuid: Uuid) -> Option<Removal> {
        if !self.root.contains_entry(uuid) {
            return None;
        }
        if self.in_recycle_bin(uuid) {
            self.root.remove_entry(uuid)?;
            return Some(Removal::Deleted);
        }
        let bin = self.ensure_recycle_bin();
        let mut entry = self.root.remove_entry(uuid)?;
        entry.times.touch();
        let bin = self.root.find_group_mut(bin)?;
        bin.entries.push(entry);
        bin.times.touch();
        Some(Removal::Recycled)
    }

    /// Moves a group and its contents to the recycle bin. Groups inside the
    /// bin, the bin itself and groups holding the bin are removed for good.
    /// The root is never removed.
    pub fn delete_group(&mut self, uuid: Uuid) -> Option<Removal> {
        if uuid == self.root.uuid {
            return None;
        }
        let group = self.root.find_group(uuid)?;
        let holds_bin = self
            .meta
            .recycle_bin
            .is_some_and(|bin| group.find_group(bin).is_some());
        if holds_bin || self.in_recycle_bin(uuid) {
            self.root.remove_group(uuid)?;
            if holds_bin {
                self.meta.recycle_bin = None;
            }
            return Some(Removal::Deleted);
        }
        let bin = self.ensure_recycle_bin();
        let mut group = self.root.remove_group(uuid)?;
        group.times.touch();
        let bin = self.root.find_group_mut(bin)?;
        bin.groups.push(group);
        bin.times.touch();
        Some(Removal::Recycled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Moved into the recycle bin.
    Recycled,
    /// Gone from the database.
    Deleted,
}
