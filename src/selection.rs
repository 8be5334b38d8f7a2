use uuid::Uuid;

use crate::projector::{DisplayEntry, DisplayGroup};

/// Group and entry chosen after a rebuild of the display tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub group: Uuid,
    pub entry: Option<Uuid>,
}

pub fn find_group(root: &DisplayGroup, uuid: Uuid) -> Option<&DisplayGroup> {
    if root.uuid == uuid {
        return Some(root);
    }
    root.groups.iter().find_map(|child| find_group(child, uuid))
}

pub fn find_entry(root: &DisplayGroup, uuid: Uuid) -> Option<&DisplayEntry> {
    root.entries
        .iter()
        .find(|entry| entry.uuid == uuid)
        .or_else(|| root.groups.iter().find_map(|child| find_entry(child, uuid)))
}

/// Re-locates the previous selection in a freshly projected tree. A group
/// that no longer exists falls back to the root; a missing entry to none.
pub fn resolve(root: &DisplayGroup, group: Option<Uuid>, entry: Option<Uuid>) -> Selection {
    let group = group
        .and_then(|id| find_group(root, id))
        .map_or(root.uuid, |g| g.uuid);
    let entry = entry.and_then(|id| find_entry(root, id)).map(|e| e.uuid);
    Selection { group, entry }
}
