//! Read-only display tree built from the native database graph.
//!
//! The tree is rebuilt wholesale after every mutation (O(groups + entries)),
//! so display nodes never outlive the next change and are matched across
//! rebuilds by uuid only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Entry, FieldValue, Group, FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME,
    STANDARD_FIELDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayEntry {
    pub uuid: Uuid,
    pub title: String,
    pub username: String,
    /// Left in its stored form; protected passwords stay masked until revealed.
    pub password: FieldValue,
    pub url: String,
    pub notes: String,
    pub tags: Vec<String>,
    pub icon: u32,
    pub custom_fields: BTreeMap<String, FieldValue>,
    pub expires: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayGroup {
    pub uuid: Uuid,
    pub name: String,
    pub icon: u32,
    pub entries: Vec<DisplayEntry>,
    pub groups: Vec<DisplayGroup>,
    /// Uuid of the parent group; `None` for the root.
    pub parent: Option<Uuid>,
}

impl DisplayGroup {
    /// Entries of this group and every descendant, depth-first.
    pub fn all_entries(&self) -> Vec<&DisplayEntry> {
        let mut out = Vec::new();
        collect_entries(self, &mut out);
        out
    }

    /// Depth-first `(depth, group)` listing, this group first at depth 0.
    pub fn flatten(&self) -> Vec<(usize, &DisplayGroup)> {
        let mut out = Vec::new();
        flatten_into(self, 0, &mut out);
        out
    }
}

fn collect_entries<'a>(group: &'a DisplayGroup, out: &mut Vec<&'a DisplayEntry>) {
    out.extend(group.entries.iter());
    for child in &group.groups {
        collect_entries(child, out);
    }
}

fn flatten_into<'a>(group: &'a DisplayGroup, depth: usize, out: &mut Vec<(usize, &'a DisplayGroup)>) {
    out.push((depth, group));
    for child in &group.groups {
        flatten_into(child, depth + 1, out);
    }
}

pub fn project(root: &Group) -> DisplayGroup {
    project_group(root, None)
}

fn project_group(group: &Group, parent: Option<Uuid>) -> DisplayGroup {
    DisplayGroup {
        uuid: group.uuid,
        name: group.name.clone(),
        icon: group.icon,
        entries: group.entries.iter().map(project_entry).collect(),
        groups: group
            .groups
            .iter()
            .map(|child| project_group(child, Some(group.uuid)))
            .collect(),
        parent,
    }
}

fn text_field(entry: &Entry, name: &str) -> String {
    entry.field(name).map(FieldValue::reveal).unwrap_or_default()
}

pub fn project_entry(entry: &Entry) -> DisplayEntry {
    let custom_fields = entry
        .fields
        .iter()
        .filter(|(name, _)| !STANDARD_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    DisplayEntry {
        uuid: entry.uuid,
        title: text_field(entry, FIELD_TITLE),
        username: text_field(entry, FIELD_USERNAME),
        password: entry.field(FIELD_PASSWORD).cloned().unwrap_or_default(),
        url: text_field(entry, FIELD_URL),
        notes: text_field(entry, FIELD_NOTES),
        tags: entry.tags.clone(),
        icon: entry.icon,
        custom_fields,
        expires: entry.times.expires,
        created: Some(entry.times.created),
        modified: Some(entry.times.modified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Database;

    fn sample() -> Database {
        let mut db = Database::create("Root");
        let mut social = Group::new("Social");
        let mut entry = Entry::new();
        entry.set_field(FIELD_TITLE, FieldValue::protected("Forum"));
        entry.set_field(FIELD_USERNAME, FieldValue::plain("alice"));
        entry.set_field(FIELD_PASSWORD, FieldValue::protected("pw"));
        entry.set_field("PIN", FieldValue::protected("0000"));
        entry.set_field("Recovery", FieldValue::plain("codes"));
        entry.tags.push("web".into());
        social.entries.push(entry);
        social.groups.push(Group::new("Chat"));
        db.root.groups.push(social);
        db.root.entries.push(Entry::new());
        db
    }

    #[test]
    fn projection_is_idempotent() {
        let db = sample();
        assert_eq!(project(&db.root), project(&db.root));
    }

    #[test]
    fn splits_standard_and_custom_fields() {
        let db = sample();
        let tree = project(&db.root);
        let forum = &tree.groups[0].entries[0];
        assert_eq!(forum.title, "Forum");
        assert_eq!(forum.username, "alice");
        assert!(forum.password.is_protected());
        assert_eq!(forum.password.reveal(), "pw");
        assert_eq!(forum.url, "");
        assert_eq!(
            forum.custom_fields.keys().collect::<Vec<_>>(),
            vec!["PIN", "Recovery"]
        );
        assert_eq!(forum.tags, vec!["web".to_string()]);
    }

    #[test]
    fn records_parent_ids() {
        let db = sample();
        let tree = project(&db.root);
        assert_eq!(tree.parent, None);
        let social = &tree.groups[0];
        assert_eq!(social.parent, Some(tree.uuid));
        assert_eq!(social.groups[0].parent, Some(social.uuid));
    }

    #[test]
    fn flatten_and_collect_walk_depth_first() {
        let db = sample();
        let tree = project(&db.root);
        let names: Vec<_> = tree
            .flatten()
            .into_iter()
            .map(|(depth, g)| (depth, g.name.as_str()))
            .collect();
        assert_eq!(names, vec![(0, "Root"), (1, "Social"), (2, "Chat")]);
        assert_eq!(tree.all_entries().len(), 2);
    }
}
