use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use keepassword::clipboard::{ClipboardBackend, SecureClipboard};
use keepassword::crypto::KdfParams;
use keepassword::format::VaultFormat;
use keepassword::host::{FileHost, LocalHost};
use keepassword::models::FieldValue;
use keepassword::projector::project;
use keepassword::session::{EntryDraft, Session, SessionError};
use tempfile::{tempdir, TempDir};

fn fast_session() -> Session {
    Session::new(VaultFormat::new(KdfParams {
        m_cost: 8,
        t_cost: 1,
        p_cost: 1,
    }))
}

fn created(name: &str, passphrase: &str) -> (TempDir, LocalHost, Session, PathBuf) {
    let dir = tempdir().unwrap();
    let host = LocalHost::new(dir.path().to_path_buf());
    let path = host.resolve_save_path("flow");
    let mut session = fast_session();
    session
        .create(&host, path.clone(), name, passphrase, None)
        .unwrap();
    (dir, host, session, path)
}

#[test]
fn created_database_survives_lock_and_reread() {
    let (_dir, host, mut session, path) = created("Personal", "correct horse");
    assert!(session.is_unlocked());
    session.lock();
    assert!(!session.is_unlocked());
    assert!(session.root().is_none());
    assert_eq!(session.path(), Some(path.as_path()));

    let bytes = host.read_bytes(&path).unwrap();
    session.open(path.clone(), bytes);
    session.unlock(&host, "correct horse", None).unwrap();
    let root = session.root().unwrap();
    assert_eq!(root.name, "Personal");
    assert!(root.all_entries().is_empty());
    assert!(root.groups.is_empty());
    assert!(!session.has_pending());
}

#[test]
fn unlock_after_lock_rereads_from_disk() {
    let (_dir, host, mut session, _path) = created("Personal", "pw");
    session.lock();
    session.unlock(&host, "pw", None).unwrap();
    assert!(session.is_unlocked());
}

#[test]
fn wrong_passphrase_leaves_session_locked() {
    let (_dir, host, mut session, path) = created("Personal", "right");
    session.lock();
    session.open(path.clone(), host.read_bytes(&path).unwrap());

    let err = session.unlock(&host, "wrong", None).unwrap_err();
    assert!(matches!(err, SessionError::DecryptionFailed(_)));
    assert!(!session.is_unlocked());
    assert!(session.root().is_none());
    assert!(session.has_pending());
}

#[test]
fn test_entry_is_reachable_from_root() {
    let (_dir, _host, mut session, _path) = created("Personal", "pw");
    let root = session.root().unwrap().uuid;
    session
        .create_entry(root, &EntryDraft::titled("Test"))
        .unwrap();
    let titles: Vec<&str> = session
        .root()
        .unwrap()
        .all_entries()
        .iter()
        .map(|e| e.title.as_str())
        .collect();
    assert_eq!(titles, ["Test"]);
}

#[test]
fn deleting_selection_falls_back() {
    let (_dir, _host, mut session, _path) = created("Personal", "pw");
    let root = session.root().unwrap().uuid;
    let group = session.create_group(root, "Banking").unwrap();
    let entry = session
        .create_entry(group, &EntryDraft::titled("Bank"))
        .unwrap();
    session.select_group(group).unwrap();
    session.select_entry(Some(entry)).unwrap();

    session.delete_entry(entry).unwrap();
    assert!(session.selected_entry().is_none());
    assert_eq!(session.selected_group().unwrap().uuid, group);

    session.delete_group(group).unwrap();
    assert_eq!(session.selected_group().unwrap().uuid, root);
}

#[test]
fn saved_changes_are_encrypted_and_reloadable() {
    let (_dir, host, mut session, path) = created("Personal", "pw");
    let root = session.root().unwrap().uuid;
    let mut draft = EntryDraft::titled("Router");
    draft.username = "admin".into();
    draft.password = FieldValue::plain("very-secret-router-pw");
    draft
        .custom_fields
        .insert("PIN".into(), FieldValue::protected("4711"));
    session.create_entry(root, &draft).unwrap();
    assert!(session.is_dirty());
    session.save(&host).unwrap();
    assert!(!session.is_dirty());

    let raw = std::fs::read(&path).unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert!(!text.contains("very-secret-router-pw"));
    assert!(!text.contains("Router"));

    let mut reopened = fast_session();
    reopened.open(path.clone(), raw);
    reopened.unlock(&host, "pw", None).unwrap();
    let entries = reopened.root().unwrap().all_entries();
    assert_eq!(entries.len(), 1);
    let entry = entries[0];
    assert_eq!(entry.username, "admin");
    assert!(entry.password.is_protected());
    assert_eq!(entry.password.reveal(), "very-secret-router-pw");
    assert_eq!(entry.custom_fields["PIN"].reveal(), "4711");
}

#[test]
fn mutations_while_locked_are_rejected() {
    let (_dir, host, mut session, _path) = created("Personal", "pw");
    let root = session.root().unwrap().uuid;
    session.lock();
    assert!(matches!(
        session.create_entry(root, &EntryDraft::titled("x")),
        Err(SessionError::PreconditionFailed(_))
    ));
    assert!(matches!(
        session.save(&host),
        Err(SessionError::PreconditionFailed(_))
    ));
}

#[test]
fn projection_is_repeatable() {
    let mut db = keepassword::models::Database::create("Root");
    db.root.groups.push(keepassword::models::Group::new("Work"));
    assert_eq!(project(&db.root), project(&db.root));
}

#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Vec<String>>>);

impl ClipboardBackend for Recorder {
    fn set_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.0.borrow_mut().push(text.to_string());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.0.borrow_mut().push(String::new());
        Ok(())
    }
}

#[test]
fn second_copy_reschedules_the_single_clear() {
    let recorder = Recorder::default();
    let mut clip = SecureClipboard::new(Box::new(recorder.clone()), Duration::from_secs(30));
    let start = Instant::now();
    clip.set_text("first", start).unwrap();
    clip.set_text("second", start + Duration::from_secs(10)).unwrap();

    assert!(!clip.tick(start + Duration::from_secs(30)).unwrap());
    assert!(clip.tick(start + Duration::from_secs(40)).unwrap());
    assert!(!clip.tick(start + Duration::from_secs(80)).unwrap());
    assert_eq!(
        recorder.0.borrow().as_slice(),
        ["first".to_string(), "second".to_string(), String::new()]
    );
}
