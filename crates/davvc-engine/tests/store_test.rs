use std::fs;
use std::path::Path;

use davvc_engine::{history_dir_name, VcError, VcStore};
use tempfile::TempDir;

fn open_store(root: &Path) -> VcStore {
    VcStore::open(root, "root", "vc_root", 8).unwrap()
}

fn write_working_file(store: &VcStore, name: &str, content: &str) {
    fs::write(store.fs_root().join(name), content).unwrap();
}

#[test]
fn first_version_control_provisions_history() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let head = store.version_control("/test.txt").unwrap();
    assert_eq!(head.len(), 40);
    assert!(head.chars().all(|c| c.is_ascii_hexdigit()));

    // The working-tree entry became a symlink into the history tree.
    let link = store.fs_root().join("test.txt");
    let meta = fs::symlink_metadata(&link).unwrap();
    assert!(meta.file_type().is_symlink());

    let history_dir = store.vc_root().join(history_dir_name("/test.txt"));
    let blob = history_dir.join("init");
    assert_eq!(fs::read_link(&link).unwrap(), blob);
    assert_eq!(fs::read_to_string(&blob).unwrap(), "hello");

    // Reading through the symlink observes the same bytes.
    assert_eq!(fs::read_to_string(&link).unwrap(), "hello");
}

#[test]
fn initial_commit_carries_fixed_author() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");
    store.version_control("/test.txt").unwrap();

    let repo =
        git2::Repository::open(store.vc_root().join(history_dir_name("/test.txt"))).unwrap();
    let commit = repo.head().unwrap().peel_to_commit().unwrap();
    let author = commit.author();
    assert_eq!(author.name(), Some("root"));
    assert_eq!(author.email(), Some("root@root.com"));
}

#[test]
fn version_control_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let first = store.version_control("/test.txt").unwrap();
    let second = store.version_control("/test.txt").unwrap();
    assert_eq!(first, second);

    // Still exactly one history subdirectory.
    let entries = fs::read_dir(store.vc_root()).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn checkin_after_change_advances_head() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let first = store.version_control("/test.txt").unwrap();
    fs::write(store.fs_root().join("test.txt"), "world").unwrap();
    let second = store.checkin("/test.txt").unwrap();
    assert_ne!(first, second);

    // VERSION-CONTROL now reports the id checkin just produced.
    assert_eq!(store.version_control("/test.txt").unwrap(), second);
}

#[test]
fn checkin_without_change_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");
    store.version_control("/test.txt").unwrap();

    match store.checkin("/test.txt") {
        Err(VcError::EmptyCommit) => {}
        other => panic!("expected EmptyCommit, got {other:?}"),
    }
}

#[test]
fn checkout_restores_historical_content() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let first = store.version_control("/test.txt").unwrap();
    fs::write(store.fs_root().join("test.txt"), "world").unwrap();
    store.checkin("/test.txt").unwrap();

    store.checkout("/test.txt", &first).unwrap();
    assert_eq!(
        fs::read_to_string(store.fs_root().join("test.txt")).unwrap(),
        "hello"
    );
}

#[test]
fn checkin_while_checked_out_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let first = store.version_control("/test.txt").unwrap();
    fs::write(store.fs_root().join("test.txt"), "world").unwrap();
    store.checkin("/test.txt").unwrap();
    store.checkout("/test.txt", &first).unwrap();

    match store.checkin("/test.txt") {
        Err(VcError::CheckedOut) => {}
        other => panic!("expected CheckedOut, got {other:?}"),
    }
}

#[test]
fn uncheckout_returns_to_branch_tip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let first = store.version_control("/test.txt").unwrap();
    fs::write(store.fs_root().join("test.txt"), "world").unwrap();
    let second = store.checkin("/test.txt").unwrap();

    store.checkout("/test.txt", &first).unwrap();
    store.uncheckout("/test.txt").unwrap();

    assert_eq!(
        fs::read_to_string(store.fs_root().join("test.txt")).unwrap(),
        "world"
    );
    assert_eq!(store.version_control("/test.txt").unwrap(), second);
}

#[test]
fn uncheckout_is_idempotent_when_checked_in() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");
    store.version_control("/test.txt").unwrap();

    store.uncheckout("/test.txt").unwrap();
    assert_eq!(
        fs::read_to_string(store.fs_root().join("test.txt")).unwrap(),
        "hello"
    );
}

#[test]
fn checkout_discards_local_modifications() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let first = store.version_control("/test.txt").unwrap();
    // Uncommitted edit through the working tree; force checkout drops it.
    fs::write(store.fs_root().join("test.txt"), "scratch").unwrap();
    store.checkout("/test.txt", &first).unwrap();
    assert_eq!(
        fs::read_to_string(store.fs_root().join("test.txt")).unwrap(),
        "hello"
    );
}

#[test]
fn checkout_of_unknown_version_fails() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");
    store.version_control("/test.txt").unwrap();

    match store.checkout("/test.txt", "deadbeef") {
        Err(VcError::UnknownVersion(v)) => assert_eq!(v, "deadbeef"),
        other => panic!("expected UnknownVersion, got {other:?}"),
    }
}

#[test]
fn version_resolves_revision_expressions() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");

    let first = store.version_control("/test.txt").unwrap();
    fs::write(store.fs_root().join("test.txt"), "world").unwrap();
    store.checkin("/test.txt").unwrap();

    // A commit-id prefix is a valid revision expression.
    store.checkout("/test.txt", &first[..12]).unwrap();
    assert_eq!(
        fs::read_to_string(store.fs_root().join("test.txt")).unwrap(),
        "hello"
    );
}

#[test]
fn reopen_takes_existing_repository_branch() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");
    let head = store.version_control("/test.txt").unwrap();

    // A fresh store (empty cache) must open the existing repository rather
    // than re-provision; the original file has already been moved.
    let reopened = open_store(dir.path());
    assert_eq!(reopened.version_control("/test.txt").unwrap(), head);
    assert_eq!(fs::read_dir(reopened.vc_root()).unwrap().count(), 1);
}

#[test]
fn cache_churn_does_not_change_results() {
    let dir = TempDir::new().unwrap();
    // Capacity 1 forces an eviction on every alternation.
    let store = VcStore::open(dir.path(), "root", "vc_root", 1).unwrap();
    write_working_file(&store, "one.txt", "1");
    write_working_file(&store, "two.txt", "2");

    let one = store.version_control("/one.txt").unwrap();
    let two = store.version_control("/two.txt").unwrap();
    for _ in 0..4 {
        assert_eq!(store.version_control("/one.txt").unwrap(), one);
        assert_eq!(store.version_control("/two.txt").unwrap(), two);
    }
}

#[test]
fn concurrent_provisioning_of_fresh_path_converges() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "fresh.txt", "hello");

    // Race the very first VERSION-CONTROL of the path: exactly one thread
    // provisions, the rest open the repository it created.
    let barrier = std::sync::Arc::new(std::sync::Barrier::new(4));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            store.version_control("/fresh.txt").unwrap()
        }));
    }
    let heads: Vec<String> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert!(heads.iter().all(|head| head == &heads[0]));

    // One history directory, holding a single initial commit.
    assert_eq!(fs::read_dir(store.vc_root()).unwrap().count(), 1);
    let repo =
        git2::Repository::open(store.vc_root().join(history_dir_name("/fresh.txt"))).unwrap();
    let commit = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(commit.parent_count(), 0);
    assert_eq!(commit.id().to_string(), heads[0]);
}

#[test]
fn concurrent_version_control_on_same_path() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    write_working_file(&store, "test.txt", "hello");
    let head = store.version_control("/test.txt").unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            store.version_control("/test.txt").unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), head);
    }
}
