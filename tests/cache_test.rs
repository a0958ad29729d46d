use std::io::Write;

use asset_sync_engine::engine::cache::{CacheStore, PARTIAL_PREFIX};

#[test]
fn test_write_atomic_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();

    let path = store.resource_path("q1.png").unwrap();
    assert!(!store.exists(&path));

    let data = vec![0xABu8; 4096];
    store.write_atomic(&data, &path).unwrap();

    assert!(store.exists(&path));
    assert_eq!(store.size_of(&path), Some(4096));
    assert_eq!(store.read(&path).unwrap().as_ref(), data.as_slice());
}

#[test]
fn test_write_atomic_replaces_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let path = store.resource_path("photo.png").unwrap();

    store.write_atomic(b"old bytes", &path).unwrap();
    store.write_atomic(b"new", &path).unwrap();

    assert_eq!(store.read(&path).unwrap().as_ref(), b"new");
    assert_eq!(store.list_resources().unwrap(), vec!["photo.png".to_string()]);
}

#[test]
fn test_uncommitted_stage_never_visible() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let path = store.bundle_path("model", "model.onnx").unwrap();

    let mut staged = store.stage(&path).unwrap();
    staged.write(&[1u8; 1024]).unwrap();
    assert_eq!(staged.len(), 1024);
    // Mid-write: nothing at the final path.
    assert!(!store.exists(&path));

    staged.discard();
    assert!(!store.exists(&path));
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_dropped_stage_keeps_prior_version() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let path = store.bundle_path("model", "model.onnx").unwrap();
    store.write_atomic(b"v1 weights", &path).unwrap();

    {
        let mut staged = store.stage(&path).unwrap();
        staged.write(b"v2 wei").unwrap();
        // Dropped without commit, as when a download is abandoned.
    }

    assert_eq!(store.read(&path).unwrap().as_ref(), b"v1 weights");
}

#[test]
fn test_sweep_removes_orphaned_partials() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();

    // Simulate a process killed mid-download.
    let bundle_dir = dir.path().join("bundles").join("model");
    std::fs::create_dir_all(&bundle_dir).unwrap();
    let mut orphan =
        std::fs::File::create(bundle_dir.join(format!("{}abc123", PARTIAL_PREFIX))).unwrap();
    orphan.write_all(b"truncated").unwrap();
    std::fs::write(
        store.resources_dir().join(format!("{}def456", PARTIAL_PREFIX)),
        b"half",
    )
    .unwrap();
    store
        .write_atomic(b"ok", &store.resource_path("q1.png").unwrap())
        .unwrap();

    assert_eq!(store.list_resources().unwrap(), vec!["q1.png".to_string()]);
    assert_eq!(store.sweep_partials().unwrap(), 2);
    assert_eq!(store.sweep_partials().unwrap(), 0);
    assert!(store.exists(&store.resource_path("q1.png").unwrap()));
}

#[test]
fn test_resource_ids_are_canonicalized() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();

    assert_eq!(
        store.resource_path("img/2020/q1.png").unwrap(),
        store.resource_path("q1.png").unwrap()
    );
    assert!(store.resource_path("").is_err());
    assert!(store.resource_path("img/..").is_err());
}

#[test]
fn test_stage_outside_root_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let other = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();

    assert!(store.stage(&other.path().join("x.bin")).is_err());
}

#[test]
fn test_remove_missing_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let path = store.resource_path("gone.png").unwrap();

    store.remove(&path).unwrap();
    store.write_atomic(b"x", &path).unwrap();
    store.remove(&path).unwrap();
    assert!(!store.exists(&path));
}
