//! Integration tests for cairn core storage

use cairn_core::hash::hash_bytes;
use cairn_core::{Entry, ObjectStore, Tree, TreeDiff};

#[test]
fn test_full_storage_pipeline() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let store = ObjectStore::init(temp_dir.path())?;

    let blob1 = b"This is the content of file1.txt".to_vec();
    let blob2 = b"This is the content of file2.txt".to_vec();
    let blob3 = b"compressible content ".repeat(400);

    let mut tree = Tree::new();
    for (path, data) in [
        ("file1.txt", &blob1),
        ("file2.txt", &blob2),
        ("src/file3.txt", &blob3),
    ] {
        let digest = store.blob_store().put(data)?;
        tree.insert(path, Entry::file(digest, data.len() as u64));
    }

    let tree_digest = store.write_tree(&tree)?;
    drop(store);

    let store = ObjectStore::open(temp_dir.path())?;
    let read_tree = store.read_tree(&tree_digest)?;
    assert_eq!(read_tree.len(), 3);

    for (path, expected) in [
        ("file1.txt", &blob1),
        ("file2.txt", &blob2),
        ("src/file3.txt", &blob3),
    ] {
        let entry = read_tree.get(path).expect("entry present");
        assert_eq!(&store.blob_store().get(&entry.digest)?, expected);
    }

    Ok(())
}

#[test]
fn test_identical_content_stored_once() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let store = ObjectStore::init(temp_dir.path())?;

    let a = store.blob_store().put(b"tjosanhejsan")?;
    let b = store.blob_store().put(b"tjosanhejsan")?;
    let c = store.blob_store().put(b"something else")?;

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(store.blob_store().count()?, 2);
    Ok(())
}

#[test]
fn test_tree_diff_between_stored_trees() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let store = ObjectStore::init(temp_dir.path())?;

    let mut tree1 = Tree::new();
    tree1.insert("file1.txt", Entry::file(hash_bytes(b"content1"), 8));
    tree1.insert("file2.txt", Entry::file(hash_bytes(b"content2"), 8));

    let mut tree2 = Tree::new();
    tree2.insert("file1.txt", Entry::file(hash_bytes(b"modified"), 8));
    tree2.insert("file3.txt", Entry::file(hash_bytes(b"content1"), 8));

    let d1 = store.write_tree(&tree1)?;
    let d2 = store.write_tree(&tree2)?;
    assert_ne!(d1, d2);

    let diff = TreeDiff::diff(&*store.read_tree(&d1)?, &*store.read_tree(&d2)?);
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.removed.len(), 1);
    assert_eq!(diff.modified.len(), 1);
    Ok(())
}

#[test]
fn test_concurrent_blob_writes() -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::thread;

    let temp_dir = tempfile::tempdir()?;
    let store = Arc::new(ObjectStore::init(temp_dir.path())?);

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.blob_store().put(format!("thread {} data", i % 5).as_bytes()))
        })
        .collect();

    for handle in handles {
        handle.join().unwrap()?;
    }

    assert_eq!(store.blob_store().count()?, 5);
    for i in 0..5 {
        let data = format!("thread {} data", i);
        let blob = store.blob_store().get(&hash_bytes(data.as_bytes()))?;
        assert_eq!(blob, data.as_bytes());
    }
    Ok(())
}
