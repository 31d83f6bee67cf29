//! `modscan analysis enqueue` uploads against a local object store.

use std::path::Path;

use modscan_cli::cli::{DEFAULT_SERVER, EnqueueArgs};
use modscan_cli::commands::analysis::upload_inputs;
use modscan_core::storage::{FsObjectStore, ObjectStore, sha256_hex};

fn enqueue_args(binary: &Path) -> EnqueueArgs {
    EnqueueArgs {
        binary: binary.to_path_buf(),
        user: "alice".to_owned(),
        min: 0,
        max: None,
        args: None,
        file: None,
        server: DEFAULT_SERVER.to_owned(),
    }
}

#[tokio::test]
async fn binary_and_module_file_are_uploaded() {
    let work = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(bucket.path());

    let binary = work.path().join("checker");
    std::fs::write(&binary, b"\x7fELF checker").unwrap();
    let modules = work.path().join("mods.txt");
    std::fs::write(&modules, "a.example/one v1.0.0\n").unwrap();

    let mut args = enqueue_args(&binary);
    args.file = Some(modules);
    args.args = Some("-json -depth 2".to_owned());
    args.min = 10;

    let params = upload_inputs(&store, &args).await.expect("upload");
    assert_eq!(params.binary, "checker");
    assert_eq!(params.user, "alice");
    assert_eq!(params.min, 10);
    assert_eq!(params.args, vec!["-json", "-depth", "2"]);
    assert_eq!(
        params.file.as_deref(),
        Some("objstore://alice/module-files/mods.txt")
    );

    assert_eq!(
        store.checksum("analysis-binaries/checker").await.unwrap(),
        Some(sha256_hex(b"\x7fELF checker"))
    );
    let stored = store.read("alice/module-files/mods.txt").await.unwrap();
    assert_eq!(&stored[..], b"a.example/one v1.0.0\n");
}

#[tokio::test]
async fn unchanged_binary_is_not_rewritten() {
    let work = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(bucket.path());

    let binary = work.path().join("checker");
    std::fs::write(&binary, b"v1").unwrap();
    upload_inputs(&store, &enqueue_args(&binary)).await.unwrap();

    let stored = bucket.path().join("analysis-binaries/checker");
    let before = std::fs::metadata(&stored).unwrap().modified().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    upload_inputs(&store, &enqueue_args(&binary)).await.unwrap();
    let after = std::fs::metadata(&stored).unwrap().modified().unwrap();
    assert_eq!(before, after);

    std::fs::write(&binary, b"v2").unwrap();
    upload_inputs(&store, &enqueue_args(&binary)).await.unwrap();
    assert_eq!(
        store.checksum("analysis-binaries/checker").await.unwrap(),
        Some(sha256_hex(b"v2"))
    );
}

#[tokio::test]
async fn max_below_min_is_rejected() {
    let work = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(bucket.path());

    let binary = work.path().join("checker");
    std::fs::write(&binary, b"bin").unwrap();
    let mut args = enqueue_args(&binary);
    args.min = 100;
    args.max = Some(5);

    let err = upload_inputs(&store, &args).await.unwrap_err();
    assert!(err.to_string().contains("less than min"), "{err}");
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn missing_binary_is_an_io_error() {
    let bucket = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(bucket.path());

    let err = upload_inputs(&store, &enqueue_args(Path::new("/nonexistent/checker")))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 10);
}
