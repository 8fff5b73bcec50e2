// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;
use std::time::Duration;

use super::FileLock;
use crate::error::LockError;

#[test]
fn test_sentinel_path() {
    let sentinel = FileLock::sentinel_path("out/data.csv");
    assert_eq!(sentinel, Path::new("out/data.csv.lock"));
}

#[tokio::test]
async fn test_acquire_creates_and_drop_removes() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("data.csv");

    let lock = FileLock::acquire(&target, None).await.unwrap();
    assert!(lock.path().exists());
    assert!(!target.exists(), "the guarded file itself is never touched");

    let sentinel = lock.path().to_path_buf();
    drop(lock);
    assert!(!sentinel.exists());
}

#[tokio::test]
async fn test_second_acquirer_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("data.csv");

    let _held = FileLock::acquire(&target, None).await.unwrap();
    let err = FileLock::acquire(&target, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    match err {
        LockError::Timeout { path, waited } => {
            assert_eq!(path, FileLock::sentinel_path(&target));
            assert_eq!(waited, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_waiter_acquires_after_release() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("data.csv");

    let held = FileLock::acquire(&target, None).await.unwrap();
    let waiter = tokio::spawn({
        let target = target.clone();
        async move { FileLock::acquire(&target, Some(Duration::from_secs(5))).await }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());
    held.release().await.unwrap();

    let second = waiter.await.unwrap().unwrap();
    assert!(second.path().exists());
}

#[tokio::test]
async fn test_missing_directory_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing").join("data.csv");

    let err = FileLock::acquire(&target, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Io { .. }));
}
