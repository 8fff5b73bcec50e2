// procmux: concurrent process output multiplexer
//
// SPDX-FileCopyrightText: 2026 Romeo Ahmed
// SPDX-License-Identifier: GPL-3.0-or-later

//! Integration tests for the sentinel file lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use procmux::lock::FileLock;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_serializes_holders() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("shared.log");
    let inside = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for _ in 0..8 {
        let target = target.clone();
        let inside = Arc::clone(&inside);
        set.spawn(async move {
            let lock = FileLock::acquire(&target, Some(Duration::from_secs(10)))
                .await
                .unwrap();
            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
            tokio::time::sleep(Duration::from_millis(5)).await;
            inside.fetch_sub(1, Ordering::SeqCst);
            lock.release().await.unwrap();
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }
    assert!(!FileLock::sentinel_path(&target).exists());
}

#[tokio::test]
async fn lock_timeout_message_names_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("shared.log");
    let _held = FileLock::acquire(&target, None).await.unwrap();

    let err = FileLock::acquire(&target, Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    let sentinel = FileLock::sentinel_path(&target);
    assert!(
        err.to_string().contains(&sentinel.display().to_string()),
        "{err}"
    );
}

#[cfg(unix)]
#[test]
fn lock_cli_holds_sentinel_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("build.out");
    let sentinel = FileLock::sentinel_path(&target);

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_procmux"))
        .current_dir(dir.path())
        .args(["--log-level", "0", "run", "--lock"])
        .arg(&target)
        .args(["--", "sh", "-c"])
        .arg(format!("test -e '{}' && echo held", sentinel.display()))
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(output.stdout, b"[STDOUT] held\n");
    assert!(!sentinel.exists());
}
