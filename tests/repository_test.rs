#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use edge_batch_rs::{EdgeSuiteError, RepositoryMaterializer, RepositoryOutcome};

const EDTER_URL: &str = "https://github.com/MengyangPu/EDTER";

/// Stands in for git; `$5` is the clone target in `clone --depth 1 <url> <path>`.
fn fake_git(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_interrupted_clone_is_retried_on_next_run() -> Result<(), Box<dyn Error>> {
    let temp_dir = TempDir::new()?;
    let bin = temp_dir.path().join("bin");
    let models_dir = temp_dir.path().join("models");
    fs::create_dir_all(&bin)?;

    // both scripts exist before anything is spawned
    let hanging = fake_git(
        &bin,
        "git-hang",
        r#"mkdir -p "$5/.git" && touch "$5/.git/HEAD"
exec sleep 30"#,
    );
    let working = fake_git(
        &bin,
        "git-ok",
        r#"mkdir -p "$5/.git" "$5/demo" && touch "$5/demo/test_single.py""#,
    );

    let first = RepositoryMaterializer::new(&models_dir, &hanging)
        .with_timeout(Duration::from_millis(500));
    let error = first.ensure(EDTER_URL).await.unwrap_err();
    assert!(matches!(error, EdgeSuiteError::Repository { .. }));
    let reason = error.source().map(|s| s.to_string()).unwrap_or_default();
    assert!(reason.contains("timed out"), "{reason}");
    assert!(!models_dir.join("EDTER").exists());
    assert!(fs::read_dir(&models_dir)?.next().is_none());

    let second = RepositoryMaterializer::new(&models_dir, &working);
    assert_eq!(second.ensure(EDTER_URL).await?, RepositoryOutcome::Cloned);
    assert!(models_dir.join("EDTER/demo/test_single.py").is_file());

    let entries: Vec<String> = fs::read_dir(&models_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["EDTER"]);

    assert_eq!(second.ensure(EDTER_URL).await?, RepositoryOutcome::AlreadyPresent);
    Ok(())
}
