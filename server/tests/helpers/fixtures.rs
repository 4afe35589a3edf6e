//! Fixture project scaffolding utilities for integration tests.

use std::path::Path;

/// Recursively copy a directory tree. Preserves file contents but not metadata.
pub fn copy_dir_recursive(src: &Path, dst: &Path) {
    if !dst.exists() {
        std::fs::create_dir_all(dst).expect("failed to create dir");
    }
    for entry in std::fs::read_dir(src).expect("failed to read dir") {
        let entry = entry.expect("failed to read entry");
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path);
        } else {
            std::fs::copy(&src_path, &dst_path).expect("failed to copy file");
        }
    }
}

/// Copies a named fixture into a fresh temp dir and commits it to a local
/// git repository, so it can be cloned by URL like any other repository.
pub fn stage_fixture_repo(name: &str) -> tempfile::TempDir {
    let fixture_src = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    assert!(fixture_src.exists(), "fixture '{name}' not found at {}", fixture_src.display());

    let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let root = temp_dir.path();
    copy_dir_recursive(&fixture_src, root);

    let run = |args: &[&str]| {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(root)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {args:?} failed");
    };

    run(&["init"]);
    run(&["add", "-A"]);
    run(&["-c", "user.email=test@test.com", "-c", "user.name=Test", "commit", "-m", "Initial commit"]);

    temp_dir
}
