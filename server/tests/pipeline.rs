//! End-to-end run of the orchestrator against a small local fixture
//! repository, using stub AI clients instead of a real provider.

mod helpers;

use codereview_core::model::RunStatus;
use codereview_server::orchestrator;

#[tokio::test]
async fn full_run_completes_and_scores_every_selected_file() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let repo = helpers::fixtures::stage_fixture_repo("basic");
    let ctx = helpers::test_context(scratch.path());

    let repo_url = repo.path().to_string_lossy().to_string();
    let (run_id, all_files) = orchestrator::start(ctx.clone(), None, repo_url, None)
        .await
        .expect("run should start");

    assert!(all_files.iter().any(|f| f == "src/main.rs"));

    let view = loop {
        let view = orchestrator::status(&ctx, &run_id).expect("run should be known");
        match view.status {
            RunStatus::Complete | RunStatus::Error => break view,
            _ => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
        }
    };

    assert_eq!(view.status, RunStatus::Complete, "run failed: {:?}", view.error);
    let report = view.report.expect("complete run carries a report");
    assert!(!report.scored_files.is_empty());
    assert!(report.final_project_score.is_some());
    assert!(report.scored_files.iter().any(|f| f.file_path == "src/main.rs"));
}

#[tokio::test]
async fn empty_repository_errors_without_any_ai_call() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let empty_repo = tempfile::tempdir().expect("empty repo dir");
    let run_std = |args: &[&str]| {
        std::process::Command::new("git")
            .args(args)
            .current_dir(empty_repo.path())
            .status()
            .expect("git available")
    };
    run_std(&["init"]);
    run_std(&["-c", "user.email=test@test.com", "-c", "user.name=Test", "commit", "--allow-empty", "-m", "empty"]);

    let ctx = helpers::test_context(scratch.path());
    let repo_url = empty_repo.path().to_string_lossy().to_string();

    let (run_id, all_files) = orchestrator::start(ctx.clone(), None, repo_url, None).await.expect("run should start");
    assert!(all_files.is_empty());

    let view = orchestrator::status(&ctx, &run_id).expect("run should be known");
    assert_eq!(view.status, RunStatus::Error);
    assert_eq!(view.error.as_deref(), Some("no files were selected"));
}
