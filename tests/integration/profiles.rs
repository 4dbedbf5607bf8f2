//! Build profile isolation and persistence across orchestrator runs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use intentc::config::StateBackend;
use intentc::core::TargetStatus;
use intentc::BuildRequest;

use crate::fixtures::{is_within, RecordingAgent, TestProject};

/// Test: Profile isolation
/// Given one target
/// When it is built under "dev" and then "staging"
/// Then each profile has its own output directory and latest result, and
/// neither build is visible through the other profile's status
#[tokio::test]
async fn test_profiles_are_isolated() {
    let project = TestProject::new();
    project.add_target("service", &[], "A small service.");
    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());
    let cancel = CancellationToken::new();

    orchestrator
        .build(&BuildRequest::target("service").with_profile("dev"), &cancel)
        .await
        .unwrap();

    let store = project.store();
    assert_eq!(
        store.get_target_status("service", "dev").unwrap(),
        TargetStatus::Built
    );
    assert_eq!(
        store.get_target_status("service", "staging").unwrap(),
        TargetStatus::Pending
    );
    assert!(store
        .get_latest_build_result("service", "staging")
        .unwrap()
        .is_none());

    orchestrator
        .build(
            &BuildRequest::target("service").with_profile("staging"),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(agent.calls_for("service"), 2);

    let dev = store
        .get_latest_build_result("service", "dev")
        .unwrap()
        .unwrap();
    let staging = store
        .get_latest_build_result("service", "staging")
        .unwrap()
        .unwrap();
    assert_ne!(dev.output_dir, staging.output_dir);
    assert_ne!(dev.generation_id, staging.generation_id);
    assert!(is_within(&dev.files[0], &project.output_dir("dev")));
    assert!(is_within(&staging.files[0], &project.output_dir("staging")));

    let calls = agent.calls();
    assert_eq!(calls[0].profile, "dev");
    assert_eq!(calls[1].profile, "staging");
}

/// Test: Cleaning one profile leaves the other alone
#[tokio::test]
async fn test_clean_is_profile_scoped() {
    let project = TestProject::new();
    project.add_target("service", &[], "A small service.");
    let orchestrator = project.orchestrator(Arc::new(RecordingAgent::new()));
    let cancel = CancellationToken::new();

    for profile in ["dev", "staging"] {
        orchestrator
            .build(&BuildRequest::all().with_profile(profile), &cancel)
            .await
            .unwrap();
    }

    let report = orchestrator.clean(None, Some("dev")).unwrap();
    assert_eq!(report.reset, vec!["service"]);
    assert!(!project.output_dir("dev").exists());
    assert!(project.output_dir("staging").join("service.txt").exists());

    let staging = orchestrator.status(Some("staging")).unwrap();
    assert_eq!(staging[0].status, TargetStatus::Built);
    let dev = orchestrator.status(Some("dev")).unwrap();
    assert_eq!(dev[0].status, TargetStatus::Pending);
}

/// Test: State survives a restart
/// Given a target built by one orchestrator
/// When a new orchestrator, store and provider are opened on the same project
/// Then the target is still built and is skipped
async fn assert_state_survives_restart(backend: StateBackend) {
    let project = TestProject::with_backend(backend);
    project.add_target("lib", &[], "A library.");
    let cancel = CancellationToken::new();

    let first = Arc::new(RecordingAgent::new());
    project
        .orchestrator(first.clone())
        .build(&BuildRequest::target("lib"), &cancel)
        .await
        .unwrap();
    assert_eq!(first.calls_for("lib"), 1);

    let second = Arc::new(RecordingAgent::new());
    let report = project
        .orchestrator(second.clone())
        .build(&BuildRequest::target("lib"), &cancel)
        .await
        .unwrap();
    assert_eq!(report.skipped(), vec!["lib"]);
    assert!(second.calls().is_empty());
}

#[tokio::test]
async fn test_git_state_survives_restart() {
    assert_state_survives_restart(StateBackend::Git).await;
}

#[tokio::test]
async fn test_file_state_survives_restart() {
    assert_state_survives_restart(StateBackend::File).await;
}

/// Test: Default profile comes from config
#[test]
fn test_default_profile_from_config() {
    let mut project = TestProject::new();
    project.config.default_profile = "nightly".to_string();
    project.add_target("job", &[], "Nightly job.");
    let orchestrator = project.orchestrator(Arc::new(RecordingAgent::new()));

    let plan = orchestrator.plan(&BuildRequest::all()).unwrap();
    assert_eq!(plan.profile, "nightly");
    assert!(plan.output_dir.ends_with("build/nightly"));
}
