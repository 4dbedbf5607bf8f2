//! Build ordering, skipping, failure and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use intentc::config::StateBackend;
use intentc::core::TargetStatus;
use intentc::{BuildRequest, Error};

use crate::fixtures::{cancel_after, is_within, RecordingAgent, TestProject};

/// Test: Dependencies build first
/// Given feature2 depending on feature1 and an empty state store
/// When feature2 is built
/// Then feature1 is built first, then feature2
#[tokio::test]
async fn test_dependency_built_before_dependent() {
    let project = TestProject::new();
    project.add_target("feature1", &[], "Create the data model.");
    project.add_target("feature2", &["feature1"], "Expose the data model over HTTP.");

    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());
    let report = orchestrator
        .build(&BuildRequest::target("feature2"), &CancellationToken::new())
        .await
        .expect("build should succeed");

    assert_eq!(agent.called_targets(), vec!["feature1", "feature2"]);
    assert_eq!(report.built().len(), 2);

    let calls = agent.calls();
    assert!(calls[0].dependencies.is_empty());
    assert_eq!(calls[1].dependencies, vec!["feature1"]);

    let store = project.store();
    for name in ["feature1", "feature2"] {
        assert_eq!(
            store.get_target_status(name, "default").unwrap(),
            TargetStatus::Built
        );
    }
    let produced = project.output_dir("default").join("feature2.txt");
    assert_eq!(
        std::fs::read_to_string(produced).unwrap(),
        "Expose the data model over HTTP."
    );
}

/// Test: Idempotent rebuild
/// Given a target already built under a profile
/// When it is built again without and then with force
/// Then the agent runs once for the plain rebuild and again when forced
#[tokio::test]
async fn test_build_is_idempotent_unless_forced() {
    let project = TestProject::new();
    project.add_target("auth", &[], "Login and logout.");
    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());
    let cancel = CancellationToken::new();

    orchestrator
        .build(&BuildRequest::target("auth"), &cancel)
        .await
        .unwrap();
    let second = orchestrator
        .build(&BuildRequest::target("auth"), &cancel)
        .await
        .unwrap();
    assert_eq!(second.skipped(), vec!["auth"]);
    assert_eq!(agent.calls_for("auth"), 1);
    assert_eq!(orchestrator.history("auth", None).unwrap().len(), 1);

    orchestrator
        .build(&BuildRequest::target("auth").with_force(true), &cancel)
        .await
        .unwrap();
    assert_eq!(agent.calls_for("auth"), 2);

    let history = orchestrator.history("auth", None).unwrap();
    assert_eq!(history.len(), 2);
    assert_ne!(history[0].generation_id, history[1].generation_id);
    let calls = agent.calls();
    assert_ne!(calls[0].generation, calls[1].generation);
}

/// Test: Full scope builds only what is not built
/// Given three targets of which one is already built
/// When building with no target
/// Then only the remaining two reach the agent, in dependency order
#[tokio::test]
async fn test_full_scope_builds_unbuilt_targets() {
    let project = TestProject::new();
    project.add_target("models", &[], "Models.");
    project.add_target("api", &["models"], "API.");
    project.add_target("ui", &["api"], "UI.");
    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());
    let cancel = CancellationToken::new();

    orchestrator
        .build(&BuildRequest::target("models"), &cancel)
        .await
        .unwrap();
    orchestrator.build(&BuildRequest::all(), &cancel).await.unwrap();

    assert_eq!(agent.called_targets(), vec!["models", "api", "ui"]);
}

/// Test: Failure stops dependents
/// Given A depending on B where B's agent call fails
/// When building A
/// Then A is never invoked and the error names B
#[tokio::test]
async fn test_failure_propagation() {
    let project = TestProject::new();
    project.add_target("b", &[], "Base.");
    project.add_target("a", &["b"], "On top.");
    let agent = Arc::new(RecordingAgent::new().failing_on("b"));
    let orchestrator = project.orchestrator(agent.clone());

    let err = orchestrator
        .build(&BuildRequest::target("a"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TargetFailed { ref target, .. } if target == "b"));
    assert!(err.to_string().contains("'b'"));
    assert_eq!(agent.calls_for("a"), 0);

    let store = project.store();
    assert_eq!(
        store.get_target_status("b", "default").unwrap(),
        TargetStatus::Failed
    );
    assert_eq!(
        store.get_target_status("a", "default").unwrap(),
        TargetStatus::Pending
    );
    let recorded = store.get_latest_build_result("b", "default").unwrap().unwrap();
    assert!(!recorded.success);
}

/// Test: Cycles are rejected up front
/// Given A -> B -> C -> A
/// When any build is requested
/// Then a cycle error is returned with no agent call and no state change
#[tokio::test]
async fn test_cycle_rejected_before_agent() {
    let project = TestProject::new();
    project.add_target("a", &["b"], "A.");
    project.add_target("b", &["c"], "B.");
    project.add_target("c", &["a"], "C.");
    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());

    let err = orchestrator
        .build(&BuildRequest::all(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    match err {
        Error::CycleDetected { path } => {
            assert_eq!(path.len(), 4);
            assert_eq!(path.first(), path.last());
        }
        other => panic!("expected CycleDetected, got {:?}", other),
    }
    assert!(agent.calls().is_empty());
    assert_eq!(
        project.store().get_target_status("a", "default").unwrap(),
        TargetStatus::Pending
    );
    assert!(!project.output_dir("default").exists());
}

/// Test: Unknown dependency
/// Given a target naming a dependency nobody defines
/// When building
/// Then the run fails with a configuration error and the agent is idle
#[tokio::test]
async fn test_unresolved_dependency() {
    let project = TestProject::new();
    project.add_target("web", &["missing"], "Web.");
    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());

    let err = orchestrator
        .build(&BuildRequest::all(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnresolvedDependency { .. }));
    assert!(agent.calls().is_empty());
}

/// Test: Dry run
/// Given two unbuilt targets
/// When building with dry_run
/// Then the plan lists both and nothing runs or changes
#[tokio::test]
async fn test_dry_run_reports_plan_only() {
    let project = TestProject::new();
    project.add_target("feature1", &[], "One.");
    project.add_target("feature2", &["feature1"], "Two.");
    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());

    let report = orchestrator
        .build(
            &BuildRequest::target("feature2").with_dry_run(true),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.plan.to_build(), vec!["feature1", "feature2"]);
    assert!(agent.calls().is_empty());
    assert!(orchestrator.history("feature1", None).unwrap().is_empty());
    assert_eq!(
        project.store().get_target_status("feature1", "default").unwrap(),
        TargetStatus::Pending
    );
}

/// Test: Dry run on a fresh project
/// Given a project with no git repository and no state directory
/// When a dry run is requested with either backend
/// Then every target is planned as pending and nothing is created
#[tokio::test]
async fn test_dry_run_before_any_state_exists() {
    for backend in [StateBackend::Git, StateBackend::File] {
        let project = TestProject::without_repository(backend);
        project.add_target("feature1", &[], "One.");
        project.add_target("feature2", &["feature1"], "Two.");
        let agent = Arc::new(RecordingAgent::new());
        let orchestrator = project.uninitialized_orchestrator(agent.clone());

        let report = orchestrator
            .build(
                &BuildRequest::all().with_dry_run(true),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.plan.to_build(), vec!["feature1", "feature2"]);
        assert!(report
            .plan
            .targets
            .iter()
            .all(|t| t.status == TargetStatus::Pending));
        assert!(agent.calls().is_empty());
        assert!(!project.root.join(".git").exists());
        assert!(!project.root.join(".intentc/state").exists());

        let states = orchestrator.status(None).unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|s| s.latest.is_none()));
    }
}

/// Test: Cancellation
/// Given an agent that blocks on its first target
/// When the build is cancelled
/// Then the target is left building, no result is recorded, and later
/// targets never start
#[tokio::test]
async fn test_cancellation_leaves_target_building() {
    let project = TestProject::new();
    project.add_target("slow", &[], "Takes forever.");
    project.add_target("after", &["slow"], "Never reached.");
    let agent = Arc::new(RecordingAgent::new().hanging_on("slow"));
    let orchestrator = project.orchestrator(agent.clone());

    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));
    let err = orchestrator
        .build(&BuildRequest::all(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(agent.called_targets(), vec!["slow"]);
    let store = project.store();
    assert_eq!(
        store.get_target_status("slow", "default").unwrap(),
        TargetStatus::Building
    );
    assert!(store.list_build_results("slow", "default").unwrap().is_empty());

    // An interrupted target is not built, so the next full build retries it.
    let plan = orchestrator.plan(&BuildRequest::all()).unwrap();
    assert_eq!(plan.to_build(), vec!["slow", "after"]);
}

/// Test: Clean
/// Given a built target
/// When it is cleaned
/// Then its file is gone, status is pending, and a plain build runs it again
#[tokio::test]
async fn test_clean_then_rebuild() {
    let project = TestProject::new();
    project.add_target("docs", &[], "Write docs.");
    let agent = Arc::new(RecordingAgent::new());
    let orchestrator = project.orchestrator(agent.clone());
    let cancel = CancellationToken::new();

    let report = orchestrator
        .build(&BuildRequest::target("docs"), &cancel)
        .await
        .unwrap();
    let file = report.built()[0].files[0].clone();
    assert!(is_within(&file, &project.output_dir("default")));
    assert!(file.exists());

    let cleaned = orchestrator.clean(Some("docs"), None).unwrap();
    assert_eq!(cleaned.removed, vec![file.clone()]);
    assert!(!file.exists());

    orchestrator
        .build(&BuildRequest::target("docs"), &cancel)
        .await
        .unwrap();
    assert_eq!(agent.calls_for("docs"), 2);
    assert!(file.exists());
}

/// Test: Affected targets and graph rendering
#[test]
fn test_affected_and_graph() {
    let project = TestProject::new();
    project.add_target("core", &[], "Core.");
    project.add_target("api", &["core"], "API.");
    project.add_target("cli", &["api"], "CLI.");
    project.add_target("docs", &[], "Docs.");
    let orchestrator = project.orchestrator(Arc::new(RecordingAgent::new()));

    let mut affected = orchestrator.affected("core").unwrap();
    affected.sort();
    assert_eq!(affected, vec!["api", "cli", "core"]);
    assert_eq!(orchestrator.affected("docs").unwrap(), vec!["docs"]);

    let rendered = orchestrator.graph().unwrap().visualize();
    for name in ["core", "api", "cli", "docs"] {
        assert!(rendered.contains(name), "{} missing from:\n{}", name, rendered);
    }
}
