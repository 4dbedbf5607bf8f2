//! The command-line agent driven by the orchestrator.
//!
//! Uses `sh -c` scripts as stand-ins for a real agent command.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use intentc::agent::{CliAgent, RetryPolicy};
use intentc::core::TargetStatus;
use intentc::{BuildRequest, Error};

use crate::fixtures::TestProject;

/// Script that writes one file per target and reports it with a marker.
const WRITE_TARGET_FILE: &str = r#"
printf '%s\n' "$INTENTC_DEPENDENCIES" > "$INTENTC_TARGET.deps"
echo "building $INTENTC_TARGET for $INTENTC_PROFILE"
echo "FILE: $INTENTC_TARGET.deps"
"#;

/// Test: End to end with a shell agent
/// Given two targets on disk and a git-backed store
/// When the full scope is built with a CliAgent
/// Then the agent runs inside the profile output directory, receives its
/// context through the environment, and its reported files are recorded
#[tokio::test]
async fn test_cli_agent_end_to_end() {
    let project = TestProject::new();
    project.add_target("schema", &[], "Define tables.");
    project.add_target("queries", &["schema"], "Write queries.");

    let agent = CliAgent::new("sh").with_args(["-c", WRITE_TARGET_FILE]);
    let orchestrator = project.orchestrator(Arc::new(agent));
    let report = orchestrator
        .build(&BuildRequest::all().with_profile("ci"), &CancellationToken::new())
        .await
        .unwrap();

    let out = project.output_dir("ci");
    let built = report.built();
    assert_eq!(built.len(), 2);
    assert_eq!(built[0].target, "schema");
    assert_eq!(built[0].files, vec![out.join("schema.deps")]);
    assert_eq!(built[1].files, vec![out.join("queries.deps")]);

    assert_eq!(
        std::fs::read_to_string(out.join("queries.deps")).unwrap().trim(),
        "schema"
    );
    assert_eq!(
        orchestrator.status(Some("ci")).unwrap()[0].status,
        TargetStatus::Built
    );
}

/// Test: Agent failure after retries
/// Given an agent command that always exits non-zero
/// When the target is built with two attempts
/// Then both attempts run, the target is failed, and stderr is reported
#[tokio::test]
async fn test_cli_agent_failure_is_recorded() {
    let project = TestProject::new();
    project.add_target("flaky", &[], "Never works.");

    let agent = CliAgent::new("sh")
        .with_args(["-c", "echo try >> attempts; echo 'model overloaded' >&2; exit 1"])
        .with_retry(RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
            exponential: false,
        });
    let orchestrator = project.orchestrator(Arc::new(agent));
    let err = orchestrator
        .build(&BuildRequest::target("flaky"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("model overloaded"));
    let attempts = std::fs::read_to_string(project.output_dir("default").join("attempts")).unwrap();
    assert_eq!(attempts.lines().count(), 2);

    let history = orchestrator.history("flaky", None).unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(
        project.store().get_target_status("flaky", "default").unwrap(),
        TargetStatus::Failed
    );
}

/// Test: Orchestrator timeout bounds the agent
#[tokio::test]
async fn test_agent_timeout() {
    let project = TestProject::new();
    project.add_target("stuck", &[], "Hangs.");

    let agent = CliAgent::new("sh").with_args(["-c", "sleep 10"]);
    let orchestrator = project
        .orchestrator(Arc::new(agent))
        .with_agent_timeout(Some(Duration::from_millis(100)));

    let err = orchestrator
        .build(&BuildRequest::target("stuck"), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        Error::TargetFailed { target, source } => {
            assert_eq!(target, "stuck");
            assert!(matches!(*source, Error::Timeout(_)));
        }
        other => panic!("expected TargetFailed, got {:?}", other),
    }
}

/// Test: Reported paths cannot reach outside the output directory
/// Given an agent that reports a file two levels above its output directory
/// When the target is built and then cleaned
/// Then only the file inside the output directory is recorded and removed
#[tokio::test]
async fn test_escaping_file_marker_is_not_cleaned() {
    let project = TestProject::new();
    project.add_target("a", &[], "Anything.");
    let victim = project.root.join("victim.txt");
    std::fs::write(&victim, "keep me").unwrap();

    let agent = CliAgent::new("sh").with_args([
        "-c",
        "echo out > a.txt; echo 'FILE: ../../victim.txt'; echo 'FILE: a.txt'",
    ]);
    let orchestrator = project.orchestrator(Arc::new(agent));
    let report = orchestrator
        .build(&BuildRequest::target("a"), &CancellationToken::new())
        .await
        .unwrap();
    let inside = project.output_dir("default").join("a.txt");
    assert_eq!(report.built()[0].files, vec![inside.clone()]);

    let cleaned = orchestrator.clean(Some("a"), None).unwrap();
    assert_eq!(cleaned.removed, vec![inside.clone()]);
    assert!(!inside.exists());
    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "keep me");
}
