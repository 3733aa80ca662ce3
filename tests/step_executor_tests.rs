//! Step-executor contract: dispatch, aggregation, registries, local transport

use std::sync::Arc;

use nodestep::error::{ConfigurationError, TransportKind};
use nodestep::event_log::{EventKind, OutputStream};
use nodestep::provider::mock::{RecordingFileCopier, ScriptedNodeExecutor};
use nodestep::{
    EngineConfig, ExecutionContext, Framework, NodeEntry, NodeExecutorResult, NodeOutcome,
    ParallelDispatcher, ScriptCommand, ScriptStepExecutor, SequentialDispatcher,
    StepExecutionItem, StepExecutor,
};

fn mocked_framework(executor: ScriptedNodeExecutor) -> (Arc<Framework>, Arc<ScriptedNodeExecutor>) {
    let framework = Arc::new(Framework::default());
    let executor = Arc::new(executor);
    framework
        .file_copiers()
        .register("local", Arc::new(RecordingFileCopier::new("/tmp/step.sh")));
    framework.node_executors().register("local", executor.clone());
    (framework, executor)
}

fn windows(name: &str) -> NodeEntry {
    NodeEntry::new(name, name).with_os_family("windows")
}

#[tokio::test]
async fn dispatch_step_collects_every_node_outcome() {
    let executor = ScriptedNodeExecutor::with_results([
        NodeExecutorResult::success(0),
        NodeExecutorResult::failure(4),
    ]);
    executor.push_fault("host unreachable");
    let (framework, executor) = mocked_framework(executor);
    let ctx = ExecutionContext::builder(framework).build();

    let item = StepExecutionItem::dispatch(
        "deploy",
        ScriptCommand::content("x"),
        vec![windows("a"), windows("b"), windows("c")],
    );
    let result = ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    assert!(!result.is_success());
    assert_eq!(result.node_results().len(), 3);
    assert!(result.get("a").unwrap().is_success());
    assert_eq!(result.get("b").unwrap().result().unwrap().exit_code(), Some(4));

    let fault = result.get("c").unwrap().error().unwrap();
    assert_eq!(fault.node(), "c");
    assert_eq!(fault.transport_error().unwrap().kind(), TransportKind::Execution);
    assert_eq!(result.failed_nodes(), vec!["b", "c"]);
    assert_eq!(executor.call_count(), 3);
}

#[tokio::test]
async fn stop_on_failure_skips_remaining_nodes() {
    let (framework, executor) =
        mocked_framework(ScriptedNodeExecutor::with_results([NodeExecutorResult::failure(1)]));
    let ctx = ExecutionContext::builder(framework).build();

    let item = StepExecutionItem::dispatch(
        "deploy",
        ScriptCommand::content("x"),
        vec![windows("a"), windows("b")],
    );
    let result = ScriptStepExecutor::new()
        .with_dispatcher(Arc::new(SequentialDispatcher::new(false)))
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    assert_eq!(result.node_results().len(), 1);
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn parallel_dispatch_keeps_node_order() {
    let (framework, executor) = mocked_framework(ScriptedNodeExecutor::new());
    let ctx = ExecutionContext::builder(framework).thread_count(3).build();

    let nodes: Vec<_> = (0..6).map(|i| windows(&format!("n{}", i))).collect();
    let item = StepExecutionItem::dispatch("fanout", ScriptCommand::content("x"), nodes);
    let result = ScriptStepExecutor::new()
        .with_dispatcher(Arc::new(ParallelDispatcher::new()))
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    assert!(result.is_success());
    let names: Vec<_> = result.node_results().iter().map(|r| r.node.clone()).collect();
    assert_eq!(names, vec!["n0", "n1", "n2", "n3", "n4", "n5"]);
    assert_eq!(executor.call_count(), 6);
}

#[tokio::test]
async fn dispatch_step_without_nodes_is_an_error() {
    let (framework, executor) = mocked_framework(ScriptedNodeExecutor::new());
    let ctx = ExecutionContext::builder(framework).build();

    let item = StepExecutionItem::dispatch("empty", ScriptCommand::content("x"), vec![]);
    let err = ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap_err();

    assert_eq!(
        err.configuration_error(),
        Some(&ConfigurationError::NoTargetNodes {
            step: "empty".to_string()
        })
    );
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn local_step_runs_on_the_local_node() {
    let (framework, executor) = mocked_framework(ScriptedNodeExecutor::new());
    let ctx = ExecutionContext::builder(framework).build();

    let item = StepExecutionItem::local("here", ScriptCommand::content("x"));
    let result = ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.node_results()[0].node, "localhost");
    assert_eq!(executor.calls()[0].node.hostname, "localhost");
}

#[tokio::test]
async fn local_step_fault_is_returned_as_error() {
    let framework = Arc::new(Framework::default());
    framework
        .file_copiers()
        .register("local", Arc::new(RecordingFileCopier::failing("read-only fs")));
    let ctx = ExecutionContext::builder(framework).build();

    let item = StepExecutionItem::local("here", ScriptCommand::content("x"));
    let err = ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap_err();

    assert_eq!(err.node(), "localhost");
    assert_eq!(err.transport_error().unwrap().message(), "read-only fs");
}

#[tokio::test]
async fn step_events_bracket_the_run() {
    let (framework, _) = mocked_framework(ScriptedNodeExecutor::with_results([
        NodeExecutorResult::failure(2),
    ]));
    let ctx = ExecutionContext::builder(framework).build();

    let item = StepExecutionItem::dispatch("deploy", ScriptCommand::content("x"), vec![windows("a")]);
    ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    let steps = ctx.listener().step_events();
    assert_eq!(steps.len(), 2);
    assert!(matches!(
        &steps[0].kind,
        EventKind::StepStarted { node_count: 1, .. }
    ));
    assert!(matches!(
        &steps[1].kind,
        EventKind::StepCompleted { success: false, .. }
    ));
}

// ═══════════════════════════════════════════
// REGISTRY SCOPE
// ═══════════════════════════════════════════

#[test]
fn registry_is_the_same_instance_within_a_framework() {
    let framework = Framework::default();
    let first = framework.node_executors();
    first.register("stub", Arc::new(ScriptedNodeExecutor::new()));

    assert!(Arc::ptr_eq(&first, &framework.node_executors()));
    assert!(framework.node_executors().contains("stub"));
}

#[test]
fn registering_twice_replaces_the_provider() {
    let framework = Framework::default();
    let replacement = Arc::new(ScriptedNodeExecutor::new());

    let previous = framework.node_executors().register("local", replacement.clone());
    assert!(previous.is_some());

    let resolved = framework.node_executors().resolve("local").unwrap();
    assert_eq!(
        Arc::as_ptr(&resolved) as *const (),
        Arc::as_ptr(&replacement) as *const ()
    );
}

#[test]
fn frameworks_are_isolated() {
    let a = Framework::default();
    let b = Framework::default();
    a.node_executors()
        .register("stub", Arc::new(ScriptedNodeExecutor::new()));

    assert!(!b.node_executors().contains("stub"));
    assert!(matches!(
        b.node_executors().resolve("stub"),
        Err(ConfigurationError::ProviderNotFound { .. })
    ));
}

// ═══════════════════════════════════════════
// LOCAL TRANSPORT END TO END
// ═══════════════════════════════════════════

#[cfg(unix)]
fn local_framework(dir: &std::path::Path) -> Arc<Framework> {
    let mut config = EngineConfig::default();
    config.local.temp_dir = Some(dir.to_path_buf());
    Arc::new(Framework::new(config))
}

#[cfg(unix)]
#[tokio::test]
async fn local_transport_runs_script_with_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::builder(local_framework(dir.path())).build();

    let command = ScriptCommand::content("#!/bin/sh\necho \"hello $1 $2\"\n").with_args(["big", "world"]);
    let item = StepExecutionItem::local("greet", command);
    let result = ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(
        ctx.listener().output_lines("localhost", OutputStream::Stdout),
        vec!["hello big world"]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn local_transport_reports_exit_code_as_result() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::builder(local_framework(dir.path())).build();

    let item = StepExecutionItem::local("fail", ScriptCommand::content("#!/bin/sh\nexit 7\n"));
    let result = ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    assert!(!result.is_success());
    match &result.node_results()[0].outcome {
        NodeOutcome::Completed(r) => assert_eq!(r.exit_code(), Some(7)),
        NodeOutcome::Faulted(e) => panic!("expected completed result, got {}", e),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn local_transport_delivers_stream_and_server_file() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("source.sh");
    std::fs::write(&script, "#!/bin/sh\necho from-file\n").unwrap();
    let ctx = ExecutionContext::builder(local_framework(&dir.path().join("out"))).build();

    let from_file = StepExecutionItem::local("file", ScriptCommand::server_file(&script));
    let from_stream = StepExecutionItem::local(
        "stream",
        ScriptCommand::stream(b"#!/bin/sh\necho from-stream\n".to_vec()),
    );

    let executor = ScriptStepExecutor::new();
    assert!(executor.execute_workflow_step(&ctx, &from_file).await.unwrap().is_success());
    assert!(executor.execute_workflow_step(&ctx, &from_stream).await.unwrap().is_success());

    assert_eq!(
        ctx.listener().output_lines("localhost", OutputStream::Stdout),
        vec!["from-file", "from-stream"]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn local_transport_runs_content_without_interpreter_line() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::builder(local_framework(dir.path())).build();

    let item = StepExecutionItem::local("plain", ScriptCommand::content("echo hi\n"));
    let result = ScriptStepExecutor::new()
        .execute_workflow_step(&ctx, &item)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(
        ctx.listener().output_lines("localhost", OutputStream::Stdout),
        vec!["hi"]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn local_transport_leaves_no_delivered_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::builder(local_framework(dir.path())).build();

    let executor = ScriptStepExecutor::new();
    for script in ["#!/bin/sh\nexit 0\n", "#!/bin/sh\nexit 5\n"] {
        let item = StepExecutionItem::local("tidy", ScriptCommand::content(script));
        executor.execute_workflow_step(&ctx, &item).await.unwrap();
    }

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
