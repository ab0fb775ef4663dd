//! Branch, skip and join behaviour of the engine on small graphs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use userflow::testing::{FailingTask, TestHarness};
use userflow::{
    BranchTask, Dag, DagBuilder, DagError, DagExecutor, Event, RetryPolicy, RunOutcome, Task,
    TaskContext, TaskError, TaskId, TaskStatus,
};

use crate::common::recording_bus;

struct NoopTask {
    name: String,
}

fn noop(name: &str) -> Arc<dyn Task> {
    Arc::new(NoopTask {
        name: name.to_string(),
    })
}

#[async_trait]
impl Task for NoopTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        ctx.outputs.set("done", true)?;
        Ok(())
    }
}

/// Picks whatever the store holds under `"choice"`.
struct StoredChoice;

#[async_trait]
impl BranchTask for StoredChoice {
    fn name(&self) -> &str {
        "route"
    }

    async fn choose(&self, ctx: &mut TaskContext) -> Result<TaskId, TaskError> {
        let choice: String = ctx.inputs.get("choice")?;
        Ok(TaskId::new(choice))
    }
}

//   start -> route -> a -> a2 --+
//                  -> b -> b2 --+-> end (join)
//                  -> other ----+
fn routed(a: Arc<dyn Task>) -> Dag {
    DagBuilder::new("routed", "Routed")
        .add_task(noop("start"))
        .add_branch(Arc::new(StoredChoice), &["start"], &["a", "b", "other"], "other")
        .add_task(a)
        .add_task(noop("b"))
        .add_task(noop("other"))
        .add_task_with_deps(noop("a2"), &["a"])
        .add_task_with_deps(noop("b2"), &["b"])
        .add_join(noop("end"), &["a2", "b2", "other"])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_any_choice_activates_exactly_one_successor() {
    let dag = routed(noop("a"));

    for (choice, expected) in [
        ("a", "a"),
        ("b", "b"),
        ("other", "other"),
        ("", "other"),
        ("A", "other"),
        ("a2", "other"),
        ("end", "other"),
        ("route", "other"),
    ] {
        let result = TestHarness::new()
            .with_context("choice", choice)
            .execute_and_assert_success(&dag)
            .await;

        let activated: Vec<&str> = ["a", "b", "other"]
            .into_iter()
            .filter(|s| result.dag_result.status(s) == Some(&TaskStatus::Succeeded))
            .collect();
        assert_eq!(activated, vec![expected], "choice {:?}", choice);
        assert_eq!(
            result
                .dag_result
                .get_task_result(&TaskId::new("route"))
                .and_then(|r| r.selected.clone()),
            Some(TaskId::new(expected))
        );
    }
}

#[tokio::test]
async fn test_unselected_paths_are_skipped_with_descendants() {
    let dag = routed(noop("a"));

    let result = TestHarness::new()
        .with_context("choice", "b")
        .execute_and_assert_success(&dag)
        .await;

    assert_eq!(
        result.dag_result.skipped_tasks,
        vec![TaskId::new("a"), TaskId::new("other"), TaskId::new("a2")]
    );
    assert!(!result.context.contains_key("a.done"));
    assert!(result.context.contains_key("b2.done"));
    assert!(result.context.contains_key("end.done"));
}

#[tokio::test]
async fn test_join_skips_when_live_path_failed() {
    let dag = routed(Arc::new(FailingTask::always("a")));

    let result = TestHarness::new()
        .with_context("choice", "a")
        .execute_and_assert_failure(&dag)
        .await;

    let dag_result = &result.dag_result;
    assert_eq!(dag_result.outcome, RunOutcome::Failure);
    assert_eq!(dag_result.status("a"), Some(&TaskStatus::Failed));
    assert_eq!(dag_result.status("a2"), Some(&TaskStatus::Skipped));
    assert_eq!(dag_result.status("end"), Some(&TaskStatus::Skipped));
    assert!(!result.context.contains_key("end.done"));
}

#[tokio::test(start_paused = true)]
async fn test_join_runs_once_after_all_upstreams_settled() {
    // two live paths into the join, one recovers on its second attempt
    let dag = DagBuilder::new("fan", "Fan")
        .add_task(noop("start"))
        .add_task_with_deps(noop("left"), &["start"])
        .add_task_with_deps(
            Arc::new(
                FailingTask::new("right", 1)
                    .with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(5))),
            ),
            &["start"],
        )
        .add_join(noop("end"), &["left", "right"])
        .build()
        .unwrap();

    let (bus, handler) = recording_bus().await;
    let executor = DagExecutor::default();
    let mut ctx = TaskContext::new(Default::default(), TaskId::new("run"));
    let result = executor
        .execute_with_events(&dag, &mut ctx, Some(bus))
        .await;

    assert!(result.success);
    assert_eq!(result.status("right"), Some(&TaskStatus::Succeeded));

    let right_retrying = handler
        .position(|e| matches!(e, Event::TaskRetrying { task_id, .. } if task_id.as_str() == "right"))
        .await
        .unwrap();
    let right_done = handler
        .position(|e| matches!(e, Event::TaskCompleted { task_id, .. } if task_id.as_str() == "right"))
        .await
        .unwrap();
    let end_started = handler
        .position(|e| matches!(e, Event::TaskStarted { task_id, .. } if task_id.as_str() == "end"))
        .await
        .unwrap();
    assert!(right_retrying < right_done);
    assert!(right_done < end_started);

    let end_starts = handler
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, Event::TaskStarted { task_id, .. } if task_id.as_str() == "end"))
        .count();
    assert_eq!(end_starts, 1);
}

#[tokio::test]
async fn test_failed_upstream_fails_run_even_when_sibling_succeeded() {
    let dag = DagBuilder::new("fan", "Fan")
        .add_task(noop("start"))
        .add_task_with_deps(noop("left"), &["start"])
        .add_task_with_deps(Arc::new(FailingTask::always("right")), &["start"])
        .add_join(noop("end"), &["left", "right"])
        .build()
        .unwrap();

    let result = TestHarness::new().execute_and_assert_failure(&dag).await;

    let dag_result = &result.dag_result;
    assert_eq!(dag_result.outcome, RunOutcome::Failure);
    assert_eq!(dag_result.status("left"), Some(&TaskStatus::Succeeded));
    assert_eq!(dag_result.status("end"), Some(&TaskStatus::Skipped));
    assert_eq!(dag_result.failed_tasks, vec![TaskId::new("right")]);
    assert!(!result.context.contains_key("end.done"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_delay_does_not_hold_back_other_paths() {
    let dag = DagBuilder::new("independent", "Independent")
        .add_task(noop("start"))
        .add_task_with_deps(
            Arc::new(
                FailingTask::new("slow", 1)
                    .with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(60))),
            ),
            &["start"],
        )
        .add_task_with_deps(noop("fast"), &["start"])
        .add_task_with_deps(noop("fast2"), &["fast"])
        .add_join(noop("end"), &["slow", "fast2"])
        .build()
        .unwrap();

    let (bus, handler) = recording_bus().await;
    let executor = DagExecutor::with_concurrency(1);
    let mut ctx = TaskContext::new(Default::default(), TaskId::new("run"));
    let result = executor
        .execute_with_events(&dag, &mut ctx, Some(bus))
        .await;

    assert!(result.success);
    assert_eq!(
        result
            .get_task_result(&TaskId::new("slow"))
            .map(|r| r.attempts),
        Some(2)
    );

    let retrying = handler
        .position(|e| matches!(e, Event::TaskRetrying { .. }))
        .await
        .unwrap();
    let fast2_done = handler
        .position(|e| matches!(e, Event::TaskCompleted { task_id, .. } if task_id.as_str() == "fast2"))
        .await
        .unwrap();
    let slow_done = handler
        .position(|e| matches!(e, Event::TaskCompleted { task_id, .. } if task_id.as_str() == "slow"))
        .await
        .unwrap();
    assert!(retrying < fast2_done);
    assert!(fast2_done < slow_done);
}

#[test]
fn test_graph_errors_are_caught_at_build() {
    let cycle = DagBuilder::new("cycle", "Cycle")
        .add_task(noop("start"))
        .add_task_with_deps(noop("a"), &["start"])
        .add_task_with_deps(noop("b"), &["a"])
        .add_dependency("a", "b")
        .add_task_with_deps(noop("end"), &["b"])
        .build();
    assert!(matches!(cycle, Err(DagError::CycleDetected(_))));

    let two_starts = DagBuilder::new("starts", "Starts")
        .add_task(noop("a"))
        .add_task(noop("b"))
        .add_task_with_deps(noop("end"), &["a", "b"])
        .build();
    assert!(matches!(two_starts, Err(DagError::InvalidStart(_))));

    let two_ends = DagBuilder::new("ends", "Ends")
        .add_task(noop("start"))
        .add_task_with_deps(noop("a"), &["start"])
        .add_task_with_deps(noop("b"), &["start"])
        .build();
    let err = two_ends.unwrap_err();
    assert_eq!(err.to_string(), "expected exactly one end task, found [a, b]");

    let missing_fallback = DagBuilder::new("fallback", "Fallback")
        .add_task(noop("start"))
        .add_branch(Arc::new(StoredChoice), &["start"], &["a", "b"], "c")
        .add_task(noop("a"))
        .add_task(noop("b"))
        .add_join(noop("end"), &["a", "b"])
        .build();
    assert!(matches!(missing_fallback, Err(DagError::MissingFallback { .. })));

    let unknown_successor = DagBuilder::new("unknown", "Unknown")
        .add_task(noop("start"))
        .add_branch(Arc::new(StoredChoice), &["start"], &["a", "ghost"], "a")
        .add_task(noop("a"))
        .add_join(noop("end"), &["a"])
        .build();
    assert!(matches!(
        unknown_successor,
        Err(DagError::UnknownSuccessor { .. })
    ));

    let undeclared = DagBuilder::new("undeclared", "Undeclared")
        .add_task(noop("start"))
        .add_branch(Arc::new(StoredChoice), &["start"], &["a"], "a")
        .add_task(noop("a"))
        .add_task_with_deps(noop("stray"), &["route"])
        .add_join(noop("end"), &["a", "stray"])
        .build();
    assert!(matches!(
        undeclared,
        Err(DagError::UndeclaredSuccessor { .. })
    ));

    let missing_dep = DagBuilder::new("missing", "Missing")
        .add_task_with_deps(noop("a"), &["nowhere"])
        .build();
    assert!(matches!(missing_dep, Err(DagError::MissingDependency { .. })));
}
