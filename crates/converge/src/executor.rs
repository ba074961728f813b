//! Execution engine - reconciles a plan on a bounded worker pool
//!
//! The coordinating thread owns all scheduler state. Workers only run
//! `reconcile` for one task and send the result back over a channel, so
//! state transitions never race.

use crate::context::{CancelToken, Context, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::planner::ExecutionPlan;
use crate::report::{RunReport, TaskReport};
use crate::types::{ApplyResult, ExecuteOptions, TaskOutcome, TaskState};
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::{Duration, Instant};

struct Finished {
    index: usize,
    result: Result<ApplyResult>,
    elapsed: Duration,
}

/// Execute a plan
///
/// A task is dispatched once every dependency converged. A failure marks
/// the task's descendants `Skipped` while independent tasks keep going.
/// Once `cancel` is set nothing new is dispatched, in-flight tasks finish,
/// and everything still waiting becomes `Cancelled`.
///
/// Task failures are reported in the returned [`RunReport`]; an `Err` here
/// means the run could not start at all.
pub fn execute<P: ProgressCallback>(
    plan: &ExecutionPlan,
    ctx: &Context,
    opts: &ExecuteOptions,
    cancel: &CancelToken,
    progress: &mut P,
) -> Result<RunReport> {
    let started = Instant::now();
    let total = plan.len();
    let jobs = opts.jobs.max(1);

    progress.on_run_start(total);

    let mut states = vec![TaskState::Pending; total];
    let mut outcomes: Vec<Option<TaskOutcome>> = (0..total).map(|_| None).collect();
    let mut elapsed = vec![Duration::ZERO; total];
    let mut waiting: Vec<usize> = plan.dependencies.iter().map(Vec::len).collect();
    let mut completion_order = Vec::with_capacity(total);

    let mut ready = BTreeSet::new();
    for (i, count) in waiting.iter().enumerate() {
        if *count == 0 {
            states[i] = TaskState::Ready;
            ready.insert(i);
        }
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
    let (tx, rx) = mpsc::channel::<Finished>();

    // The coordinator blocks on the channel, so it must not be a pool
    // worker itself: `in_place_scope` keeps it on the calling thread.
    pool.in_place_scope(|scope| {
        let mut in_flight = 0;
        loop {
            while in_flight < jobs && !cancel.is_cancelled() {
                let Some(i) = ready.pop_first() else { break };
                let node = &plan.nodes[i];
                states[i] = TaskState::Running;
                log::debug!("{}: dispatching", node.key);
                progress.on_task_start(&node.key);

                let tx = tx.clone();
                let dry_run = opts.dry_run;
                scope.spawn(move |_| {
                    let start = Instant::now();
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        node.task.reconcile(ctx, node.lifecycle, dry_run)
                    }))
                    .unwrap_or_else(|payload| Err(Error::Panicked {
                        message: panic_message(payload.as_ref()),
                    }));
                    // The coordinator outlives every worker in the scope
                    let _ = tx.send(Finished {
                        index: i,
                        result,
                        elapsed: start.elapsed(),
                    });
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let Ok(finished) = rx.recv() else { break };
            in_flight -= 1;

            let i = finished.index;
            let key = &plan.nodes[i].key;
            elapsed[i] = finished.elapsed;

            let outcome = match finished.result {
                Ok(result) => {
                    log_result(key, &result);
                    for &dependent in &plan.dependents[i] {
                        waiting[dependent] -= 1;
                        if waiting[dependent] == 0 && states[dependent] == TaskState::Pending {
                            states[dependent] = TaskState::Ready;
                            ready.insert(dependent);
                        }
                    }
                    TaskOutcome::Converged(result)
                }
                Err(err) => {
                    log::error!("{key}: {err}");
                    TaskOutcome::Failed(err)
                }
            };

            let failed = !outcome.is_converged();
            states[i] = outcome.state();
            progress.on_task_complete(key, &outcome);
            outcomes[i] = Some(outcome);
            completion_order.push(key.clone());

            if failed {
                for d in descendants(plan, i, &states) {
                    let skipped_key = &plan.nodes[d].key;
                    log::warn!("{skipped_key}: skipped, {key} failed");
                    let outcome = TaskOutcome::Skipped { cause: key.clone() };
                    states[d] = TaskState::Skipped;
                    progress.on_task_complete(skipped_key, &outcome);
                    outcomes[d] = Some(outcome);
                    completion_order.push(skipped_key.clone());
                }
            }
        }
    });

    for (i, outcome) in outcomes.iter_mut().enumerate() {
        if !states[i].is_terminal() {
            let key = &plan.nodes[i].key;
            log::warn!("{key}: cancelled before it ran");
            let cancelled = TaskOutcome::Cancelled;
            states[i] = cancelled.state();
            progress.on_task_complete(key, &cancelled);
            *outcome = Some(cancelled);
            completion_order.push(key.clone());
        }
    }

    progress.on_run_complete();

    let tasks = plan
        .nodes
        .iter()
        .zip(outcomes)
        .zip(elapsed)
        .map(|((node, outcome), elapsed)| TaskReport {
            key: node.key.clone(),
            lifecycle: node.lifecycle,
            outcome: outcome.unwrap_or(TaskOutcome::Cancelled),
            elapsed,
        })
        .collect();

    Ok(RunReport {
        tasks,
        completion_order,
        elapsed: started.elapsed(),
        dry_run: opts.dry_run,
    })
}

/// Simple execution without progress reporting or cancellation
pub fn execute_simple(
    plan: &ExecutionPlan,
    ctx: &Context,
    opts: &ExecuteOptions,
) -> Result<RunReport> {
    execute(plan, ctx, opts, &CancelToken::new(), &mut NoProgress)
}

/// Still-pending transitive dependents of `root`, in plan order
fn descendants(plan: &ExecutionPlan, root: usize, states: &[TaskState]) -> Vec<usize> {
    let mut found = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(i) = stack.pop() {
        for &d in &plan.dependents[i] {
            if states[d] == TaskState::Pending && found.insert(d) {
                stack.push(d);
            }
        }
    }
    found.into_iter().collect()
}

fn log_result(key: &crate::task::TaskKey, result: &ApplyResult) {
    match result {
        ApplyResult::Created { .. } => log::info!("{key}: created"),
        ApplyResult::Updated { fields } => log::info!("{key}: updated {}", fields.join(", ")),
        ApplyResult::Planned { create: true, .. } => log::info!("{key}: would create"),
        ApplyResult::Planned { fields, .. } => {
            log::info!("{key}: would update {}", fields.join(", "));
        }
        ApplyResult::NoChange | ApplyResult::Ignored | ApplyResult::Warned { .. } => {
            log::debug!("{key}: {result:?}");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskGraph;
    use crate::task::{Lifecycle, TaskKey};
    use crate::testing::{Event, FakeCloud, Step};
    use std::sync::{Arc, Mutex};

    fn key(name: &str) -> TaskKey {
        TaskKey::new("Step", name)
    }

    fn plan(steps: Vec<Step>) -> ExecutionPlan {
        let mut graph = TaskGraph::new();
        for step in steps {
            graph.add_task(step).unwrap();
        }
        graph.build().unwrap()
    }

    fn opts(jobs: usize) -> ExecuteOptions {
        ExecuteOptions {
            dry_run: false,
            jobs,
        }
    }

    #[test]
    fn test_dependencies_render_first() {
        let cloud = FakeCloud::default();
        let plan = plan(vec![
            Step::new("c").after(["b"]),
            Step::new("b").after(["a"]),
            Step::new("a"),
        ]);
        let report = execute_simple(&plan, &cloud.context(), &opts(4)).unwrap();

        assert!(report.is_success());
        assert_eq!(cloud.renders(), ["a", "b", "c"]);
        assert_eq!(report.summary().created, 3);

        let events = cloud.events();
        let at = |event: Event| events.iter().position(|e| *e == event).unwrap();
        assert!(at(Event::Render("a".into())) < at(Event::Find("b".into())));
        assert!(at(Event::Render("b".into())) < at(Event::Find("c".into())));
    }

    #[test]
    fn test_independent_tasks_run_concurrently() {
        let cloud = FakeCloud::default();
        cloud.meet_in_render(&["left", "right"]);
        let plan = plan(vec![Step::new("left"), Step::new("right")]);
        let report = execute_simple(&plan, &cloud.context(), &opts(2)).unwrap();

        assert!(report.is_success(), "{:?}", report.root_causes().collect::<Vec<_>>());
        assert_eq!(report.summary().created, 2);
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let cloud = FakeCloud::default();
        cloud.fail_render("a");
        let plan = plan(vec![
            Step::new("a"),
            Step::new("b").after(["a"]),
            Step::new("d").after(["b"]),
            Step::new("c"),
        ]);
        let report = execute_simple(&plan, &cloud.context(), &opts(2)).unwrap();

        assert_eq!(report.state(&key("a")), Some(TaskState::Failed));
        assert!(matches!(
            report.outcome(&key("b")),
            Some(TaskOutcome::Skipped { cause }) if cause == &key("a")
        ));
        assert!(matches!(
            report.outcome(&key("d")),
            Some(TaskOutcome::Skipped { cause }) if cause == &key("a")
        ));
        assert_eq!(report.state(&key("c")), Some(TaskState::Converged));
        assert!(!cloud.renders().contains(&"b".to_string()));

        let err = report.ensure_success().unwrap_err();
        assert!(matches!(err, Error::RunFailed { failed: 1, skipped: 2, cancelled: 0 }));
    }

    #[test]
    fn test_lookup_failure_is_isolated() {
        let cloud = FakeCloud::default();
        cloud.fail_find("a");
        let plan = plan(vec![Step::new("a"), Step::new("b"), Step::new("c").after(["b"])]);
        let report = execute_simple(&plan, &cloud.context(), &opts(1)).unwrap();

        let roots: Vec<_> = report.root_causes().map(|(k, _)| k.clone()).collect();
        assert_eq!(roots, [key("a")]);
        assert_eq!(report.summary().created, 2);
    }

    #[test]
    fn test_panicking_task_is_a_failure() {
        let cloud = FakeCloud::default();
        cloud.panic_render("boom");
        let plan = plan(vec![
            Step::new("boom"),
            Step::new("after").after(["boom"]),
            Step::new("other"),
        ]);
        let report = execute_simple(&plan, &cloud.context(), &opts(2)).unwrap();

        match report.outcome(&key("boom")) {
            Some(TaskOutcome::Failed(Error::Panicked { message })) => {
                assert!(message.contains("exploded"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.state(&key("after")), Some(TaskState::Skipped));
        assert_eq!(report.state(&key("other")), Some(TaskState::Converged));
    }

    #[test]
    fn test_cancel_stops_dispatch() {
        let cloud = FakeCloud::default();
        let token = CancelToken::new();
        cloud.cancel_on("a", &token);
        let plan = plan(vec![
            Step::new("a"),
            Step::new("b").after(["a"]),
            Step::new("c").after(["b"]),
        ]);
        let report = execute(&plan, &cloud.context(), &opts(1), &token, &mut NoProgress).unwrap();

        assert_eq!(report.state(&key("a")), Some(TaskState::Converged));
        assert_eq!(report.state(&key("b")), Some(TaskState::Cancelled));
        assert_eq!(report.state(&key("c")), Some(TaskState::Cancelled));
        assert_eq!(cloud.renders(), ["a"]);
        assert_eq!(report.cancelled().count(), 2);
        assert!(report.tasks().iter().all(|t| t.outcome.state().is_terminal()));
    }

    #[test]
    fn test_dry_run_renders_nothing() {
        let cloud = FakeCloud::default();
        let plan = plan(vec![Step::new("a"), Step::new("b").after(["a"])]);
        let options = ExecuteOptions {
            dry_run: true,
            jobs: 2,
        };
        let report = execute_simple(&plan, &cloud.context(), &options).unwrap();

        assert!(report.is_dry_run());
        assert_eq!(report.summary().planned, 2);
        assert!(cloud.renders().is_empty());
    }

    #[test]
    fn test_second_run_is_no_change() {
        let cloud = FakeCloud::default();
        let plan = plan(vec![Step::new("a").value(7), Step::new("b").after(["a"])]);
        execute_simple(&plan, &cloud.context(), &opts(2)).unwrap();
        let report = execute_simple(&plan, &cloud.context(), &opts(2)).unwrap();

        assert_eq!(report.summary().no_change, 2);
        assert_eq!(report.summary().total_changes(), 0);
    }

    #[test]
    fn test_empty_plan() {
        let cloud = FakeCloud::default();
        let report = execute_simple(&plan(Vec::new()), &cloud.context(), &opts(4)).unwrap();
        assert!(report.is_success());
        assert!(report.tasks().is_empty());
    }

    #[test]
    fn test_ignored_task_still_unblocks_dependents() {
        let cloud = FakeCloud::default();
        let mut graph = TaskGraph::new();
        graph
            .add_task_with_lifecycle(Step::new("a"), Lifecycle::Ignore)
            .unwrap();
        graph.add_task(Step::new("b").after(["a"])).unwrap();
        let plan = graph.build().unwrap();
        let report = execute_simple(&plan, &cloud.context(), &opts(1)).unwrap();

        assert!(report.is_success());
        assert_eq!(cloud.renders(), ["b"]);
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ProgressCallback for Recorder {
        fn on_run_start(&mut self, total: usize) {
            self.0.lock().unwrap().push(format!("start {total}"));
        }

        fn on_task_start(&mut self, key: &TaskKey) {
            self.0.lock().unwrap().push(format!("run {key}"));
        }

        fn on_task_complete(&mut self, key: &TaskKey, outcome: &TaskOutcome) {
            self.0
                .lock()
                .unwrap()
                .push(format!("done {key} {:?}", outcome.state()));
        }

        fn on_run_complete(&mut self) {
            self.0.lock().unwrap().push("end".to_string());
        }
    }

    #[test]
    fn test_progress_sees_every_task_once() {
        let cloud = FakeCloud::default();
        cloud.fail_render("a");
        let plan = plan(vec![Step::new("a"), Step::new("b").after(["a"])]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = Recorder(log.clone());
        execute(&plan, &cloud.context(), &opts(1), &CancelToken::new(), &mut recorder).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            [
                "start 2",
                "run Step/a",
                "done Step/a Failed",
                "done Step/b Skipped",
                "end"
            ]
        );
    }
}
